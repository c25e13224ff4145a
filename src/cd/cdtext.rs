//! CD-Text reading and decoding
//!
//! CD-Text is returned by READ TOC/PMA/ATIP format 0101b as a stream of
//! 18-byte packs. Packs are grouped into up to eight blocks (one per
//! language); each block carries NUL-separated string pools per pack type
//! where the first string belongs to the album and the rest to the tracks.
//!
//! Reference: MMC-3 Annex J, and the libcdio CD-Text format notes.

use crate::cd::cdb::{self, TOC_FORMAT_CD_TEXT};
use crate::cd::transport::{Direction, ScsiDevice, Transport, TransportError};
use crc::Crc;
use serde::Serialize;
use std::collections::TryReserveError;
use std::ops::Range;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const PACK_LEN: usize = 18;
const HEADER_LEN: usize = 4;
const PAYLOAD_START: usize = 4;
const PAYLOAD_LEN: usize = 12;
const CRC_START: usize = 16;

/// Eight blocks of at most 256 packs each, plus the response header
pub const CD_TEXT_ALLOCATION_LEN: usize = 8 * 256 * PACK_LEN + HEADER_LEN;

pub const MAX_BLOCK: u8 = 7;

const PACK_TYPE_TITLE: u8 = 0x80;
const PACK_TYPE_PERFORMER: u8 = 0x81;
const PACK_TYPE_SONGWRITER: u8 = 0x82;
const PACK_TYPE_COMPOSER: u8 = 0x83;
const PACK_TYPE_ARRANGER: u8 = 0x84;
const PACK_TYPE_MESSAGE: u8 = 0x85;
const PACK_TYPE_SIZE_INFO: u8 = 0x8f;

/// Track number byte of the album entry
const ALBUM_TRACK: usize = 0;
/// Marker string meaning "same as the previous track"
const REPEAT_PREVIOUS: &[u8] = b"\t";

const CD_TEXT_CRC: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_GSM);

#[derive(Debug, Error)]
pub enum CdTextError {
    #[error("CD-Text does not exist on this disc")]
    DoesNotExist,
    #[error("CD-Text data empty")]
    DataEmpty,
    #[error("CD-Text block {0} not found")]
    BlockNotFound(u8),
    #[error("CD-Text block number {0} out of range (0-7)")]
    BlockNumberOutOfRange(u8),
    #[error("Failed to allocate memory for CD-Text: {0}")]
    AllocationFailed(#[from] TryReserveError),
    #[error("Pack type 0x{pack_type:02x} has a string for track {track} outside the block's track range")]
    TooManyStrings { pack_type: u8, track: usize },
    #[error("CRC mismatch in CD-Text pack {index}")]
    ChecksumMismatch { index: usize },
    #[error(transparent)]
    Transport(TransportError),
}

impl CdTextError {
    /// Whether the disc carries no CD-Text at all
    ///
    /// `DataEmpty` is not absence: the drive returned CD-Text with no packs.
    pub fn is_absent(&self) -> bool {
        matches!(self, CdTextError::DoesNotExist)
    }
}

impl From<TransportError> for CdTextError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Sense(_) => CdTextError::DoesNotExist,
            other => CdTextError::Transport(other),
        }
    }
}

/// View of one 18-byte pack
#[derive(Debug, Clone, Copy)]
pub struct Pack<'a>(&'a [u8]);

impl<'a> Pack<'a> {
    pub fn pack_type(&self) -> u8 {
        self.0[0]
    }

    /// Track the first payload character belongs to (0 = album)
    pub fn track_number(&self) -> u8 {
        self.0[1] & 0x7f
    }

    pub fn sequence(&self) -> u8 {
        self.0[2]
    }

    pub fn block_number(&self) -> u8 {
        (self.0[3] & 0b0111_0000) >> 4
    }

    pub fn char_position(&self) -> u8 {
        self.0[3] & 0x0f
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.0[PAYLOAD_START..PAYLOAD_START + PAYLOAD_LEN]
    }

    pub fn crc(&self) -> u16 {
        u16::from_be_bytes([self.0[CRC_START], self.0[CRC_START + 1]])
    }

    pub fn crc_ok(&self) -> bool {
        CD_TEXT_CRC.checksum(&self.0[..CRC_START]) == self.crc()
    }
}

fn packs(bytes: &[u8]) -> impl Iterator<Item = Pack<'_>> {
    bytes.chunks_exact(PACK_LEN).map(Pack)
}

/// A single byte widened to UTF-8 (1 or 2 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Seq {
    bytes: [u8; 2],
    len: usize,
}

impl Utf8Seq {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Transcode one ISO 8859-1 byte into UTF-8
pub fn to_utf8(c: u8) -> Utf8Seq {
    if c < 0x80 {
        Utf8Seq {
            bytes: [c, 0],
            len: 1,
        }
    } else {
        Utf8Seq {
            bytes: [0b1100_0000 | (c >> 6), 0b1000_0000 | (c & 0b0011_1111)],
            len: 2,
        }
    }
}

/// Text fields carried in CD-Text string pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Title,
    Performer,
    Songwriter,
    Composer,
    Arranger,
    Message,
}

impl TextField {
    fn pack_type(self) -> u8 {
        match self {
            TextField::Title => PACK_TYPE_TITLE,
            TextField::Performer => PACK_TYPE_PERFORMER,
            TextField::Songwriter => PACK_TYPE_SONGWRITER,
            TextField::Composer => PACK_TYPE_COMPOSER,
            TextField::Arranger => PACK_TYPE_ARRANGER,
            TextField::Message => PACK_TYPE_MESSAGE,
        }
    }
}

/// Track numbers covered by a block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackNumRange {
    pub first: u8,
    pub last: u8,
    pub count: u8,
}

impl TrackNumRange {
    pub fn new(first: u8, last: u8) -> Self {
        let count = if last >= first { last - first + 1 } else { 0 };
        Self { first, last, count }
    }

    fn index_of(&self, track: usize) -> Option<usize> {
        let first = usize::from(self.first);
        (self.count > 0 && track >= first && track < first + usize::from(self.count))
            .then(|| track - first)
    }
}

/// Block-wide settings from the size information packs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// 0x00 ISO 8859-1, 0x01 ASCII, 0x80 MS-JIS
    pub character_code: u8,
    pub copyright: u8,
    pub language_code: u8,
}

/// Title and artist of the album or of one track
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextRecord {
    pub title: String,
    pub artist: String,
}

/// Album entry and one entry per track for a single text field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldStrings {
    pub album: String,
    pub tracks: Vec<String>,
}

/// One decoded language block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    number: u8,
    range: TrackNumRange,
    info: BlockInfo,
    album: TextRecord,
    tracks: Vec<TextRecord>,
    #[serde(skip)]
    packs: Vec<u8>,
}

impl Block {
    fn build(number: u8, block_packs: &[u8]) -> Result<Self, CdTextError> {
        let mut packs = Vec::new();
        packs.try_reserve_exact(block_packs.len())?;
        packs.extend_from_slice(block_packs);

        let (range, info) = size_info(&packs, number);

        let titles = extract_strings(&packs, PACK_TYPE_TITLE, range)?;
        let artists = extract_strings(&packs, PACK_TYPE_PERFORMER, range)?;

        let mut tracks = Vec::new();
        tracks.try_reserve_exact(usize::from(range.count))?;
        tracks.extend(
            titles
                .tracks
                .into_iter()
                .zip(artists.tracks)
                .map(|(title, artist)| TextRecord { title, artist }),
        );

        Ok(Self {
            number,
            range,
            info,
            album: TextRecord {
                title: titles.album,
                artist: artists.album,
            },
            tracks,
            packs,
        })
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn range(&self) -> TrackNumRange {
        self.range
    }

    pub fn info(&self) -> BlockInfo {
        self.info
    }

    pub fn album(&self) -> &TextRecord {
        &self.album
    }

    /// Per-track records, exactly `range().count` long
    pub fn tracks(&self) -> &[TextRecord] {
        &self.tracks
    }

    pub fn track(&self, track_number: u8) -> Option<&TextRecord> {
        self.range
            .index_of(usize::from(track_number))
            .and_then(|i| self.tracks.get(i))
    }

    /// Extract any string-pool field of this block
    pub fn field(&self, field: TextField) -> Result<FieldStrings, CdTextError> {
        extract_strings(&self.packs, field.pack_type(), self.range)
    }
}

/// CD-Text packs as read from the disc, with the currently selected block
#[derive(Debug, Clone)]
pub struct CdText {
    packs: Vec<u8>,
    block: Option<Block>,
}

impl CdText {
    /// Decode a READ TOC format 0101b response
    pub fn from_response(response: &[u8]) -> Result<Self, CdTextError> {
        if response.len() < HEADER_LEN {
            return Err(CdTextError::DataEmpty);
        }

        let data_len = usize::from(u16::from_be_bytes([response[0], response[1]]));
        if data_len <= 2 {
            return Err(CdTextError::DataEmpty);
        }

        // Two reserved header bytes are counted by the length field
        let available = response.len() - HEADER_LEN;
        let packs_len = (data_len - 2).min(available);
        let packs_len = packs_len - packs_len % PACK_LEN;
        if packs_len == 0 {
            return Err(CdTextError::DataEmpty);
        }
        if data_len - 2 > available {
            warn!(
                "CD-Text length {} exceeds the {} bytes returned, truncating",
                data_len - 2,
                available
            );
        }

        let mut packs = Vec::new();
        packs.try_reserve_exact(packs_len)?;
        packs.extend_from_slice(&response[HEADER_LEN..HEADER_LEN + packs_len]);

        debug!("CD-Text: {} packs", packs_len / PACK_LEN);
        Ok(Self { packs, block: None })
    }

    pub fn pack_count(&self) -> usize {
        self.packs.len() / PACK_LEN
    }

    pub fn packs(&self) -> impl Iterator<Item = Pack<'_>> {
        packs(&self.packs)
    }

    /// Block numbers present, in the order they appear
    pub fn block_numbers(&self) -> Vec<u8> {
        let mut numbers: Vec<u8> = Vec::new();
        for pack in self.packs() {
            if !numbers.contains(&pack.block_number()) {
                numbers.push(pack.block_number());
            }
        }
        numbers
    }

    /// Check every pack's CRC
    pub fn verify_checksums(&self) -> Result<(), CdTextError> {
        match self.packs().position(|pack| !pack.crc_ok()) {
            Some(index) => Err(CdTextError::ChecksumMismatch { index }),
            None => Ok(()),
        }
    }

    /// Select and decode block `number`
    ///
    /// On error the previously selected block is kept.
    pub fn select_block(&mut self, number: u8) -> Result<&Block, CdTextError> {
        if number > MAX_BLOCK {
            return Err(CdTextError::BlockNumberOutOfRange(number));
        }

        let range = find_block(&self.packs, number).ok_or(CdTextError::BlockNotFound(number))?;
        let block = Block::build(number, &self.packs[range])?;

        info!(
            "Selected CD-Text block {}: tracks {}-{}",
            number, block.range.first, block.range.last
        );
        Ok(self.block.insert(block))
    }

    pub fn block(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    pub fn album(&self) -> Option<&TextRecord> {
        self.block.as_ref().map(Block::album)
    }

    pub fn track_title(&self, track_number: u8) -> Option<&str> {
        self.block
            .as_ref()
            .and_then(|b| b.track(track_number))
            .map(|t| t.title.as_str())
    }

    pub fn track_artist(&self, track_number: u8) -> Option<&str> {
        self.block
            .as_ref()
            .and_then(|b| b.track(track_number))
            .map(|t| t.artist.as_str())
    }
}

/// Read CD-Text and select `default_block`
pub fn read_cd_text<D: ScsiDevice>(
    transport: &mut Transport<D>,
    timeout_ms: u32,
    default_block: u8,
) -> Result<CdText, CdTextError> {
    let mut response = Vec::new();
    response.try_reserve_exact(CD_TEXT_ALLOCATION_LEN)?;
    response.resize(CD_TEXT_ALLOCATION_LEN, 0);

    let cdb = cdb::read_toc(TOC_FORMAT_CD_TEXT, CD_TEXT_ALLOCATION_LEN as u16);
    let transferred = transport.execute(&cdb, Direction::FromDevice, &mut response, timeout_ms)?;
    debug!("READ TOC (CD-Text) transferred {} bytes", transferred);

    let mut text = CdText::from_response(&response)?;
    text.select_block(default_block)?;
    Ok(text)
}

/// Byte range of the first contiguous run of packs in block `number`
fn find_block(bytes: &[u8], number: u8) -> Option<Range<usize>> {
    let mut start = None;
    let mut len = 0;
    for (i, pack) in packs(bytes).enumerate() {
        let matches = pack.block_number() == number;
        match (start, matches) {
            (None, true) => {
                start = Some(i * PACK_LEN);
                len = PACK_LEN;
            }
            (Some(_), true) => len += PACK_LEN,
            // Blocks are contiguous
            (Some(_), false) => break,
            (None, false) => {}
        }
    }
    start.map(|s| s..s + len)
}

fn size_info(bytes: &[u8], number: u8) -> (TrackNumRange, BlockInfo) {
    let mut range = None;
    let mut info = BlockInfo::default();

    for pack in packs(bytes).filter(|p| p.pack_type() == PACK_TYPE_SIZE_INFO) {
        let payload = pack.payload();
        match pack.track_number() {
            0 if range.is_none() => {
                info.character_code = payload[0];
                info.copyright = payload[3];
                range = Some(TrackNumRange::new(payload[1], payload[2]));
            }
            2 => info.language_code = payload[4 + usize::from(number)],
            _ => {}
        }
    }

    let range = range.unwrap_or_else(|| {
        warn!("CD-Text block {} has no size information pack", number);
        TrackNumRange::default()
    });
    (range, info)
}

/// Split the string pool of `pack_type` into the album entry and
/// `range.count` track entries
///
/// The pack's track number byte names the entry its first character belongs
/// to, so entry 0 is always the album. Each NUL ends the current entry and
/// moves to the next one; the entry after the album is the block's first
/// track. Entries that never receive a terminated string are left empty.
fn extract_strings(
    bytes: &[u8],
    pack_type: u8,
    range: TrackNumRange,
) -> Result<FieldStrings, CdTextError> {
    let mut pool = StringPool::new(pack_type, range)?;
    let mut current: Vec<u8> = Vec::new();
    let mut entry = ALBUM_TRACK;
    let first_track = usize::from(range.first.max(1));

    for pack in packs(bytes).filter(|p| p.pack_type() == pack_type) {
        let pack_track = usize::from(pack.track_number());
        if current.is_empty() || pack_track != entry {
            // An unterminated string cut off by a new entry is dropped
            current.clear();
            entry = pack_track;
        }

        for &c in pack.payload() {
            if c == 0 {
                pool.finish(entry, &current)?;
                current.clear();
                entry = if entry == ALBUM_TRACK {
                    first_track
                } else {
                    entry + 1
                };
            } else {
                let seq = to_utf8(c);
                current.try_reserve(seq.as_bytes().len())?;
                current.extend_from_slice(seq.as_bytes());
            }
        }
    }

    Ok(pool.into_strings())
}

struct StringPool {
    pack_type: u8,
    range: TrackNumRange,
    album: Option<String>,
    tracks: Vec<Option<String>>,
}

impl StringPool {
    fn new(pack_type: u8, range: TrackNumRange) -> Result<Self, CdTextError> {
        let mut tracks = Vec::new();
        tracks.try_reserve_exact(usize::from(range.count))?;
        tracks.resize(usize::from(range.count), None);
        Ok(Self {
            pack_type,
            range,
            album: None,
            tracks,
        })
    }

    fn finish(&mut self, entry: usize, bytes: &[u8]) -> Result<(), CdTextError> {
        if entry == ALBUM_TRACK {
            if self.album.as_deref().map_or(true, str::is_empty) {
                self.album = Some(String::from_utf8_lossy(bytes).into_owned());
            }
            return Ok(());
        }

        let Some(index) = self.range.index_of(entry) else {
            // Trailing NUL padding produces empty entries past the last track
            if bytes.is_empty() {
                return Ok(());
            }
            return Err(CdTextError::TooManyStrings {
                pack_type: self.pack_type,
                track: entry,
            });
        };

        let value = if bytes == REPEAT_PREVIOUS {
            match index {
                0 => self.album.clone().unwrap_or_default(),
                _ => self.tracks[index - 1].clone().unwrap_or_default(),
            }
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        };

        let slot = &mut self.tracks[index];
        if slot.as_deref().map_or(true, str::is_empty) {
            *slot = Some(value);
        }
        Ok(())
    }

    fn into_strings(self) -> FieldStrings {
        FieldStrings {
            album: self.album.unwrap_or_default(),
            tracks: self
                .tracks
                .into_iter()
                .map(Option::unwrap_or_default)
                .collect(),
        }
    }
}
