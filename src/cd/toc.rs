//! Table of Contents reading and decoding

use crate::cd::cdb::{self, TOC_FORMAT_NORMAL};
use crate::cd::transport::{Direction, ScsiDevice, Transport, TransportError};
use crate::cd::{LEAD_IN_SECTORS, SECTORS_PER_SECOND};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// Track number of the lead-out descriptor
pub const LEADOUT_TRACK: u8 = 0xaa;

const MAX_TRACKS: usize = 99;
const HEADER_LEN: usize = 4;
const DESCRIPTOR_LEN: usize = 8;

/// 99 tracks plus the lead-out marker
pub const TOC_ALLOCATION_LEN: usize = (MAX_TRACKS + 1) * DESCRIPTOR_LEN + HEADER_LEN;

#[derive(Debug, Error)]
pub enum TocError {
    #[error("TOC contains no track descriptors")]
    NoData,
    #[error("TOC needs {needed} bytes but only {allocated} were allocated")]
    BufferTooSmall { needed: usize, allocated: usize },
    #[error("TOC has no lead-out descriptor")]
    MissingLeadout,
    #[error("Inconsistent TOC: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The 4-bit control field of a track descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TrackControl(u8);

impl TrackControl {
    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_audio(self) -> bool {
        self.0 & 0x04 == 0
    }

    pub fn copy_permitted(self) -> bool {
        self.0 & 0x02 != 0
    }

    /// Audio only; for data tracks this bit means incremental recording
    pub fn pre_emphasis(self) -> bool {
        self.is_audio() && self.0 & 0x01 != 0
    }

    pub fn four_channel(self) -> bool {
        self.is_audio() && self.0 & 0x08 != 0
    }
}

/// One track entry from the TOC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackDescriptor {
    pub number: u8,
    pub start_sector: u32,
    pub control: TrackControl,
    pub adr: u8,
}

impl TrackDescriptor {
    fn decode(raw: &[u8]) -> Self {
        Self {
            control: TrackControl(raw[1] & 0x0f),
            adr: raw[1] >> 4,
            number: raw[2],
            start_sector: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    /// Start position as (minute, second, frame), including the 2 second lead-in
    pub fn start_msf(&self) -> (u8, u8, u8) {
        lba_to_msf(self.start_sector)
    }
}

/// Table of Contents read from the disc
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toc {
    first_track: u8,
    last_track: u8,
    leadout_sector: u32,
    tracks: Vec<TrackDescriptor>,
}

impl Toc {
    /// Decode a READ TOC (format 0000b) response
    ///
    /// `response` is the whole allocation handed to the device; its length is
    /// the allocation length.
    pub fn decode(response: &[u8]) -> Result<Self, TocError> {
        if response.len() < HEADER_LEN {
            return Err(TocError::NoData);
        }

        let data_len = usize::from(u16::from_be_bytes([response[0], response[1]]));
        if data_len <= 2 {
            return Err(TocError::NoData);
        }

        // The length field does not count itself
        let total_len = data_len + 2;
        if total_len > response.len() {
            return Err(TocError::BufferTooSmall {
                needed: total_len,
                allocated: response.len(),
            });
        }

        let first_track = response[2];
        let last_track = response[3];

        let mut tracks = Vec::with_capacity(MAX_TRACKS);
        let mut leadout = None;
        for raw in response[HEADER_LEN..total_len].chunks_exact(DESCRIPTOR_LEN) {
            let descriptor = TrackDescriptor::decode(raw);
            if descriptor.number == LEADOUT_TRACK {
                leadout = Some(descriptor.start_sector);
            } else {
                tracks.push(descriptor);
            }
        }

        if tracks.is_empty() {
            return Err(TocError::NoData);
        }
        let leadout_sector = leadout.ok_or(TocError::MissingLeadout)?;

        let toc = Self {
            first_track,
            last_track,
            leadout_sector,
            tracks,
        };
        toc.validate()?;
        Ok(toc)
    }

    fn validate(&self) -> Result<(), TocError> {
        if self.last_track < self.first_track {
            return Err(TocError::Inconsistent(format!(
                "last track {} precedes first track {}",
                self.last_track, self.first_track
            )));
        }

        let expected = usize::from(self.last_track - self.first_track) + 1;
        if expected != self.tracks.len() {
            return Err(TocError::Inconsistent(format!(
                "header names tracks {}-{} but {} descriptors were returned",
                self.first_track,
                self.last_track,
                self.tracks.len()
            )));
        }

        for (i, track) in self.tracks.iter().enumerate() {
            if self.tracks[..i].iter().any(|t| t.number == track.number) {
                return Err(TocError::Inconsistent(format!(
                    "track {} listed twice",
                    track.number
                )));
            }
            if track.start_sector >= self.leadout_sector {
                return Err(TocError::Inconsistent(format!(
                    "track {} starts at {} which is not before the lead-out at {}",
                    track.number, track.start_sector, self.leadout_sector
                )));
            }
        }

        Ok(())
    }

    pub fn first_track(&self) -> u8 {
        self.first_track
    }

    pub fn last_track(&self) -> u8 {
        self.last_track
    }

    pub fn track_count(&self) -> u8 {
        self.last_track - self.first_track + 1
    }

    pub fn leadout_sector(&self) -> u32 {
        self.leadout_sector
    }

    /// Tracks in on-disc order, lead-out excluded
    pub fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    pub fn track(&self, number: u8) -> Option<&TrackDescriptor> {
        self.tracks.iter().find(|t| t.number == number)
    }

    /// Number of sectors from the track's start to the next track or the lead-out
    pub fn track_sectors(&self, number: u8) -> Option<u32> {
        let index = self.tracks.iter().position(|t| t.number == number)?;
        let end = self
            .tracks
            .get(index + 1)
            .map(|t| t.start_sector)
            .unwrap_or(self.leadout_sector);
        Some(end.saturating_sub(self.tracks[index].start_sector))
    }

    /// Total disc length in seconds
    pub fn total_seconds(&self) -> u32 {
        self.leadout_sector / SECTORS_PER_SECOND
    }
}

/// Read and decode the full table of contents
pub fn read_toc<D: ScsiDevice>(
    transport: &mut Transport<D>,
    timeout_ms: u32,
) -> Result<Toc, TocError> {
    let mut response = vec![0u8; TOC_ALLOCATION_LEN];
    let cdb = cdb::read_toc(TOC_FORMAT_NORMAL, TOC_ALLOCATION_LEN as u16);

    let transferred = transport.execute(&cdb, Direction::FromDevice, &mut response, timeout_ms)?;
    debug!("READ TOC transferred {} bytes", transferred);

    let toc = Toc::decode(&response)?;
    info!(
        "TOC: tracks {}-{}, lead-out at LBA {}",
        toc.first_track, toc.last_track, toc.leadout_sector
    );
    Ok(toc)
}

/// Convert an absolute LBA into (minute, second, frame)
pub fn lba_to_msf(lba: u32) -> (u8, u8, u8) {
    let total = lba.saturating_add(LEAD_IN_SECTORS);
    let frames = total % SECTORS_PER_SECOND;
    let seconds = (total / SECTORS_PER_SECOND) % 60;
    let minutes = total / (SECTORS_PER_SECOND * 60);
    (minutes.min(u32::from(u8::MAX)) as u8, seconds as u8, frames as u8)
}
