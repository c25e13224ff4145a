// Test support utilities for both unit and integration tests

use crate::cd::cdb::READ_CD;
use crate::cd::cdtext::PACK_LEN;
use crate::cd::transport::{Direction, ScsiDevice, ScsiStatus};
use crate::cd::SECTOR_SIZE;
use crate::playback::sink::{PcmSink, SinkError, CD_SAMPLE_RATE};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

/// Fixed-format sense: ILLEGAL REQUEST, LBA out of range
const SENSE_LBA_OUT_OF_RANGE: [u8; 14] = [
    0x70, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x21, 0x00,
];
/// Fixed-format sense: MEDIUM ERROR, unrecovered read error
const SENSE_MEDIUM_ERROR: [u8; 14] = [
    0x70, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x11, 0x00,
];

enum MockResponse {
    Data(Vec<u8>),
    Sense(Vec<u8>),
    IoError,
}

/// Mock SCSI device for testing
///
/// Answers queued responses in order. With a synthetic disc attached, READ CD
/// commands are answered from [`synthetic_sector`] instead of the queue.
pub struct MockScsiDevice {
    responses: VecDeque<MockResponse>,
    leadout: Option<u32>,
    fail_at: Option<u32>,
    short_at: Option<u32>,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Default for MockScsiDevice {
    fn default() -> Self {
        MockScsiDevice {
            responses: VecDeque::new(),
            leadout: None,
            fail_at: None,
            short_at: None,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockScsiDevice {
    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    /// A device whose READ CD commands return audio up to `leadout`
    pub fn with_disc(leadout: u32) -> Self {
        Self {
            leadout: Some(leadout),
            ..Self::default()
        }
    }

    /// Make any READ CD covering `lba` fail with a medium error
    pub fn fail_read_at(&mut self, lba: u32) {
        self.fail_at = Some(lba);
    }

    /// Make any READ CD covering `lba` stop transferring at `lba`, without sense
    pub fn short_read_at(&mut self, lba: u32) {
        self.short_at = Some(lba);
    }

    pub fn push_data(&mut self, data: Vec<u8>) {
        self.responses.push_back(MockResponse::Data(data));
    }

    pub fn push_sense(&mut self, sense: Vec<u8>) {
        self.responses.push_back(MockResponse::Sense(sense));
    }

    pub fn push_io_error(&mut self) {
        self.responses.push_back(MockResponse::IoError);
    }

    /// Every CDB executed so far, shared with the device
    pub fn command_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.log)
    }

    fn read_disc(&self, leadout: u32, cdb: &[u8], data: &mut [u8]) -> Result<usize, Vec<u8>> {
        let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]);
        let count = u32::from_be_bytes([0, cdb[6], cdb[7], cdb[8]]);
        let end = lba.saturating_add(count);

        if end > leadout {
            return Err(SENSE_LBA_OUT_OF_RANGE.to_vec());
        }
        if self.fail_at.is_some_and(|bad| (lba..end).contains(&bad)) {
            return Err(SENSE_MEDIUM_ERROR.to_vec());
        }

        let delivered = match self.short_at {
            Some(stop) if (lba..end).contains(&stop) => stop - lba,
            _ => count,
        };

        let mut written = 0;
        for (i, sector) in data.chunks_exact_mut(SECTOR_SIZE).take(delivered as usize).enumerate() {
            sector.copy_from_slice(&synthetic_sector(lba + i as u32));
            written += SECTOR_SIZE;
        }
        Ok(written)
    }
}

impl ScsiDevice for MockScsiDevice {
    fn execute(
        &mut self,
        cdb: &[u8],
        _direction: Direction,
        data: &mut [u8],
        sense: &mut [u8],
        _timeout_ms: u32,
    ) -> io::Result<ScsiStatus> {
        self.log.lock().unwrap().push(cdb.to_vec());

        if let (Some(leadout), Some(&READ_CD)) = (self.leadout, cdb.first()) {
            return Ok(match self.read_disc(leadout, cdb, data) {
                Ok(transferred) => ScsiStatus {
                    transferred,
                    ..ScsiStatus::default()
                },
                Err(bytes) => sense_status(&bytes, sense),
            });
        }

        match self.responses.pop_front() {
            Some(MockResponse::Data(bytes)) => {
                let n = bytes.len().min(data.len());
                data[..n].copy_from_slice(&bytes[..n]);
                Ok(ScsiStatus {
                    transferred: n,
                    ..ScsiStatus::default()
                })
            }
            Some(MockResponse::Sense(bytes)) => Ok(sense_status(&bytes, sense)),
            Some(MockResponse::IoError) => Err(io::Error::other("mock SG_IO failure")),
            None => Err(io::Error::other("no scripted response")),
        }
    }
}

fn sense_status(bytes: &[u8], sense: &mut [u8]) -> ScsiStatus {
    let n = bytes.len().min(sense.len());
    sense[..n].copy_from_slice(&bytes[..n]);
    ScsiStatus {
        sense_len: n,
        // CHECK CONDITION
        status: 0x02,
        ..ScsiStatus::default()
    }
}

/// Deterministic audio content for one sector
pub fn synthetic_sector(lba: u32) -> Vec<u8> {
    (0..SECTOR_SIZE)
        .map(|i| (lba as usize * 7 + i) as u8)
        .collect()
}

/// Build a READ TOC response padded to the full TOC allocation
///
/// `tracks` holds `(number, start_lba, control)` entries.
pub fn toc_response(first: u8, last: u8, tracks: &[(u8, u32, u8)], leadout: u32) -> Vec<u8> {
    let mut descriptors: Vec<(u8, u32, u8)> = tracks.to_vec();
    descriptors.push((crate::cd::toc::LEADOUT_TRACK, leadout, 0));

    let data_len = (2 + descriptors.len() * 8) as u16;
    let mut response = Vec::with_capacity(crate::cd::toc::TOC_ALLOCATION_LEN);
    response.extend_from_slice(&data_len.to_be_bytes());
    response.push(first);
    response.push(last);
    for (number, lba, control) in descriptors {
        response.push(0);
        // ADR 1: Q sub-channel encodes current position
        response.push(0x10 | (control & 0x0f));
        response.push(number);
        response.push(0);
        response.extend_from_slice(&lba.to_be_bytes());
    }
    response.resize(crate::cd::toc::TOC_ALLOCATION_LEN, 0);
    response
}

/// Build one CD-Text pack with a valid CRC
///
/// `payload` is zero-padded to 12 bytes.
pub fn text_pack(
    pack_type: u8,
    track: u8,
    sequence: u8,
    block: u8,
    char_position: u8,
    payload: &[u8],
) -> [u8; PACK_LEN] {
    let mut pack = [0u8; PACK_LEN];
    pack[0] = pack_type;
    pack[1] = track;
    pack[2] = sequence;
    pack[3] = ((block & 0x07) << 4) | (char_position & 0x0f);
    let n = payload.len().min(12);
    pack[4..4 + n].copy_from_slice(&payload[..n]);
    let crc = crc::Crc::<u16>::new(&crc::CRC_16_GSM).checksum(&pack[..16]);
    pack[16..].copy_from_slice(&crc.to_be_bytes());
    pack
}

/// Lay out a string pool (album first, then tracks 1..) across packs
pub fn text_packs(pack_type: u8, block: u8, strings: &[&str]) -> Vec<[u8; PACK_LEN]> {
    numbered_text_packs(pack_type, block, 1, strings)
}

/// Lay out a string pool whose tracks start at `first_track`
pub fn numbered_text_packs(
    pack_type: u8,
    block: u8,
    first_track: u8,
    strings: &[&str],
) -> Vec<[u8; PACK_LEN]> {
    // (byte, owning entry, position within that entry's string) for every pool byte
    let mut pool: Vec<(u8, u8, usize)> = Vec::new();
    for (i, s) in strings.iter().enumerate() {
        let entry = if i == 0 { 0 } else { first_track + i as u8 - 1 };
        let bytes = s.as_bytes();
        for (pos, &b) in bytes.iter().chain(std::iter::once(&0u8)).enumerate() {
            pool.push((b, entry as u8, pos));
        }
    }

    pool.chunks(12)
        .enumerate()
        .map(|(seq, chunk)| {
            let (_, entry, pos) = chunk[0];
            let payload: Vec<u8> = chunk.iter().map(|(b, _, _)| *b).collect();
            text_pack(
                pack_type,
                entry,
                seq as u8,
                block,
                pos.min(15) as u8,
                &payload,
            )
        })
        .collect()
}

/// The three size information packs of a block
///
/// Character code ISO 8859-1, language code 0x09 (English) for every block.
pub fn size_info_packs(block: u8, first_track: u8, last_track: u8) -> Vec<[u8; PACK_LEN]> {
    let first = [0x00, first_track, last_track, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];
    let third = [0, 0, 0, 0, 0x09, 0x09, 0x09, 0x09, 0x09, 0x09, 0x09, 0x09];
    vec![
        text_pack(0x8f, 0, 0, block, 0, &first),
        text_pack(0x8f, 1, 1, block, 0, &[0; 12]),
        text_pack(0x8f, 2, 2, block, 0, &third),
    ]
}

/// Wrap packs in a READ TOC format 0101b response header
pub fn cd_text_response(packs: &[[u8; PACK_LEN]]) -> Vec<u8> {
    let data_len = (2 + packs.len() * PACK_LEN) as u16;
    let mut response = Vec::with_capacity(4 + packs.len() * PACK_LEN);
    response.extend_from_slice(&data_len.to_be_bytes());
    response.extend_from_slice(&[0, 0]);
    for pack in packs {
        response.extend_from_slice(pack);
    }
    response
}

/// One scripted reaction of [`MockSink`]
#[derive(Debug, Clone, Copy)]
pub enum SinkStep {
    /// Accept at most this many frames
    Accept(usize),
    Fail(SinkError),
}

/// Recording PCM sink
///
/// Follows its script, then accepts everything. Written bytes and requested
/// frame counts are shared so they can be inspected after the sink is moved.
pub struct MockSink {
    transfer_frames: usize,
    sample_rate: u32,
    script: VecDeque<SinkStep>,
    written: Arc<Mutex<Vec<u8>>>,
    requests: Arc<Mutex<Vec<usize>>>,
    resumes: Arc<Mutex<usize>>,
}

impl MockSink {
    pub fn new(transfer_frames: usize) -> Self {
        Self {
            transfer_frames,
            sample_rate: CD_SAMPLE_RATE,
            script: VecDeque::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            resumes: Arc::new(Mutex::new(0)),
        }
    }

    pub fn push_step(&mut self, step: SinkStep) {
        self.script.push_back(step);
    }

    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }

    /// Frame counts passed to each write call
    pub fn requests(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.requests)
    }

    pub fn resumes(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.resumes)
    }
}

impl PcmSink for MockSink {
    fn transfer_frames(&self) -> usize {
        self.transfer_frames
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write_frames(&mut self, data: &[u8], frames: usize) -> Result<usize, SinkError> {
        self.requests.lock().unwrap().push(frames);
        let accepted = match self.script.pop_front() {
            Some(SinkStep::Fail(e)) => return Err(e),
            Some(SinkStep::Accept(n)) => n.min(frames),
            None => frames,
        };
        self.written
            .lock()
            .unwrap()
            .extend_from_slice(&data[..accepted * 4]);
        Ok(accepted)
    }

    fn resume(&mut self) -> Result<(), SinkError> {
        *self.resumes.lock().unwrap() += 1;
        Ok(())
    }
}
