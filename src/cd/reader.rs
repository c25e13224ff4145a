//! Raw CD-DA sector streaming
//!
//! Large reads are split into short READ CD batches because drives reject
//! transfers much over 64 KiB.

use crate::cd::cdb::ReadCd;
use crate::cd::transport::{Direction, ScsiDevice, Transport, TransportError};
use crate::cd::{BYTES_PER_FRAME, SECTOR_SIZE};
use std::collections::TryReserveError;
use thiserror::Error;
use tracing::{debug, warn};

/// 27 sectors (63,504 bytes) stay below the 64 KiB transfer limit
pub const DEFAULT_BATCH_SECTORS: u32 = 27;

#[derive(Debug, Error)]
pub enum AudioReadError {
    #[error("Start sector {start} is not before the lead-out at {leadout}")]
    StartBeyondLeadout { start: u32, leadout: u32 },
    #[error("READ CD of {sectors} sectors at LBA {lba} failed: {source}")]
    Batch {
        lba: u32,
        sectors: u32,
        #[source]
        source: TransportError,
    },
    #[error("READ CD at LBA {lba} transferred {transferred} of {expected} bytes")]
    ShortTransfer {
        lba: u32,
        expected: usize,
        transferred: usize,
    },
    #[error("Failed to allocate audio buffer: {0}")]
    AllocationFailed(#[from] TryReserveError),
}

/// Raw audio for a contiguous run of sectors
///
/// The buffer is kept across reads so one chunk can be refilled repeatedly.
#[derive(Debug, Clone, Default)]
pub struct AudioChunk {
    data: Vec<u8>,
    start_sector: u32,
    sectors: u32,
    leadout_reached: bool,
}

impl AudioChunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate room for `sectors` sectors
    pub fn with_capacity(sectors: u32) -> Result<Self, AudioReadError> {
        let mut data = Vec::new();
        data.try_reserve_exact(sectors as usize * SECTOR_SIZE)?;
        Ok(Self {
            data,
            ..Self::default()
        })
    }

    /// Interleaved 16-bit little-endian stereo samples
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn start_sector(&self) -> u32 {
        self.start_sector
    }

    pub fn sector_count(&self) -> u32 {
        self.sectors
    }

    /// First sector after this chunk
    pub fn end_sector(&self) -> u32 {
        self.start_sector + self.sectors
    }

    /// No further reads past this chunk are valid
    pub fn leadout_reached(&self) -> bool {
        self.leadout_reached
    }

    pub fn frames(&self) -> usize {
        self.data.len() / BYTES_PER_FRAME
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop the contents, keeping the allocation
    pub fn clear(&mut self) {
        self.data.clear();
        self.sectors = 0;
        self.leadout_reached = false;
    }

    fn prepare(&mut self, start_sector: u32, sectors: u32) -> Result<(), AudioReadError> {
        self.clear();
        let len = sectors as usize * SECTOR_SIZE;
        self.data.try_reserve_exact(len)?;
        self.data.resize(len, 0);
        self.start_sector = start_sector;
        Ok(())
    }
}

/// Reads CD-DA sectors in bounded batches
#[derive(Debug, Clone, Copy)]
pub struct AudioReader {
    batch_sectors: u32,
    timeout_ms: u32,
}

impl AudioReader {
    pub fn new(batch_sectors: u32, timeout_ms: u32) -> Self {
        Self {
            batch_sectors: batch_sectors.max(1),
            timeout_ms,
        }
    }

    pub fn batch_sectors(&self) -> u32 {
        self.batch_sectors
    }

    /// Read up to `sector_count` sectors starting at `start_sector`
    ///
    /// A request that reaches the lead-out is clamped to end exactly there and
    /// the chunk is flagged `leadout_reached`.
    pub fn read_audio<D: ScsiDevice>(
        &self,
        transport: &mut Transport<D>,
        start_sector: u32,
        leadout_sector: u32,
        sector_count: u32,
    ) -> Result<AudioChunk, AudioReadError> {
        let mut chunk = AudioChunk::new();
        self.read_into(
            transport,
            start_sector,
            leadout_sector,
            sector_count,
            &mut chunk,
        )?;
        Ok(chunk)
    }

    /// Like [`read_audio`](Self::read_audio), refilling an existing chunk
    ///
    /// On error the chunk is left empty.
    pub fn read_into<D: ScsiDevice>(
        &self,
        transport: &mut Transport<D>,
        start_sector: u32,
        leadout_sector: u32,
        sector_count: u32,
        chunk: &mut AudioChunk,
    ) -> Result<(), AudioReadError> {
        chunk.clear();
        if start_sector >= leadout_sector {
            return Err(AudioReadError::StartBeyondLeadout {
                start: start_sector,
                leadout: leadout_sector,
            });
        }

        let (sectors, leadout_reached) =
            if start_sector.saturating_add(sector_count) >= leadout_sector {
                (leadout_sector - start_sector, true)
            } else {
                (sector_count, false)
            };

        chunk.prepare(start_sector, sectors)?;

        let mut cdb = ReadCd::new();
        let mut lba = start_sector;
        let mut remaining = sectors;
        let mut offset = 0;

        while remaining > 0 {
            let batch = remaining.min(self.batch_sectors);
            let len = batch as usize * SECTOR_SIZE;
            cdb.set_start_lba(lba).set_transfer_length(batch);

            let result = transport.execute(
                cdb.as_bytes(),
                Direction::FromDevice,
                &mut chunk.data[offset..offset + len],
                self.timeout_ms,
            );
            let transferred = match result {
                Ok(n) => n,
                Err(source) => {
                    chunk.clear();
                    return Err(AudioReadError::Batch {
                        lba,
                        sectors: batch,
                        source,
                    });
                }
            };
            if transferred < len {
                warn!(
                    "READ CD at LBA {} returned {} of {} bytes",
                    lba, transferred, len
                );
                chunk.clear();
                return Err(AudioReadError::ShortTransfer {
                    lba,
                    expected: len,
                    transferred,
                });
            }

            lba += batch;
            remaining -= batch;
            offset += len;
        }

        chunk.sectors = sectors;
        chunk.leadout_reached = leadout_reached;
        debug!(
            "Read {} sectors at LBA {}{}",
            sectors,
            start_sector,
            if leadout_reached { " (lead-out reached)" } else { "" }
        );
        Ok(())
    }
}

impl Default for AudioReader {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SECTORS, 5000)
    }
}

/// Moving read position from a start sector up to the lead-out
#[derive(Debug, Clone)]
pub struct AudioCursor {
    position: u32,
    leadout_sector: u32,
    chunk_sectors: u32,
    finished: bool,
}

impl AudioCursor {
    pub fn new(
        start_sector: u32,
        leadout_sector: u32,
        chunk_sectors: u32,
    ) -> Result<Self, AudioReadError> {
        if start_sector >= leadout_sector {
            return Err(AudioReadError::StartBeyondLeadout {
                start: start_sector,
                leadout: leadout_sector,
            });
        }
        Ok(Self {
            position: start_sector,
            leadout_sector,
            chunk_sectors: chunk_sectors.max(1),
            finished: false,
        })
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn leadout_sector(&self) -> u32 {
        self.leadout_sector
    }

    pub fn remaining_sectors(&self) -> u32 {
        self.leadout_sector.saturating_sub(self.position)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fill `chunk` with the next run of sectors
    ///
    /// Returns `Ok(false)` once the lead-out has been delivered. A failed read
    /// leaves the position unchanged.
    pub fn next_chunk<D: ScsiDevice>(
        &mut self,
        reader: &AudioReader,
        transport: &mut Transport<D>,
        chunk: &mut AudioChunk,
    ) -> Result<bool, AudioReadError> {
        if self.finished {
            chunk.clear();
            return Ok(false);
        }

        reader.read_into(
            transport,
            self.position,
            self.leadout_sector,
            self.chunk_sectors,
            chunk,
        )?;
        self.position = chunk.end_sector();
        self.finished = chunk.leadout_reached();
        Ok(true)
    }
}
