//! CD drive access module
//!
//! Talks to an optical drive through the SCSI generic (SG_IO) interface:
//! reads the table of contents, decodes CD-Text and streams raw CD-DA sectors.

pub mod cdb;
pub mod cdtext;
pub mod ffi;
pub mod reader;
pub mod toc;
pub mod transport;

pub use cdtext::{
    read_cd_text, Block, BlockInfo, CdText, CdTextError, FieldStrings, TextField, TextRecord,
    TrackNumRange,
};
pub use reader::{AudioChunk, AudioCursor, AudioReadError, AudioReader};
pub use toc::{read_toc, Toc, TocError, TrackControl, TrackDescriptor};
pub use transport::{Direction, ScsiDevice, ScsiStatus, SenseData, Transport, TransportError};

/// Size of one raw CD-DA sector in bytes
pub const SECTOR_SIZE: usize = 2352;

/// Bytes per frame: two channels of 16-bit samples
pub const BYTES_PER_FRAME: usize = 4;

/// Sectors per second of CD audio
pub const SECTORS_PER_SECOND: u32 = 75;

/// Lead-in offset between LBA 0 and MSF 00:02:00
pub const LEAD_IN_SECTORS: u32 = 150;
