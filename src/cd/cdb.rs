//! Command Descriptor Block builders
//!
//! Layouts follow MMC-3: READ TOC/PMA/ATIP (6.25) and READ CD (6.19).

/// READ TOC/PMA/ATIP operation code
pub const READ_TOC: u8 = 0x43;
/// READ CD operation code
pub const READ_CD: u8 = 0xbe;

/// READ TOC format: formatted table of contents
pub const TOC_FORMAT_NORMAL: u8 = 0x00;
/// READ TOC format: CD-Text
pub const TOC_FORMAT_CD_TEXT: u8 = 0x05;

/// READ CD expected sector type: CD-DA (bits 4..2 = 001b)
const SECTOR_TYPE_CDDA: u8 = 0b001 << 2;
/// READ CD byte 9: user data only
const RETURN_USER_DATA: u8 = 0x10;

/// Largest value the 3-byte transfer length field can carry
pub const MAX_TRANSFER_LENGTH: u32 = 0x00ff_ffff;

/// 10-byte READ TOC/PMA/ATIP
///
/// Addresses are requested as LBA (MSF bit clear) and the starting track is 0,
/// so the whole table is returned.
pub fn read_toc(format: u8, allocation_length: u16) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = READ_TOC;
    cdb[2] = format & 0x0f;
    cdb[7..9].copy_from_slice(&allocation_length.to_be_bytes());
    cdb
}

/// 12-byte READ CD for CD-DA sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCd([u8; 12]);

impl ReadCd {
    pub fn new() -> Self {
        let mut cdb = [0u8; 12];
        cdb[0] = READ_CD;
        cdb[1] = SECTOR_TYPE_CDDA;
        cdb[9] = RETURN_USER_DATA;
        Self(cdb)
    }

    /// Rewrite the starting logical block address (bytes 2..6)
    pub fn set_start_lba(&mut self, lba: u32) -> &mut Self {
        self.0[2..6].copy_from_slice(&lba.to_be_bytes());
        self
    }

    /// Rewrite the transfer length in sectors (bytes 6..9)
    ///
    /// The field is 3 bytes wide; larger values saturate.
    pub fn set_transfer_length(&mut self, sectors: u32) -> &mut Self {
        let sectors = sectors.min(MAX_TRANSFER_LENGTH);
        self.0[6..9].copy_from_slice(&sectors.to_be_bytes()[1..]);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Default for ReadCd {
    fn default() -> Self {
        Self::new()
    }
}
