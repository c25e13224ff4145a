//! Command transport: one CDB in, one classified outcome out

use crate::cd::ffi::SgDevice;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Largest sense buffer the sg driver will fill
pub const MAX_SENSE_LEN: usize = 0xff;

/// Data transfer direction of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    FromDevice,
}

/// What the device boundary reports for a completed call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScsiStatus {
    /// Bytes actually moved into the data buffer
    pub transferred: usize,
    /// Bytes of sense data written
    pub sense_len: usize,
    pub status: u8,
    pub host_status: u16,
    pub driver_status: u16,
}

/// A device that accepts SCSI command descriptor blocks
pub trait ScsiDevice {
    fn execute(
        &mut self,
        cdb: &[u8],
        direction: Direction,
        data: &mut [u8],
        sense: &mut [u8],
        timeout_ms: u32,
    ) -> io::Result<ScsiStatus>;
}

/// Raw sense bytes returned alongside a failed command
#[derive(Clone, PartialEq, Eq)]
pub struct SenseData(Vec<u8>);

impl SenseData {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenseData({})", self)
    }
}

impl fmt::Display for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to open device {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("SG_IO call failed: {0}")]
    CallFailed(#[source] io::Error),
    #[error("Device reported sense data: {0}")]
    Sense(SenseData),
}

type Opener<D> = fn(&Path) -> io::Result<D>;

/// Single-owner handle to the drive
///
/// The device is opened lazily on the first command and kept until the
/// transport is dropped. Commands are issued one at a time through `&mut self`,
/// so there is never more than one call in flight on the handle.
pub struct Transport<D: ScsiDevice = SgDevice> {
    device_path: PathBuf,
    opener: Opener<D>,
    device: Option<D>,
}

impl Transport<SgDevice> {
    /// Create a transport for a SCSI generic device path (e.g. `/dev/sg0`)
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        Self {
            device_path: device_path.into(),
            opener: SgDevice::open,
            device: None,
        }
    }
}

impl<D: ScsiDevice> Transport<D> {
    /// Wrap an already open device
    pub fn from_device(device: D) -> Self {
        Self {
            device_path: PathBuf::from("<attached>"),
            opener: |path| {
                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no opener for {}", path.display()),
                ))
            },
            device: Some(device),
        }
    }

    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Execute one command and classify the outcome
    ///
    /// Returns the number of bytes the device transferred into `buffer`.
    /// Any sense data, whatever its content, is a command failure.
    pub fn execute(
        &mut self,
        cdb: &[u8],
        direction: Direction,
        buffer: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize, TransportError> {
        let opcode = cdb.first().copied().unwrap_or(0);
        let device = self.device()?;
        let mut sense = [0u8; MAX_SENSE_LEN];

        debug!(
            "Executing opcode 0x{:02x} ({} byte CDB, {} byte buffer)",
            opcode,
            cdb.len(),
            buffer.len()
        );

        let status = device
            .execute(cdb, direction, buffer, &mut sense, timeout_ms)
            .map_err(TransportError::CallFailed)?;

        if status.sense_len > 0 {
            let sense = SenseData(sense[..status.sense_len.min(MAX_SENSE_LEN)].to_vec());
            debug!("Opcode 0x{:02x} returned sense: {}", opcode, sense);
            return Err(TransportError::Sense(sense));
        }

        if status.status != 0 || status.host_status != 0 || status.driver_status != 0 {
            return Err(TransportError::CallFailed(io::Error::other(format!(
                "status=0x{:02x} host_status=0x{:04x} driver_status=0x{:04x}",
                status.status, status.host_status, status.driver_status
            ))));
        }

        Ok(status.transferred.min(buffer.len()))
    }

    fn device(&mut self) -> Result<&mut D, TransportError> {
        let device = match self.device.take() {
            Some(device) => device,
            None => {
                let device = (self.opener)(&self.device_path).map_err(|source| {
                    TransportError::OpenFailed {
                        path: self.device_path.clone(),
                        source,
                    }
                })?;
                info!("Opened SCSI device {}", self.device_path.display());
                device
            }
        };
        Ok(self.device.insert(device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockScsiDevice;

    #[test]
    fn test_successful_command_returns_transferred_length() {
        let mut device = MockScsiDevice::new();
        device.push_data(vec![1, 2, 3]);
        let mut transport = Transport::from_device(device);

        let mut buf = [0u8; 16];
        let n = transport
            .execute(&[0x43, 0, 0, 0, 0, 0, 0, 0, 16, 0], Direction::FromDevice, &mut buf, 5000)
            .unwrap();

        assert_eq!(n, 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_any_sense_data_is_failure() {
        let mut device = MockScsiDevice::new();
        device.push_sense(vec![0x70, 0x00, 0x05]);
        let mut transport = Transport::from_device(device);

        let mut buf = [0u8; 4];
        let err = transport
            .execute(&[0x43; 10], Direction::FromDevice, &mut buf, 5000)
            .unwrap_err();

        match err {
            TransportError::Sense(sense) => assert_eq!(sense.as_bytes(), &[0x70, 0x00, 0x05]),
            other => panic!("expected sense error, got {:?}", other),
        }
    }

    #[test]
    fn test_call_failure_is_not_retried() {
        let mut device = MockScsiDevice::new();
        device.push_io_error();
        device.push_data(vec![9]);
        let mut transport = Transport::from_device(device);

        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.execute(&[0x00; 6], Direction::None, &mut buf, 5000),
            Err(TransportError::CallFailed(_))
        ));
        // The queued success is still there for the next call
        assert_eq!(
            transport
                .execute(&[0x00; 6], Direction::None, &mut buf, 5000)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_open_failure_reports_path() {
        let mut transport = Transport::new("/nonexistent/cdplay-sg-device");
        let mut buf = [0u8; 4];
        let err = transport
            .execute(&[0x00; 6], Direction::None, &mut buf, 5000)
            .unwrap_err();

        assert!(matches!(err, TransportError::OpenFailed { .. }));
        assert!(!transport.is_open());
    }

    #[test]
    fn test_sense_display_is_hex() {
        let sense = SenseData(vec![0x70, 0x0a, 0xff]);
        assert_eq!(sense.to_string(), "70 0a ff");
    }
}
