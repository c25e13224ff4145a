//! FFI bindings for the Linux SCSI generic driver
//!
//! Safe wrapper around the `SG_IO` ioctl. See `include/scsi/sg.h` for the
//! layout of `sg_io_hdr_t`.

use crate::cd::transport::{Direction, ScsiDevice, ScsiStatus};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;

/// `ioctl` request number for SG_IO
#[cfg(target_os = "linux")]
const SG_IO: libc::c_ulong = 0x2285;

/// `interface_id` value for the v3 sg interface
#[cfg(target_os = "linux")]
const SG_INTERFACE_ID: libc::c_int = b'S' as libc::c_int;

#[cfg(target_os = "linux")]
const SG_DXFER_NONE: libc::c_int = -1;
#[cfg(target_os = "linux")]
const SG_DXFER_FROM_DEV: libc::c_int = -3;

/// Mirror of `sg_io_hdr_t`
#[cfg(target_os = "linux")]
#[repr(C)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *const libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

/// A SCSI generic device node (e.g. `/dev/sg0`)
pub struct SgDevice {
    file: File,
    device_path: PathBuf,
}

impl SgDevice {
    /// Open a SCSI generic device by path
    pub fn open(device_path: &Path) -> io::Result<Self> {
        let file = File::open(device_path)?;
        Ok(Self {
            file,
            device_path: device_path.to_path_buf(),
        })
    }

    /// Get the device path
    pub fn device_path(&self) -> &Path {
        &self.device_path
    }
}

impl ScsiDevice for SgDevice {
    #[cfg(target_os = "linux")]
    fn execute(
        &mut self,
        cdb: &[u8],
        direction: Direction,
        data: &mut [u8],
        sense: &mut [u8],
        timeout_ms: u32,
    ) -> io::Result<ScsiStatus> {
        let cmd_len = u8::try_from(cdb.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "CDB too long"))?;
        let mx_sb_len = u8::try_from(sense.len()).unwrap_or(u8::MAX);
        let (dxfer_direction, dxfer_len) = match direction {
            Direction::None => (SG_DXFER_NONE, 0),
            Direction::FromDevice => (
                SG_DXFER_FROM_DEV,
                libc::c_uint::try_from(data.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "data buffer too large")
                })?,
            ),
        };

        let mut hdr = SgIoHdr {
            interface_id: SG_INTERFACE_ID,
            dxfer_direction,
            cmd_len,
            mx_sb_len,
            iovec_count: 0,
            dxfer_len,
            dxferp: data.as_mut_ptr() as *mut libc::c_void,
            cmdp: cdb.as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: timeout_ms,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // SAFETY: every pointer in `hdr` borrows a live slice whose length is the
        // length handed to the driver, and the borrows outlive the ioctl call.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO as _, &mut hdr) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }

        let transferred = (dxfer_len as usize).saturating_sub(hdr.resid.max(0) as usize);
        Ok(ScsiStatus {
            transferred,
            sense_len: usize::from(hdr.sb_len_wr).min(sense.len()),
            status: hdr.status,
            host_status: hdr.host_status,
            driver_status: hdr.driver_status,
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn execute(
        &mut self,
        _cdb: &[u8],
        _direction: Direction,
        _data: &mut [u8],
        _sense: &mut [u8],
        _timeout_ms: u32,
    ) -> io::Result<ScsiStatus> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "SG_IO is only available on Linux",
        ))
    }
}
