//! Kernel i2c-dev backend (`/dev/i2c-N`).
//!
//! Alternative to the register-level controller when the kernel owns the
//! BSC. Same failure taxonomy: a missing device node is
//! [`HalError::MemAccessFailure`], NACK / timeout / any ioctl error is
//! [`HalError::Failed`], and scans continue past absent addresses.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use embedded_hal::i2c::{ErrorType, I2c, Operation, SevenBitAddress};

use super::{ScanResult, SCAN_FIRST, SCAN_LAST};
use crate::error::{HalError, HalResult};

// <linux/i2c-dev.h>
const I2C_RETRIES: libc::c_ulong = 0x0701;
const I2C_TIMEOUT: libc::c_ulong = 0x0702;
const I2C_SLAVE: libc::c_ulong = 0x0703;
const I2C_RDWR: libc::c_ulong = 0x0707;
const I2C_SMBUS: libc::c_ulong = 0x0720;

// <linux/i2c.h>
const I2C_M_RD: u16 = 0x0001;
const I2C_SMBUS_WRITE: u8 = 0;
const I2C_SMBUS_QUICK: u32 = 0;

#[repr(C)]
struct I2cMsg {
    addr: u16,
    flags: u16,
    len: u16,
    buf: *mut u8,
}

#[repr(C)]
struct I2cRdwrIoctlData {
    msgs: *mut I2cMsg,
    nmsgs: u32,
}

#[repr(C)]
struct I2cSmbusIoctlData {
    read_write: u8,
    command: u8,
    size: u32,
    data: *mut libc::c_void,
}

/// An open `/dev/i2c-N` adapter.
#[derive(Debug)]
pub struct LinuxI2cBus {
    file: File,
}

impl LinuxI2cBus {
    /// Open `/dev/i2c-<bus>`.
    ///
    /// # Errors
    ///
    /// [`HalError::MemAccessFailure`] if the node cannot be opened.
    pub fn open(bus: u8) -> HalResult<Self> {
        Self::open_path(format!("/dev/i2c-{bus}"))
    }

    /// Open an explicit adapter node.
    ///
    /// # Errors
    ///
    /// [`HalError::MemAccessFailure`] if the node cannot be opened.
    pub fn open_path(path: impl AsRef<Path>) -> HalResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                tracing::error!(device = %path.display(), error = %e, "i2c-dev open failed");
                HalError::MemAccessFailure
            })?;
        tracing::debug!(device = %path.display(), "i2c-dev opened");
        Ok(Self { file })
    }

    /// Adapter timeout in units of 10 ms.
    ///
    /// # Errors
    ///
    /// [`HalError::Failed`] if the ioctl is rejected.
    pub fn set_timeout(&self, tens_of_ms: u32) -> HalResult<()> {
        self.ioctl_value(I2C_TIMEOUT, libc::c_ulong::from(tens_of_ms), "I2C_TIMEOUT")
    }

    /// Number of times the adapter retries a NACKed message.
    ///
    /// # Errors
    ///
    /// [`HalError::Failed`] if the ioctl is rejected.
    pub fn set_retries(&self, retries: u32) -> HalResult<()> {
        self.ioctl_value(I2C_RETRIES, libc::c_ulong::from(retries), "I2C_RETRIES")
    }

    /// Probe `0x03..=0x77` with SMBus quick-write.
    pub fn scan(&self) -> ScanResult {
        let mut result = ScanResult::default();
        for addr in SCAN_FIRST..=SCAN_LAST {
            if self.ioctl_value(I2C_SLAVE, libc::c_ulong::from(addr), "I2C_SLAVE").is_err() {
                continue;
            }
            let mut args = I2cSmbusIoctlData {
                read_write: I2C_SMBUS_WRITE,
                command: 0,
                size: I2C_SMBUS_QUICK,
                data: core::ptr::null_mut(),
            };
            // SAFETY: `args` is a valid i2c_smbus_ioctl_data for the duration
            // of the call; quick-write never dereferences `data`.
            let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), I2C_SMBUS, core::ptr::addr_of_mut!(args)) };
            if rc >= 0 {
                result.record(addr);
            } else {
                tracing::trace!(
                    addr = format_args!("{addr:#04x}"),
                    error = %std::io::Error::last_os_error(),
                    "scan: no ack"
                );
            }
        }
        result
    }

    /// Write `bytes` to `addr`.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidArgs`] for an empty payload or an address above
    /// `0x7F`; [`HalError::Failed`] if the kernel reports an error.
    pub fn write(&self, addr: u8, bytes: &[u8]) -> HalResult<()> {
        check(addr, bytes.len())?;
        let mut data = bytes.to_vec();
        let mut msgs = [msg(addr, 0, &mut data)?];
        self.rdwr(addr, &mut msgs)
    }

    /// Fill `buf` from `addr`.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write).
    pub fn read_into(&self, addr: u8, buf: &mut [u8]) -> HalResult<()> {
        check(addr, buf.len())?;
        let mut msgs = [msg(addr, I2C_M_RD, buf)?];
        self.rdwr(addr, &mut msgs)
    }

    /// Write `wbytes` then fill `buf` in one combined transaction.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write), for either phase.
    pub fn write_then_read_into(&self, addr: u8, wbytes: &[u8], buf: &mut [u8]) -> HalResult<()> {
        check(addr, wbytes.len())?;
        check(addr, buf.len())?;
        let mut data = wbytes.to_vec();
        let mut msgs = [msg(addr, 0, &mut data)?, msg(addr, I2C_M_RD, buf)?];
        self.rdwr(addr, &mut msgs)
    }

    fn rdwr(&self, addr: u8, msgs: &mut [I2cMsg]) -> HalResult<()> {
        let mut data = I2cRdwrIoctlData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: u32::try_from(msgs.len()).map_err(|_| HalError::InvalidArgs)?,
        };
        // SAFETY: every message points at a live buffer of `len` bytes that
        // outlives the call, and `data` points at `msgs`.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), I2C_RDWR, core::ptr::addr_of_mut!(data)) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ENXIO | libc::EREMOTEIO) => {
                    tracing::warn!(addr = format_args!("{addr:#04x}"), "i2c nack");
                }
                Some(libc::ETIMEDOUT) => {
                    tracing::warn!(addr = format_args!("{addr:#04x}"), "i2c timeout");
                }
                _ => {
                    tracing::warn!(addr = format_args!("{addr:#04x}"), error = %err, "i2c transfer failed");
                }
            }
            return Err(HalError::Failed);
        }
        Ok(())
    }

    fn ioctl_value(&self, request: libc::c_ulong, value: libc::c_ulong, name: &str) -> HalResult<()> {
        // SAFETY: these requests take an integer argument by value.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request, value) };
        if rc < 0 {
            tracing::debug!(request = name, error = %std::io::Error::last_os_error(), "ioctl failed");
            return Err(HalError::Failed);
        }
        Ok(())
    }
}

fn check(addr: u8, len: usize) -> HalResult<()> {
    if addr > 0x7F || len == 0 || len > usize::from(u16::MAX) {
        return Err(HalError::InvalidArgs);
    }
    Ok(())
}

fn msg(addr: u8, flags: u16, buf: &mut [u8]) -> HalResult<I2cMsg> {
    Ok(I2cMsg {
        addr: u16::from(addr),
        flags,
        len: u16::try_from(buf.len()).map_err(|_| HalError::InvalidArgs)?,
        buf: buf.as_mut_ptr(),
    })
}

impl ErrorType for LinuxI2cBus {
    type Error = HalError;
}

impl I2c<SevenBitAddress> for LinuxI2cBus {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> HalResult<()> {
        match operations {
            [Operation::Write(w)] => LinuxI2cBus::write(self, address, w),
            [Operation::Read(r)] => self.read_into(address, r),
            [Operation::Write(w), Operation::Read(r)] => self.write_then_read_into(address, w, r),
            _ => Err(HalError::InvalidArgs),
        }
    }
}
