//! Memory-mapped peripheral register windows.
//!
//! A [`RegisterWindow`] owns an `mmap` of a peripheral's register block and
//! unmaps it on drop. All accesses go through [`core::ptr::read_volatile`] /
//! [`core::ptr::write_volatile`]: the compiler may neither cache nor reorder
//! them relative to each other, which is what makes write-1-to-clear status
//! flags and FIFO registers behave.
//!
//! Peripheral bases are not page-aligned in general (BSC3 sits at
//! `…_5600`), so [`RegisterWindow::map`] maps from the enclosing page
//! boundary and offsets the register pointer by the remainder.
//!
//! Controllers never construct windows directly; they ask a
//! [`RegisterMapper`] so that simulation backends can stand in for
//! `/dev/mem` in tests.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use crate::config::{DEV_GPIOMEM_PATH, DEV_MEM_PATH};
use crate::error::{HalError, HalResult};

/// Word-indexed access to a block of 32-bit peripheral registers.
///
/// Both methods take `&self`: the hardware, not Rust, arbitrates concurrent
/// register access. Logical transactions that span several registers must be
/// serialized by the caller (see the per-bus lock in [`crate::i2c`]).
pub trait RegisterBlock: Send + Sync {
    /// Read register `index` (word offset from the block base).
    fn read(&self, index: usize) -> u32;

    /// Write `value` to register `index`.
    fn write(&self, index: usize, value: u32);

    /// Read-modify-write helper. Not atomic with respect to the hardware.
    fn modify(&self, index: usize, f: impl FnOnce(u32) -> u32)
    where
        Self: Sized,
    {
        let value = self.read(index);
        self.write(index, f(value));
    }
}

/// Factory for register blocks at a given physical base.
pub trait RegisterMapper: Send + Sync {
    /// The block type produced by this mapper.
    type Block: RegisterBlock;

    /// Map `length` bytes of registers starting at `physical_base`.
    fn map(&self, physical_base: u64, length: usize) -> HalResult<Self::Block>;
}

/// How the mapping offset within the device file is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetMode {
    /// Offset equals the physical address (`/dev/mem`).
    Physical,
    /// The device exposes exactly one block at offset 0 (`/dev/gpiomem`).
    ZeroBased,
}

/// An owned `mmap` of `N` 32-bit registers.
#[derive(Debug)]
pub struct RegisterWindow {
    /// Start of the page-aligned mapping (what `munmap` needs).
    map_base: NonNull<libc::c_void>,
    /// Length of the page-aligned mapping in bytes.
    map_len: usize,
    /// First register of the peripheral (`map_base + sub-page offset`).
    regs: NonNull<u32>,
    /// Number of addressable 32-bit registers.
    words: usize,
    physical_base: u64,
}

// SAFETY: the window is a plain pointer into device memory. Every access is a
// single volatile load/store of an aligned u32, which the bus performs
// atomically; the hardware arbitrates concurrent access. The mapping lives
// until `Drop`, which requires exclusive ownership.
unsafe impl Send for RegisterWindow {}
// SAFETY: see `Send` above. `&RegisterWindow` only permits volatile word
// accesses, never references into the mapped memory.
unsafe impl Sync for RegisterWindow {}

impl RegisterWindow {
    /// Map `length` bytes of registers at `physical_base` through `device`.
    ///
    /// # Errors
    ///
    /// [`HalError::InvalidArgs`] for a zero or unaligned length,
    /// [`HalError::MemAccessFailure`] if the device file cannot be opened or
    /// `mmap` fails.
    pub fn map(
        device: &Path,
        physical_base: u64,
        length: usize,
        offset_mode: OffsetMode,
    ) -> HalResult<Self> {
        if length == 0 || length % 4 != 0 || physical_base % 4 != 0 {
            return Err(HalError::InvalidArgs);
        }

        let page = page_size();
        let file_offset = match offset_mode {
            OffsetMode::Physical => physical_base,
            OffsetMode::ZeroBased => 0,
        };
        let aligned = file_offset & !(page - 1);
        let delta = usize::try_from(file_offset - aligned).map_err(|_| HalError::InvalidArgs)?;
        let map_len = length + delta;
        let offset = libc::off_t::try_from(aligned).map_err(|_| HalError::InvalidArgs)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(device)
            .map_err(|e| {
                tracing::error!(device = %device.display(), error = %e, "open failed");
                HalError::MemAccessFailure
            })?;

        // SAFETY: the arguments describe a fresh shared mapping of an open
        // file descriptor; no existing Rust object aliases the returned
        // memory. The descriptor may be closed after mmap returns.
        let raw = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset,
            )
        };
        drop(file);

        if raw == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            tracing::error!(
                device = %device.display(),
                base = format_args!("{physical_base:#x}"),
                error = %err,
                "mmap failed"
            );
            return Err(HalError::MemAccessFailure);
        }
        let map_base = NonNull::new(raw).ok_or(HalError::MemAccessFailure)?;

        // SAFETY: `delta < page <= map_len`, so the offset pointer stays
        // inside the mapping, and `file_offset` is 4-byte aligned.
        let regs = unsafe { map_base.as_ptr().cast::<u8>().add(delta) }.cast::<u32>();
        let regs = NonNull::new(regs).ok_or(HalError::MemAccessFailure)?;

        tracing::debug!(
            device = %device.display(),
            base = format_args!("{physical_base:#x}"),
            length,
            "register window mapped"
        );

        Ok(Self {
            map_base,
            map_len,
            regs,
            words: length / 4,
            physical_base,
        })
    }

    /// Physical base this window was mapped at.
    #[must_use]
    pub fn physical_base(&self) -> u64 {
        self.physical_base
    }

    /// Number of 32-bit registers in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words
    }

    /// `true` for an empty window (never produced by [`map`](Self::map)).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words == 0
    }
}

impl RegisterBlock for RegisterWindow {
    fn read(&self, index: usize) -> u32 {
        if index >= self.words {
            tracing::error!(index, words = self.words, "register read out of range");
            return 0;
        }
        // SAFETY: `index < words` keeps the access inside the mapping, and
        // the pointer is u32-aligned.
        unsafe { core::ptr::read_volatile(self.regs.as_ptr().add(index)) }
    }

    fn write(&self, index: usize, value: u32) {
        if index >= self.words {
            tracing::error!(index, words = self.words, "register write out of range");
            return;
        }
        // SAFETY: as in `read`.
        unsafe { core::ptr::write_volatile(self.regs.as_ptr().add(index), value) }
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        // SAFETY: `map_base`/`map_len` are exactly what mmap returned and
        // nothing else references the mapping once we are being dropped.
        let rc = unsafe { libc::munmap(self.map_base.as_ptr(), self.map_len) };
        if rc != 0 {
            tracing::warn!(
                base = format_args!("{:#x}", self.physical_base),
                error = %std::io::Error::last_os_error(),
                "munmap failed"
            );
        }
    }
}

fn page_size() -> u64 {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|s| s.is_power_of_two()).unwrap_or(4096)
}

/// Maps peripheral registers through `/dev/mem` (requires root).
#[derive(Debug, Clone)]
pub struct DevMemMapper {
    device: PathBuf,
}

impl DevMemMapper {
    /// Mapper over the default `/dev/mem`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_device(DEV_MEM_PATH)
    }

    /// Mapper over an alternative device node.
    pub fn with_device(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl Default for DevMemMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterMapper for DevMemMapper {
    type Block = RegisterWindow;

    fn map(&self, physical_base: u64, length: usize) -> HalResult<RegisterWindow> {
        RegisterWindow::map(&self.device, physical_base, length, OffsetMode::Physical)
    }
}

/// Maps the GPIO block through `/dev/gpiomem` (no root needed).
///
/// The physical base is ignored; the device only ever exposes GPIO.
#[derive(Debug, Clone)]
pub struct GpioMemMapper {
    device: PathBuf,
}

impl GpioMemMapper {
    /// Mapper over the default `/dev/gpiomem`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            device: PathBuf::from(DEV_GPIOMEM_PATH),
        }
    }
}

impl Default for GpioMemMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterMapper for GpioMemMapper {
    type Block = RegisterWindow;

    fn map(&self, physical_base: u64, length: usize) -> HalResult<RegisterWindow> {
        RegisterWindow::map(&self.device, physical_base, length, OffsetMode::ZeroBased)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_mem_access_failure() {
        let err = RegisterWindow::map(
            Path::new("/nonexistent/dev/mem"),
            0xFE80_4000,
            0x20,
            OffsetMode::Physical,
        )
        .unwrap_err();
        assert_eq!(err, HalError::MemAccessFailure);
    }

    #[test]
    fn zero_length_is_rejected_before_open() {
        let err = RegisterWindow::map(
            Path::new("/nonexistent/dev/mem"),
            0xFE80_4000,
            0,
            OffsetMode::Physical,
        )
        .unwrap_err();
        assert_eq!(err, HalError::InvalidArgs);
    }

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    /// Mapping an ordinary file exercises the page-alignment arithmetic
    /// without needing /dev/mem.
    #[test]
    fn maps_regular_file_with_sub_page_offset() {
        use std::io::Write;

        let page = usize::try_from(page_size()).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut contents = vec![0u8; page * 2];
        // Register 0 of a block at page + 0x600.
        contents[page + 0x600..page + 0x604].copy_from_slice(&0xDEAD_BEEFu32.to_ne_bytes());
        file.write_all(&contents).unwrap();
        file.flush().unwrap();

        let base = u64::try_from(page + 0x600).unwrap();
        let window = RegisterWindow::map(file.path(), base, 0x20, OffsetMode::Physical).unwrap();
        assert_eq!(window.read(0), 0xDEAD_BEEF);
        window.write(1, 0x1234_5678);
        assert_eq!(window.read(1), 0x1234_5678);
        // Out-of-range accesses are ignored rather than touching memory.
        assert_eq!(window.read(8), 0);
        window.write(8, 1);
    }
}
