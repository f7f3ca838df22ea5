//! Memory-mapped register backend
//!
//! Maps a file into the process with `rustix::mm::mmap` and exposes it as a
//! [`RegisterIo`]. For real hardware the file is the PCI BAR resource node
//! under `/sys/bus/pci/devices/<addr>/resource<N>`; any regular file works
//! too, which is how the mapping is exercised without hardware.

use crate::error::{ScdError, SmbusError};
use crate::io::RegisterIo;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Memory-mapped register window
///
/// Every access is bounds- and alignment-checked before it reaches the
/// mapping.
#[derive(Debug)]
pub struct MmioRegion {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    path: PathBuf,
}

impl MmioRegion {
    /// Map BAR `bar_index` of the PCI device at `pcie_address`.
    ///
    /// # Errors
    ///
    /// Returns error if the resource node cannot be opened or mapped.
    pub fn from_pci(pcie_address: &str, bar_index: usize) -> Result<Self, ScdError> {
        let path = format!("/sys/bus/pci/devices/{pcie_address}/resource{bar_index}");
        Self::open(path)
    }

    /// Map the whole of `path` read/write.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The file cannot be opened
    /// - The file is empty
    /// - mmap fails
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScdError> {
        let path = path.as_ref().to_path_buf();

        tracing::debug!("Mapping register window: {}", path.display());

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        // Truncation acceptable: BAR sizes fit in usize on 64-bit (our only target)
        #[allow(clippy::cast_possible_truncation)]
        let size = file.metadata()?.len() as usize;

        if size == 0 {
            return Err(ScdError::invalid_argument(format!(
                "{} has size 0 (device not enabled?)",
                path.display()
            )));
        }

        // SAFETY: the fd is valid (just opened), size is non-zero, offset 0 is the
        // start of the file, and the file is kept in the struct so the mapping
        // outlives no backing object. The mapping is released in Drop.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
            .map_err(std::io::Error::from)?
        };

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| {
            ScdError::invalid_argument(format!("mmap of {} returned null", path.display()))
        })?;

        tracing::info!("Mapped {} ({size:#x} bytes at {ptr:p})", path.display());

        Ok(Self {
            ptr,
            size,
            _file: file,
            path,
        })
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, offset: u32) -> Result<usize, SmbusError> {
        let start = offset as usize;
        if start % 4 != 0 {
            return Err(SmbusError::register(offset, "unaligned 32-bit access"));
        }
        if start + 4 > self.size {
            return Err(SmbusError::register(
                offset,
                format!("out of bounds, limit={:#x}", self.size),
            ));
        }
        Ok(start)
    }
}

impl RegisterIo for MmioRegion {
    fn read_u32(&self, offset: u32) -> Result<u32, SmbusError> {
        let start = self.check(offset)?;

        // SAFETY: check() guarantees start + 4 <= size and 4-byte alignment of the
        // offset; the base returned by mmap is page aligned. Volatile because the
        // hardware changes register contents and reads pop the response FIFO.
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(start).cast::<u32>().read_volatile() };

        tracing::trace!("read  {offset:#06x} = {value:#010x}");
        Ok(value)
    }

    fn write_u32(&self, offset: u32, value: u32) -> Result<(), SmbusError> {
        let start = self.check(offset)?;

        tracing::trace!("write {offset:#06x} = {value:#010x}");

        // SAFETY: same bounds and alignment argument as read_u32. Writes have
        // hardware side effects and must not be merged or elided.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr
                .as_ptr()
                .add(start)
                .cast::<u32>()
                .write_volatile(value);
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl Drop for MmioRegion {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {}", self.path.display());

        // SAFETY: ptr and size are exactly what mmap returned/was given in open(),
        // and Drop runs once.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: the region owns its mapping; moving it between threads does not
// invalidate the mapping.
unsafe impl Send for MmioRegion {}

// SAFETY: all accesses are bounds-checked volatile 32-bit operations on device
// memory. Callers serialize transactions per master; concurrent accesses from
// different masters touch disjoint register windows.
unsafe impl Sync for MmioRegion {}
