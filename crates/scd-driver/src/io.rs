//! Register access seam between the engine and the hardware.
//!
//! The engine never touches memory directly. A device is reached through a
//! [`RegisterIo`] backend: a memory-mapped PCI BAR ([`crate::mmio::MmioRegion`])
//! in production, [`crate::sim::SimulatedScd`] in tests and demos.

use crate::error::SmbusError;
use std::fmt::Debug;

/// 32-bit register space of one device.
///
/// Accesses on the same backend are observed by the hardware in program
/// order. Implementations must not reorder or merge them.
pub trait RegisterIo: Debug + Send + Sync {
    /// Read the register at `offset` bytes from the device base.
    ///
    /// # Errors
    ///
    /// Returns [`SmbusError::Register`] if the offset is not mapped.
    fn read_u32(&self, offset: u32) -> Result<u32, SmbusError>;

    /// Write the register at `offset` bytes from the device base.
    ///
    /// # Errors
    ///
    /// Returns [`SmbusError::Register`] if the offset is not mapped.
    fn write_u32(&self, offset: u32, value: u32) -> Result<(), SmbusError>;

    /// Size of the register space in bytes.
    fn size(&self) -> usize;
}
