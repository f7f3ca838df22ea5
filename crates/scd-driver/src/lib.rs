//! SMBus/I2C transaction engine for the SCD bus-master.
//!
//! The SCD exposes each bus-master as three 32-bit registers. Every SMBus
//! operation is synthesized in software: the engine writes one request word
//! per protocol cycle, then reads back one response word per cycle and checks
//! it against what was sent.
//!
//! # Layers
//!
//! ```text
//! Registry      contexts, masters, buses, timing overrides
//!   ↓
//! Bus           typed SMBus calls, raw two-message i2c transfers
//!   ↓
//! Master        per-master lock, bounded retry, reset on failure
//!   ↓
//! engine        planner → sequencer → collector, or the fast block read
//!   ↓
//! RegisterIo    MmioRegion (PCI BAR) or SimulatedScd
//! ```
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use scd_driver::sim::{SimDevice, SimulatedScd};
//! use scd_driver::{EngineConfig, Registry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sim = Arc::new(SimulatedScd::new(0x1000));
//! sim.add_master(0x100, 2);
//! sim.add_device(0x100, 0, 0x50, SimDevice::new().with_bytes(0x10, &[0x2A]));
//!
//! let registry = Registry::new(EngineConfig::without_delays());
//! registry.add_context("sim", sim)?;
//! registry.add_master("sim", 0x100, 0, 8)?;
//!
//! let bus = registry.bus(0)?;
//! assert_eq!(bus.read_byte_data(0x50, 0x10)?, 0x2A);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bus;
pub mod config;
pub mod engine;
mod error;
pub mod io;
pub mod master;
pub mod mmio;
pub mod protocol;
pub mod registry;
pub mod sim;

pub use bus::{Bus, TransferResult};
pub use config::{EngineConfig, TimingOverride, DEFAULT_BUS_COUNT, DEFAULT_MAX_RETRIES};
pub use error::{Result, ScdError, SmbusError, TransferError};
pub use io::RegisterIo;
pub use master::{Master, MasterInfo};
pub use mmio::MmioRegion;
pub use protocol::{Direction, Functionality, Message, Protocol, SmbusData};
pub use registry::{Registry, MAX_BUS_COUNT};
pub use scd_chip::TimingParams;
pub use sim::{Fault, SimDevice, SimulatedScd};
