//! Silicon model for the SCD SMBus bus-master.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the bus-master block: register offsets, the bit layout of
//! the request, control/status and response registers, and the per-address
//! timing parameters the engine feeds into every request cycle.
//!
//! The bus-master has no native SMBus controller. Every protocol step is a
//! single 32-bit write to the request register (a *cycle*), answered by one
//! entry in a response FIFO. The driver synthesizes SMBus framing out of
//! these cycles.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Register offsets and bit-field structs with pack/unpack |
//! | [`timing`] | `TimingParams`, the process-wide default, block-read budgets |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod regs;
pub mod timing;

pub use regs::{ControlStatus, RequestCycle, ResponseEntry};
pub use timing::TimingParams;
