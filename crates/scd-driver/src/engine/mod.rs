//! The SMBus transaction engine.
//!
//! A transaction is turned into an ordered list of request cycles, written to
//! the request register, then matched one-to-one against the response FIFO.
//!
//! ```text
//! plan (cycle count, payload offset)
//!   ↓
//! sequencer  → request register   (one write per cycle, ti += 1 mod 16)
//!   ↓
//! collector  ← response register  (ti must match, flags checked in order)
//! ```
//!
//! Block reads on version ≥ 2 masters take the accelerated path in
//! [`block_read`] instead.
//!
//! Everything in this module runs with the master lock held and performs a
//! single attempt. Retry and reset live in [`crate::master`].

mod block_read;
mod collector;
pub mod plan;
mod sequencer;

use crate::config::EngineConfig;
use crate::error::SmbusError;
use crate::io::RegisterIo;
use crate::protocol::{Direction, Protocol};
use plan::Plan;
use scd_chip::regs::{self, ControlStatus, RequestCycle};
use scd_chip::TimingParams;

pub use sequencer::{build_block_read_cycles, build_cycles};

/// One transaction as the engine sees it.
///
/// `block` follows the Linux `i2c_smbus_data` layout: a byte lives at
/// `[0]`, a word at `[0..2]` little-endian, a length-prefixed block has its
/// length at `[0]`. Its length is the destination capacity.
#[derive(Debug)]
pub struct Transfer<'a> {
    /// Device address
    pub address: u16,
    /// Direction
    pub direction: Direction,
    /// Command byte
    pub command: u8,
    /// Transaction shape
    pub protocol: Protocol,
    /// Payload in, result out
    pub block: &'a mut [u8],
}

/// Per-transaction hardware selection, resolved under the master lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Bus select within the master
    pub bus_id: u8,
    /// Timing for the addressed device
    pub params: TimingParams,
    /// Master supports the accelerated block read
    pub fast_block_read: bool,
}

/// Register window of one master.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MasterPort<'a> {
    io: &'a dyn RegisterIo,
    base: u32,
    config: &'a EngineConfig,
}

impl<'a> MasterPort<'a> {
    pub(crate) fn new(io: &'a dyn RegisterIo, base: u32, config: &'a EngineConfig) -> Self {
        Self { io, base, config }
    }

    pub(crate) const fn config(&self) -> &EngineConfig {
        self.config
    }

    pub(crate) fn write_request(&self, cycle: &RequestCycle) -> Result<(), SmbusError> {
        self.io.write_u32(self.base + regs::REQUEST, cycle.pack())
    }

    pub(crate) fn read_control_status(&self) -> Result<ControlStatus, SmbusError> {
        self.io
            .read_u32(self.base + regs::CONTROL_STATUS)
            .map(ControlStatus)
    }

    pub(crate) fn write_control_status(&self, cs: ControlStatus) -> Result<(), SmbusError> {
        self.io.write_u32(self.base + regs::CONTROL_STATUS, cs.0)
    }

    pub(crate) fn read_response_raw(&self) -> Result<u32, SmbusError> {
        self.io.read_u32(self.base + regs::RESPONSE)
    }

    /// Reset the master and flush its FIFO.
    ///
    /// Set reset and flush, hold for the settle time, release reset.
    pub(crate) fn reset(&self) -> Result<(), SmbusError> {
        let cs = self.read_control_status()?.with_reset(true).with_flush(true);
        self.write_control_status(cs)?;
        sleep(self.config.reset_settle);
        self.write_control_status(cs.with_reset(false))
    }
}

pub(crate) fn sleep(d: std::time::Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}

/// Reject requests the hardware cannot express before any register access.
///
/// # Errors
///
/// Returns [`SmbusError::UnsupportedRequestShape`] if the plan exceeds the
/// step-sequence field or a write payload does not fit its buffer.
pub fn validate(xfer: &Transfer<'_>) -> Result<(), SmbusError> {
    if matches!(
        (xfer.protocol, xfer.direction),
        (Protocol::BlockData, Direction::Read)
    ) {
        // length is only known once the device answers
        return Ok(());
    }
    let plan = plan::plan(
        xfer.protocol,
        xfer.direction,
        plan::payload_len(xfer.protocol, xfer.block),
    )?;
    if xfer.direction == Direction::Write {
        let needed = plan.write_payload_end();
        if needed > xfer.block.len() {
            return Err(SmbusError::unsupported(format!(
                "{:?} write needs {needed} payload bytes, buffer holds {}",
                xfer.protocol,
                xfer.block.len()
            )));
        }
    }
    Ok(())
}

/// Run one attempt of `xfer`. No retry, no reset.
///
/// # Errors
///
/// Returns the classified failure of the first failing step.
pub(crate) fn execute(
    port: &MasterPort<'_>,
    target: &Target,
    xfer: &mut Transfer<'_>,
) -> Result<(), SmbusError> {
    if xfer.protocol == Protocol::BlockData && xfer.direction == Direction::Read {
        if target.fast_block_read {
            return block_read::run(port, target, xfer);
        }

        // learn the block length with a byte-data read of the same command
        let mut size_probe = Transfer {
            address: xfer.address,
            direction: Direction::Read,
            command: xfer.command,
            protocol: Protocol::ByteData,
            block: &mut *xfer.block,
        };
        let probe_plan = plan::plan(Protocol::ByteData, Direction::Read, 0)?;
        run_planned(port, target, &mut size_probe, &probe_plan)?;

        // length byte plus payload must fit, same as on the accelerated path
        let capacity = xfer.block.len();
        if plan::payload_len(xfer.protocol, xfer.block) + 1 > capacity {
            return Err(SmbusError::BufferTooSmall {
                index: capacity,
                capacity,
            });
        }
    }

    let plan = plan::plan(
        xfer.protocol,
        xfer.direction,
        plan::payload_len(xfer.protocol, xfer.block),
    )?;
    run_planned(port, target, xfer, &plan)
}

fn run_planned(
    port: &MasterPort<'_>,
    target: &Target,
    xfer: &mut Transfer<'_>,
    plan: &Plan,
) -> Result<(), SmbusError> {
    let cycles = build_cycles(target, xfer, plan);
    sequencer::write_cycles(port, &cycles)?;
    collector::collect(port, xfer, plan)
}
