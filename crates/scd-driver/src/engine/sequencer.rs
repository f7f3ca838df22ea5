//! Request-cycle sequencing.
//!
//! Cycle 0 always addresses the device with start set. Cycle 1 carries the
//! command byte. Reads issue a repeated start with the read address on cycle
//! 2 and hand the bus to the device from cycle 3 on. The final cycle carries
//! stop and the data-width timing select.

use super::plan::Plan;
use super::{MasterPort, Target, Transfer};
use crate::error::SmbusError;
use crate::protocol::Direction;
use scd_chip::regs::{RequestCycle, TI_MODULUS};

#[allow(clippy::cast_possible_truncation)]
const fn address_byte(address: u16, direction: Direction) -> u8 {
    ((address as u8) << 1) | direction.bit()
}

/// Build the request cycles of a planned transaction.
///
/// Transaction ids start at 0 and advance by one per cycle, modulo 16.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn build_cycles(target: &Target, xfer: &Transfer<'_>, plan: &Plan) -> Vec<RequestCycle> {
    let read = xfer.direction.is_read();
    let steps = plan.steps;
    let params = &target.params;

    let mut req = RequestCycle {
        bs: target.bus_id,
        t: params.t,
        st: true,
        ss: steps as u8,
        // only quick and byte put the direction in the first address byte
        d: address_byte(
            xfer.address,
            if steps <= 2 { xfer.direction } else { Direction::Write },
        ),
        dod: true,
        ..RequestCycle::default()
    };

    let mut cycles = Vec::with_capacity(steps);
    for i in 0..steps {
        if i == steps - 1 {
            req.sp = true;
            req.ed = params.ed & 1 != 0;
            req.dat = if read { params.datr } else { params.datw };
        }
        if i == 1 {
            req.st = false;
            req.ss = 0;
            req.d = xfer.command;
            req.dod = if steps == 2 { !read } else { true };
        }
        if i == 2 && read {
            req.st = true;
            req.d = address_byte(xfer.address, Direction::Read);
        }
        if i >= 2 && !read {
            req.d = xfer.block[plan.data_offset + i - 2];
        }
        if i == 3 && read {
            req.dod = false;
        }

        cycles.push(req);
        req.ti = (req.ti + 1) % TI_MODULUS;
        req.st = false;
    }
    cycles
}

/// The three cycles that start an accelerated block read: address write,
/// command, then repeated start with the read address and the bus-reset flag.
///
/// No stop is issued; the hardware finishes the transaction on its own.
#[must_use]
pub fn build_block_read_cycles(target: &Target, address: u16, command: u8) -> Vec<RequestCycle> {
    let first = RequestCycle {
        bs: target.bus_id,
        t: target.params.t,
        st: true,
        ss: 3,
        d: address_byte(address, Direction::Write),
        dod: true,
        ..RequestCycle::default()
    };
    let second = RequestCycle {
        st: false,
        ss: 0,
        d: command,
        ti: 1,
        ..first
    };
    let third = RequestCycle {
        br: true,
        st: true,
        d: address_byte(address, Direction::Read),
        ti: 2,
        ..second
    };
    vec![first, second, third]
}

/// Write every cycle to the request register in order.
pub(crate) fn write_cycles(port: &MasterPort<'_>, cycles: &[RequestCycle]) -> Result<(), SmbusError> {
    for cycle in cycles {
        tracing::trace!("request {:#010x} {cycle:?}", cycle.pack());
        port.write_request(cycle)?;
    }
    Ok(())
}
