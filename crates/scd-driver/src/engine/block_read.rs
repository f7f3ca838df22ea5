//! Accelerated block read (protocol version 2 and later).
//!
//! The master reads the length byte and the whole block on its own once the
//! third request cycle sets `br`. The driver waits for the busy flag to drop,
//! then drains `4 + length` response entries in one pass.

use super::collector::{check_response, read_response, store};
use super::sequencer::{build_block_read_cycles, write_cycles};
use super::{sleep, MasterPort, Target, Transfer};
use crate::error::SmbusError;
use scd_chip::regs::TI_MODULUS;

/// Response entries preceding the length byte.
const HEADER: usize = 3;

pub(super) fn run(port: &MasterPort<'_>, target: &Target, xfer: &mut Transfer<'_>) -> Result<(), SmbusError> {
    let cycles = build_block_read_cycles(target, xfer.address, xfer.command);
    write_cycles(port, &cycles)?;

    let budget = target.params.block_read_budget();
    let step = port.config().block_read_poll_step;

    let mut elapsed = 0;
    let mut cs = port.read_control_status()?;
    while cs.brb() && elapsed < budget {
        sleep(step);
        elapsed += 1;
        cs = port.read_control_status()?;
    }

    // exhausting the budget is fatal even if busy dropped on the last poll
    if elapsed == budget {
        tracing::warn!(
            "smbus response timeout({budget}) cs={:#x} addr={:#04x} reg={:#04x}",
            cs.0,
            xfer.address,
            xfer.command
        );
        return Err(SmbusError::Timeout {
            cycle: None,
            reg: cs.0,
        });
    }

    let mut entries = HEADER + 1;
    let mut ti = 0u8;
    let mut i = 0;
    while i < entries {
        let reg = read_response(port, i)?;
        let entry = check_response(reg, i, ti)?;
        ti = (ti + 1) % TI_MODULUS;

        if i == HEADER {
            entries += usize::from(entry.d);
        }
        if i >= HEADER {
            if let Err(e) = store(xfer.block, i - HEADER, entry.d) {
                tracing::warn!(
                    "smbus read failed (output too big) addr={:#04x} reg={:#04x} data_size={:#06x}",
                    xfer.address,
                    xfer.command,
                    xfer.block.len()
                );
                return Err(e);
            }
        }
        i += 1;
    }
    Ok(())
}
