//! Response collection and classification.

use super::plan::Plan;
use super::{sleep, MasterPort, Transfer};
use crate::error::SmbusError;
use crate::protocol::Protocol;
use scd_chip::regs::{ResponseEntry, TI_MODULUS};

/// Pop one response entry, re-reading while the FIFO reports empty.
pub(super) fn read_response(port: &MasterPort<'_>, cycle: usize) -> Result<u32, SmbusError> {
    let config = port.config();
    let reads = config.fifo_empty_reads.max(1);

    let mut reg = port.read_response_raw()?;
    let mut done = 1;
    while ResponseEntry::unpack(reg).fe && done < reads {
        sleep(config.fifo_empty_delay);
        reg = port.read_response_raw()?;
        done += 1;
    }

    if ResponseEntry::unpack(reg).fe {
        tracing::debug!("smbus response: fifo still empty after {done} reads");
        return Err(SmbusError::FifoEmptyAfterRetries { cycle, reads: done });
    }
    Ok(reg)
}

/// Classify a response entry. The first matching condition wins.
pub(super) fn check_response(reg: u32, cycle: usize, expected_ti: u8) -> Result<ResponseEntry, SmbusError> {
    let entry = ResponseEntry::unpack(reg);

    let err = if entry.ack_error {
        SmbusError::AckError { cycle, reg }
    } else if entry.timeout {
        SmbusError::Timeout {
            cycle: Some(cycle),
            reg,
        }
    } else if entry.bus_conflict {
        SmbusError::BusConflict { cycle, reg }
    } else if entry.flushed {
        SmbusError::Flushed { cycle, reg }
    } else if entry.ti != expected_ti {
        SmbusError::TransactionIdMismatch {
            cycle,
            expected: expected_ti,
            got: entry.ti,
            reg,
        }
    } else if entry.foe {
        SmbusError::FifoOverflow { cycle, reg }
    } else {
        return Ok(entry);
    };

    tracing::debug!("smbus response: {} error. reg={reg:#010x}", err.tag());
    Err(err)
}

/// Read and check one response per planned cycle, storing read data into
/// the transfer buffer.
pub(super) fn collect(port: &MasterPort<'_>, xfer: &mut Transfer<'_>, plan: &Plan) -> Result<(), SmbusError> {
    let read = xfer.direction.is_read();
    let steps = plan.steps;

    let mut ti = 0u8;
    for i in 0..steps {
        let reg = read_response(port, i)?;
        let entry = check_response(reg, i, ti)?;
        ti = (ti + 1) % TI_MODULUS;

        if !read {
            continue;
        }

        match xfer.protocol {
            Protocol::Quick => {}
            Protocol::Byte | Protocol::ByteData => {
                if i == steps - 1 {
                    store(xfer.block, 0, entry.d)?;
                }
            }
            Protocol::WordData => {
                if i == steps - 2 {
                    store(xfer.block, 0, entry.d)?;
                } else if i == steps - 1 {
                    store(xfer.block, 1, entry.d)?;
                }
            }
            Protocol::I2cBlockData => {
                if i >= 3 {
                    store(xfer.block, i - 2, entry.d)?;
                }
            }
            Protocol::BlockData | Protocol::I2cBlockMsg => {
                if i >= 3 {
                    store(xfer.block, i - 3, entry.d)?;
                }
            }
        }
    }
    Ok(())
}

pub(super) fn store(block: &mut [u8], index: usize, value: u8) -> Result<(), SmbusError> {
    let capacity = block.len();
    let slot = block
        .get_mut(index)
        .ok_or(SmbusError::BufferTooSmall { index, capacity })?;
    *slot = value;
    Ok(())
}
