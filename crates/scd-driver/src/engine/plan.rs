//! Transaction size planning.
//!
//! | protocol | write | read |
//! |---|---|---|
//! | quick | 1 | 1 |
//! | byte | 2 | 2 |
//! | byte data | 3 | 4 |
//! | word data | 4 | 5 |
//! | block data (n bytes, length prefix on the wire) | 3+n | 4+n |
//! | i2c block data (n bytes) | 2+n | 3+n |
//! | raw i2c block (n bytes) | 2+n | 3+n |
//!
//! A block-data read without the accelerated path first runs a byte-data read
//! to learn `n`, then plans again.

use crate::error::SmbusError;
use crate::protocol::{Direction, Protocol};
use scd_chip::regs::MAX_STEPS;

/// Cycle count and payload placement of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Number of request cycles, also the `ss` value of cycle 0
    pub steps: usize,
    /// Buffer index of the byte carried by cycle 2 of a write
    pub data_offset: usize,
}

impl Plan {
    /// One past the last buffer index a write reads from.
    #[must_use]
    pub const fn write_payload_end(&self) -> usize {
        if self.steps > 2 {
            self.data_offset + self.steps - 2
        } else {
            0
        }
    }
}

/// Payload length `n` a protocol takes from its buffer.
#[must_use]
pub fn payload_len(protocol: Protocol, block: &[u8]) -> usize {
    match protocol {
        Protocol::BlockData | Protocol::I2cBlockData => {
            block.first().copied().map_or(0, usize::from)
        }
        Protocol::I2cBlockMsg => block.len(),
        Protocol::Quick | Protocol::Byte | Protocol::ByteData | Protocol::WordData => 0,
    }
}

/// Plan a transaction carrying `n` payload bytes.
///
/// # Errors
///
/// Returns [`SmbusError::UnsupportedRequestShape`] when the cycle count does
/// not fit the 6-bit step-sequence field.
pub fn plan(protocol: Protocol, direction: Direction, n: usize) -> Result<Plan, SmbusError> {
    let write = direction == Direction::Write;
    let (steps, data_offset) = match protocol {
        Protocol::Quick => (1, 0),
        Protocol::Byte => (2, 0),
        Protocol::ByteData => (if write { 3 } else { 4 }, 0),
        Protocol::WordData => (if write { 4 } else { 5 }, 0),
        Protocol::BlockData => (if write { 3 + n } else { 4 + n }, 0),
        Protocol::I2cBlockData => (if write { 2 + n } else { 3 + n }, 1),
        Protocol::I2cBlockMsg => (if write { 2 + n } else { 3 + n }, 0),
    };

    if steps > MAX_STEPS as usize {
        return Err(SmbusError::unsupported(format!(
            "{protocol:?} {direction} of {n} bytes needs {steps} cycles (max {MAX_STEPS})"
        )));
    }

    Ok(Plan { steps, data_offset })
}
