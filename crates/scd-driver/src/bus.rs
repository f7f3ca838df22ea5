//! Buses: the externally visible handles transactions are submitted on.

use crate::engine::Transfer;
use crate::error::{SmbusError, TransferError};
use crate::master::Master;
use crate::protocol::{
    Direction, Functionality, Message, Protocol, SmbusData, I2C_SMBUS_BLOCK_MAX, SMBUS_BUFFER_LEN,
};
use scd_chip::TimingParams;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Result type alias for transactions
pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// One bus of a master.
///
/// Cloned `Arc<Bus>` handles stay valid after the bus is removed from the
/// registry; transactions on them fail with [`SmbusError::BusRemoved`].
#[derive(Debug)]
pub struct Bus {
    number: u32,
    id: u8,
    name: String,
    master: Arc<Master>,
    attached: AtomicBool,
    overrides: RwLock<BTreeMap<u16, TimingParams>>,
}

impl Bus {
    pub(crate) fn new(number: u32, id: u8, master: Arc<Master>) -> Self {
        let name = format!(
            "SCD {} SMBus master {} bus {}",
            master.parent(),
            master.id(),
            id
        );
        Self {
            number,
            id,
            name,
            master,
            attached: AtomicBool::new(true),
            overrides: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry-wide bus number.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Bus select within the master.
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Human-readable adapter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning master.
    #[must_use]
    pub fn master(&self) -> &Arc<Master> {
        &self.master
    }

    /// Whether the bus is still registered.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    /// Operations this bus supports.
    #[must_use]
    pub const fn functionality(&self) -> Functionality {
        Functionality::scd()
    }

    // ── Timing overrides ─────────────────────────────────────────────────────

    /// Timing for `address`, or the default when no override exists.
    #[must_use]
    pub fn timing_params(&self, address: u16) -> TimingParams {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    /// Insert or replace the override for `address`.
    pub fn set_timing_override(&self, address: u16, params: TimingParams) {
        tracing::debug!("{}: timing override addr={address:#04x} {params:?}", self.name);
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, params);
    }

    /// All overrides, ordered by address.
    #[must_use]
    pub fn timing_overrides(&self) -> Vec<(u16, TimingParams)> {
        self.overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(a, p)| (*a, *p))
            .collect()
    }

    pub(crate) fn clear_timing_overrides(&self) {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    // ── Transactions ─────────────────────────────────────────────────────────

    /// Run one SMBus transaction.
    ///
    /// Writes take their payload from `data` (`Byte` for byte-data, `Word`
    /// for word-data, `Block` for the block protocols). A block read with
    /// [`Protocol::I2cBlockData`] reads as many bytes as `data` holds; any
    /// other read ignores `data`.
    ///
    /// # Errors
    ///
    /// Returns the classified failure with the request it belonged to.
    pub fn smbus_xfer(
        &self,
        address: u16,
        direction: Direction,
        command: u8,
        protocol: Protocol,
        data: SmbusData,
    ) -> TransferResult<SmbusData> {
        let wrap = |source: SmbusError| self.transfer_error(address, direction, command, protocol, source);

        if protocol == Protocol::I2cBlockMsg {
            let mut block = match (direction, data) {
                (Direction::Write, SmbusData::Block(v)) => v,
                (Direction::Read, SmbusData::Block(v)) => vec![0; v.len()],
                (_, other) => return Err(wrap(payload_mismatch(protocol, &other))),
            };
            self.run(address, direction, command, protocol, &mut block)?;
            return Ok(match direction {
                Direction::Write => SmbusData::None,
                Direction::Read => SmbusData::Block(block),
            });
        }

        let mut block = [0u8; SMBUS_BUFFER_LEN];
        encode(protocol, direction, &data, &mut block).map_err(wrap)?;
        self.run(address, direction, command, protocol, &mut block)?;

        Ok(match direction {
            Direction::Write => SmbusData::None,
            Direction::Read => decode(protocol, &block),
        })
    }

    /// Raw i2c transfer of a command message followed by a data message.
    ///
    /// Returns the number of messages processed.
    ///
    /// # Errors
    ///
    /// - [`SmbusError::UnsupportedRequestShape`] unless exactly two messages
    /// - [`SmbusError::MalformedCommand`] unless the first is a one-byte write
    /// - Any transaction failure of the data message
    pub fn i2c_transfer(&self, msgs: &mut [Message<'_>]) -> TransferResult<usize> {
        let count = msgs.len();
        let first_address = msgs.first().map_or(0, Message::address);
        let [first, second] = msgs else {
            return Err(self.transfer_error(
                first_address,
                Direction::Write,
                0,
                Protocol::I2cBlockMsg,
                SmbusError::unsupported(format!("{count} messages, expected 2")),
            ));
        };

        let command = match first {
            Message::Write { data: [command], .. } => *command,
            other => {
                return Err(self.transfer_error(
                    other.address(),
                    other.direction(),
                    0,
                    Protocol::I2cBlockMsg,
                    SmbusError::malformed(format!(
                        "first message must write 1 command byte, got {} {} bytes",
                        other.direction(),
                        other.len()
                    )),
                ));
            }
        };

        let address = second.address();
        match second {
            Message::Write { data, .. } => {
                let mut block = data.to_vec();
                self.run(address, Direction::Write, command, Protocol::I2cBlockMsg, &mut block)?;
            }
            Message::Read { buffer, .. } => {
                self.run(address, Direction::Read, command, Protocol::I2cBlockMsg, buffer)?;
            }
        }
        Ok(count)
    }

    fn run(
        &self,
        address: u16,
        direction: Direction,
        command: u8,
        protocol: Protocol,
        block: &mut [u8],
    ) -> TransferResult<()> {
        tracing::debug!(
            "smbus {direction} do addr={address:#04x} reg={command:#04x} {protocol:?} data_size={:#06x} adapter=\"{}\"",
            block.len(),
            self.name
        );

        let mut xfer = Transfer {
            address,
            direction,
            command,
            protocol,
            block,
        };
        self.master.transfer(self, &mut xfer).map_err(|source| {
            let err = self.transfer_error(address, direction, command, protocol, source);
            if err.source.is_generic_io() {
                tracing::warn!("{err}");
            } else {
                tracing::debug!("{err}");
            }
            err
        })
    }

    fn transfer_error(
        &self,
        address: u16,
        direction: Direction,
        command: u8,
        protocol: Protocol,
        source: SmbusError,
    ) -> TransferError {
        TransferError {
            bus: self.name.clone(),
            address,
            command,
            protocol,
            direction,
            source,
        }
    }

    // ── Conveniences ─────────────────────────────────────────────────────────

    /// Quick command; the direction bit is the data.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn write_quick(&self, address: u16, direction: Direction) -> TransferResult<()> {
        self.smbus_xfer(address, direction, 0, Protocol::Quick, SmbusData::None)
            .map(drop)
    }

    /// Receive byte.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn read_byte(&self, address: u16) -> TransferResult<u8> {
        self.smbus_xfer(address, Direction::Read, 0, Protocol::Byte, SmbusData::None)
            .map(|d| d.as_byte().unwrap_or_default())
    }

    /// Send byte.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn write_byte(&self, address: u16, value: u8) -> TransferResult<()> {
        self.smbus_xfer(address, Direction::Write, value, Protocol::Byte, SmbusData::None)
            .map(drop)
    }

    /// Read the byte register `command`.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn read_byte_data(&self, address: u16, command: u8) -> TransferResult<u8> {
        self.smbus_xfer(address, Direction::Read, command, Protocol::ByteData, SmbusData::None)
            .map(|d| d.as_byte().unwrap_or_default())
    }

    /// Write the byte register `command`.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn write_byte_data(&self, address: u16, command: u8, value: u8) -> TransferResult<()> {
        self.smbus_xfer(
            address,
            Direction::Write,
            command,
            Protocol::ByteData,
            SmbusData::Byte(value),
        )
        .map(drop)
    }

    /// Read the little-endian word register `command`.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn read_word_data(&self, address: u16, command: u8) -> TransferResult<u16> {
        self.smbus_xfer(address, Direction::Read, command, Protocol::WordData, SmbusData::None)
            .map(|d| d.as_word().unwrap_or_default())
    }

    /// Write the little-endian word register `command`.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn write_word_data(&self, address: u16, command: u8, value: u16) -> TransferResult<()> {
        self.smbus_xfer(
            address,
            Direction::Write,
            command,
            Protocol::WordData,
            SmbusData::Word(value),
        )
        .map(drop)
    }

    /// Read a length-prefixed block; the device decides the length.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn read_block_data(&self, address: u16, command: u8) -> TransferResult<Vec<u8>> {
        self.smbus_xfer(address, Direction::Read, command, Protocol::BlockData, SmbusData::None)
            .map(|d| d.into_block().unwrap_or_default())
    }

    /// Write a length-prefixed block of at most 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn write_block_data(&self, address: u16, command: u8, values: &[u8]) -> TransferResult<()> {
        self.smbus_xfer(
            address,
            Direction::Write,
            command,
            Protocol::BlockData,
            SmbusData::Block(values.to_vec()),
        )
        .map(drop)
    }

    /// Read `len` bytes starting at register `command`.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn read_i2c_block_data(&self, address: u16, command: u8, len: usize) -> TransferResult<Vec<u8>> {
        self.smbus_xfer(
            address,
            Direction::Read,
            command,
            Protocol::I2cBlockData,
            SmbusData::Block(vec![0; len]),
        )
        .map(|d| d.into_block().unwrap_or_default())
    }

    /// Write bytes starting at register `command`, no length on the wire.
    ///
    /// # Errors
    ///
    /// Returns the transaction failure.
    pub fn write_i2c_block_data(&self, address: u16, command: u8, values: &[u8]) -> TransferResult<()> {
        self.smbus_xfer(
            address,
            Direction::Write,
            command,
            Protocol::I2cBlockData,
            SmbusData::Block(values.to_vec()),
        )
        .map(drop)
    }
}

fn payload_mismatch(protocol: Protocol, data: &SmbusData) -> SmbusError {
    SmbusError::unsupported(format!("{protocol:?} cannot carry {data:?}"))
}

/// Lay `data` out in the engine buffer.
fn encode(
    protocol: Protocol,
    direction: Direction,
    data: &SmbusData,
    block: &mut [u8; SMBUS_BUFFER_LEN],
) -> Result<(), SmbusError> {
    let block_len = |len: usize| {
        u8::try_from(len)
            .ok()
            .filter(|_| len <= I2C_SMBUS_BLOCK_MAX)
            .ok_or_else(|| {
                SmbusError::unsupported(format!(
                    "block of {len} bytes exceeds {I2C_SMBUS_BLOCK_MAX}"
                ))
            })
    };

    match (protocol, direction, data) {
        (Protocol::Quick | Protocol::Byte, _, _)
        | (
            Protocol::ByteData | Protocol::WordData | Protocol::BlockData,
            Direction::Read,
            _,
        ) => {}
        (Protocol::ByteData, Direction::Write, SmbusData::Byte(b)) => block[0] = *b,
        (Protocol::WordData, Direction::Write, SmbusData::Word(w)) => {
            block[..2].copy_from_slice(&w.to_le_bytes());
        }
        (Protocol::BlockData | Protocol::I2cBlockData, Direction::Write, SmbusData::Block(v)) => {
            block[0] = block_len(v.len())?;
            block[1..=v.len()].copy_from_slice(v);
        }
        (Protocol::I2cBlockData, Direction::Read, SmbusData::Block(v)) => {
            block[0] = block_len(v.len())?;
        }
        (protocol, _, other) => return Err(payload_mismatch(protocol, other)),
    }
    Ok(())
}

/// Extract the result of a read from the engine buffer.
fn decode(protocol: Protocol, block: &[u8; SMBUS_BUFFER_LEN]) -> SmbusData {
    match protocol {
        Protocol::Quick => SmbusData::None,
        Protocol::Byte | Protocol::ByteData => SmbusData::Byte(block[0]),
        Protocol::WordData => SmbusData::Word(u16::from_le_bytes([block[0], block[1]])),
        Protocol::BlockData | Protocol::I2cBlockData | Protocol::I2cBlockMsg => {
            // the block read fits by construction: a longer one fails in the engine
            let len = usize::from(block[0]).min(SMBUS_BUFFER_LEN - 1);
            SmbusData::Block(block[1..=len].to_vec())
        }
    }
}
