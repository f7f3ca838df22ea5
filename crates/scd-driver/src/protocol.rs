//! SMBus request vocabulary shared by the engine and its callers.

use bitflags::bitflags;
use std::fmt;

/// Largest SMBus block payload.
pub const I2C_SMBUS_BLOCK_MAX: usize = 32;

/// Capacity of the engine buffer for SMBus calls: length byte, payload, PEC.
pub const SMBUS_BUFFER_LEN: usize = I2C_SMBUS_BLOCK_MAX + 2;

/// Transfer direction, encoded as the address LSB on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to device
    Write,
    /// Device to host
    Read,
}

impl Direction {
    /// Address bit for this direction.
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Self::Write => 0,
            Self::Read => 1,
        }
    }

    /// Whether this is a read.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Read)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

/// Shape of an SMBus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Address only; the direction bit is the data
    Quick,
    /// Single byte without command (send/receive byte)
    Byte,
    /// Command byte plus one data byte
    ByteData,
    /// Command byte plus a little-endian word
    WordData,
    /// Command byte plus a length-prefixed block
    BlockData,
    /// Command byte plus a block whose length the caller supplies
    I2cBlockData,
    /// Raw i2c block: the second message of a command/data transfer
    I2cBlockMsg,
}

/// Data exchanged by an SMBus transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SmbusData {
    /// No payload (quick commands, writes returning nothing)
    #[default]
    None,
    /// One byte
    Byte(u8),
    /// One word
    Word(u16),
    /// Block payload, without length prefix
    Block(Vec<u8>),
}

impl SmbusData {
    /// The byte, if this is a byte payload.
    #[must_use]
    pub const fn as_byte(&self) -> Option<u8> {
        match self {
            Self::Byte(b) => Some(*b),
            _ => None,
        }
    }

    /// The word, if this is a word payload.
    #[must_use]
    pub const fn as_word(&self) -> Option<u16> {
        match self {
            Self::Word(w) => Some(*w),
            _ => None,
        }
    }

    /// Consume into block bytes; `None` for non-block payloads.
    #[must_use]
    pub fn into_block(self) -> Option<Vec<u8>> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }
}

/// One message of a raw i2c transfer.
#[derive(Debug)]
pub enum Message<'a> {
    /// Write the bytes to `address`
    Write {
        /// 7-bit device address
        address: u16,
        /// Bytes to send
        data: &'a [u8],
    },
    /// Fill the buffer from `address`
    Read {
        /// 7-bit device address
        address: u16,
        /// Destination; its length is the read length
        buffer: &'a mut [u8],
    },
}

impl Message<'_> {
    /// Target address.
    #[must_use]
    pub const fn address(&self) -> u16 {
        match self {
            Self::Write { address, .. } | Self::Read { address, .. } => *address,
        }
    }

    /// Direction of the message.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        match self {
            Self::Write { .. } => Direction::Write,
            Self::Read { .. } => Direction::Read,
        }
    }

    /// Number of data bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Write { data, .. } => data.len(),
            Self::Read { buffer, .. } => buffer.len(),
        }
    }

    /// Whether the message carries no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

bitflags! {
    /// What a bus can do, using the Linux i2c functionality bit values.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Functionality: u32 {
        /// Plain i2c transfers
        const I2C = 0x0000_0001;
        /// Quick command
        const SMBUS_QUICK = 0x0001_0000;
        /// Receive byte
        const SMBUS_READ_BYTE = 0x0002_0000;
        /// Send byte
        const SMBUS_WRITE_BYTE = 0x0004_0000;
        /// Read byte data
        const SMBUS_READ_BYTE_DATA = 0x0008_0000;
        /// Write byte data
        const SMBUS_WRITE_BYTE_DATA = 0x0010_0000;
        /// Read word data
        const SMBUS_READ_WORD_DATA = 0x0020_0000;
        /// Write word data
        const SMBUS_WRITE_WORD_DATA = 0x0040_0000;
        /// Read block data
        const SMBUS_READ_BLOCK_DATA = 0x0100_0000;
        /// Write block data
        const SMBUS_WRITE_BLOCK_DATA = 0x0200_0000;
        /// Read i2c block
        const SMBUS_READ_I2C_BLOCK = 0x0400_0000;
        /// Write i2c block
        const SMBUS_WRITE_I2C_BLOCK = 0x0800_0000;

        /// Send and receive byte
        const SMBUS_BYTE = Self::SMBUS_READ_BYTE.bits() | Self::SMBUS_WRITE_BYTE.bits();
        /// Byte data both ways
        const SMBUS_BYTE_DATA = Self::SMBUS_READ_BYTE_DATA.bits() | Self::SMBUS_WRITE_BYTE_DATA.bits();
        /// Word data both ways
        const SMBUS_WORD_DATA = Self::SMBUS_READ_WORD_DATA.bits() | Self::SMBUS_WRITE_WORD_DATA.bits();
        /// Block data both ways
        const SMBUS_BLOCK_DATA = Self::SMBUS_READ_BLOCK_DATA.bits() | Self::SMBUS_WRITE_BLOCK_DATA.bits();
        /// I2c block both ways
        const SMBUS_I2C_BLOCK = Self::SMBUS_READ_I2C_BLOCK.bits() | Self::SMBUS_WRITE_I2C_BLOCK.bits();
    }
}

impl Functionality {
    /// Everything the SCD bus-master synthesizes.
    #[must_use]
    pub const fn scd() -> Self {
        Self::SMBUS_QUICK
            .union(Self::SMBUS_BYTE)
            .union(Self::SMBUS_BYTE_DATA)
            .union(Self::SMBUS_WORD_DATA)
            .union(Self::SMBUS_I2C_BLOCK)
            .union(Self::SMBUS_BLOCK_DATA)
            .union(Self::I2C)
    }
}
