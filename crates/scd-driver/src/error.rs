//! Error types for SCD SMBus operations

use crate::protocol::{Direction, Protocol};
use thiserror::Error;

/// Result type alias for registry and bus management operations
pub type Result<T> = std::result::Result<T, ScdError>;

/// Classified failure of a single SMBus transaction.
///
/// Every variant is raised at its point of origin in the engine and carries
/// the cycle index and raw register value that exposed it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmbusError {
    /// The response FIFO stayed empty after every re-read
    #[error("response fifo still empty after {reads} reads (cycle {cycle})")]
    FifoEmptyAfterRetries {
        /// Cycle whose response never arrived
        cycle: usize,
        /// Number of reads performed
        reads: u32,
    },

    /// The addressed device did not acknowledge
    #[error("ack error on cycle {cycle} (reg={reg:#010x})")]
    AckError {
        /// Failing cycle
        cycle: usize,
        /// Raw response register
        reg: u32,
    },

    /// Bus timeout, either reported in a response entry or while waiting for
    /// an accelerated block read to complete
    #[error("timeout on cycle {cycle:?} (reg={reg:#010x})")]
    Timeout {
        /// Failing cycle, `None` when the block-read busy flag never cleared
        cycle: Option<usize>,
        /// Raw response or control/status register
        reg: u32,
    },

    /// Arbitration lost on the bus
    #[error("bus conflict on cycle {cycle} (reg={reg:#010x})")]
    BusConflict {
        /// Failing cycle
        cycle: usize,
        /// Raw response register
        reg: u32,
    },

    /// The entry was flushed by a master reset
    #[error("response flushed on cycle {cycle} (reg={reg:#010x})")]
    Flushed {
        /// Failing cycle
        cycle: usize,
        /// Raw response register
        reg: u32,
    },

    /// Response does not belong to the request that was issued
    #[error("transaction id mismatch on cycle {cycle}: expected {expected}, got {got} (reg={reg:#010x})")]
    TransactionIdMismatch {
        /// Failing cycle
        cycle: usize,
        /// Transaction id of the request
        expected: u8,
        /// Transaction id found in the response
        got: u8,
        /// Raw response register
        reg: u32,
    },

    /// The response FIFO overflowed
    #[error("response fifo overflow on cycle {cycle} (reg={reg:#010x})")]
    FifoOverflow {
        /// Failing cycle
        cycle: usize,
        /// Raw response register
        reg: u32,
    },

    /// The device returned more bytes than the destination can hold
    #[error("output too big: byte {index} does not fit a {capacity}-byte buffer")]
    BufferTooSmall {
        /// Buffer index that would have been written
        index: usize,
        /// Destination capacity
        capacity: usize,
    },

    /// The request cannot be expressed with this bus-master
    #[error("unsupported request: {reason}")]
    UnsupportedRequestShape {
        /// What is wrong with the request
        reason: String,
    },

    /// The command message of a raw transfer is not a single written byte
    #[error("malformed command: {reason}")]
    MalformedCommand {
        /// What is wrong with the command message
        reason: String,
    },

    /// The register backend rejected an access
    #[error("register access at {offset:#x} failed: {reason}")]
    Register {
        /// Absolute register offset
        offset: u32,
        /// Backend failure
        reason: String,
    },

    /// The bus was unregistered before the transaction could start
    #[error("bus has been removed")]
    BusRemoved,
}

impl SmbusError {
    /// Failures reported by the bus itself. Only these are retried.
    #[must_use]
    pub const fn is_generic_io(&self) -> bool {
        matches!(
            self,
            Self::FifoEmptyAfterRetries { .. }
                | Self::AckError { .. }
                | Self::Timeout { .. }
                | Self::BusConflict { .. }
                | Self::Flushed { .. }
                | Self::TransactionIdMismatch { .. }
                | Self::FifoOverflow { .. }
        )
    }

    /// Short tag used in log lines.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::FifoEmptyAfterRetries { .. } => "fe",
            Self::AckError { .. } => "ack",
            Self::Timeout { .. } => "timeout",
            Self::BusConflict { .. } => "conflict",
            Self::Flushed { .. } => "flush",
            Self::TransactionIdMismatch { .. } => "tid",
            Self::FifoOverflow { .. } => "overflow",
            Self::BufferTooSmall { .. } => "buffer",
            Self::UnsupportedRequestShape { .. } => "shape",
            Self::MalformedCommand { .. } => "command",
            Self::Register { .. } => "register",
            Self::BusRemoved => "removed",
        }
    }

    /// Create an unsupported request error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedRequestShape {
            reason: reason.into(),
        }
    }

    /// Create a malformed command error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedCommand {
            reason: reason.into(),
        }
    }

    /// Create a register access error
    pub fn register(offset: u32, reason: impl Into<String>) -> Self {
        Self::Register {
            offset,
            reason: reason.into(),
        }
    }
}

/// A transaction that failed after retries, with the request it belonged to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("smbus {direction} failed addr={address:#04x} reg={command:#04x} {protocol:?} adapter=\"{bus}\": {source}")]
pub struct TransferError {
    /// Bus name
    pub bus: String,
    /// Device address
    pub address: u16,
    /// Command byte
    pub command: u8,
    /// Transaction shape
    pub protocol: Protocol,
    /// Transfer direction
    pub direction: Direction,
    /// Final classification
    #[source]
    pub source: SmbusError,
}

impl TransferError {
    /// Classification of the failure.
    #[must_use]
    pub const fn kind(&self) -> &SmbusError {
        &self.source
    }
}

/// Errors from registry and bus management operations
#[derive(Debug, Error)]
pub enum ScdError {
    /// An object with the same identity is already registered
    #[error("{what} already exists")]
    AlreadyExists {
        /// Description of the duplicate
        what: String,
    },

    /// Lookup failed
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing object
        what: String,
    },

    /// A parameter is out of range
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Reason for rejection
        reason: String,
    },

    /// A configuration line could not be applied
    #[error("config line {line}: {reason}")]
    InvalidConfig {
        /// 1-based line number
        line: usize,
        /// Reason for rejection
        reason: String,
    },

    /// Hardware access failed outside a transaction (reset, version probe)
    #[error("hardware access failed: {source}")]
    Smbus {
        /// Underlying failure
        #[from]
        source: SmbusError,
    },

    /// A transaction failed
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// I/O error while mapping registers
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl ScdError {
    /// Create an already-exists error
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Classification of a failed transaction, if this is one.
    #[must_use]
    pub const fn smbus_kind(&self) -> Option<&SmbusError> {
        match self {
            Self::Smbus { source } => Some(source),
            Self::Transfer(e) => Some(&e.source),
            _ => None,
        }
    }
}
