//! Engine configuration and timing-override records.

use crate::error::ScdError;
use scd_chip::TimingParams;
use std::str::FromStr;
use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default number of buses a master exposes.
pub const DEFAULT_BUS_COUNT: u32 = 8;

/// Configuration lines must be shorter than this.
pub const MAX_CONFIG_LINE_SIZE: usize = 100;

/// Delays and bounds used by every master of a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Retries after the first failed attempt of a transaction
    pub max_retries: u32,

    /// Reads of the response register before an empty FIFO is fatal
    pub fifo_empty_reads: u32,

    /// Delay between reads of an empty FIFO
    pub fifo_empty_delay: Duration,

    /// Time the reset bit stays asserted
    pub reset_settle: Duration,

    /// One block-read poll step (the unit of the block-read budget)
    pub block_read_poll_step: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            fifo_empty_reads: 10,
            fifo_empty_delay: Duration::from_millis(10),
            reset_settle: Duration::from_millis(10),
            block_read_poll_step: Duration::from_millis(1),
        }
    }
}

impl EngineConfig {
    /// Default bounds with every delay set to zero.
    ///
    /// Meant for the simulated backend, where waiting buys nothing.
    #[must_use]
    pub fn without_delays() -> Self {
        Self {
            fifo_empty_delay: Duration::ZERO,
            reset_settle: Duration::ZERO,
            block_read_poll_step: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the retry bound.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the number of empty-FIFO reads.
    #[must_use]
    pub fn with_fifo_empty_reads(mut self, reads: u32) -> Self {
        self.fifo_empty_reads = reads.max(1);
        self
    }

    /// Set the block-read poll step.
    #[must_use]
    pub fn with_poll_step(mut self, step: Duration) -> Self {
        self.block_read_poll_step = step;
        self
    }
}

/// One `<bus> <addr> <t> <datr> <datw> <ed>` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingOverride {
    /// Registry bus number
    pub bus: u16,
    /// Device address
    pub address: u16,
    /// Parameters for that device
    pub params: TimingParams,
}

impl FromStr for TimingOverride {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        if line.len() >= MAX_CONFIG_LINE_SIZE {
            return Err("smbus_tweak line is too long".to_string());
        }

        let mut fields = line.split_whitespace();
        let mut next = |name: &str| {
            fields
                .next()
                .ok_or_else(|| format!("missing field `{name}`"))
                .and_then(|tok| parse_c_int(tok).map_err(|e| format!("field `{name}`: {e}")))
        };

        let bus = narrow::<u16>(next("bus")?, "bus")?;
        let address = narrow::<u16>(next("addr")?, "addr")?;
        let t = narrow::<u8>(next("t")?, "t")?;
        let datr = narrow::<u8>(next("datr")?, "datr")?;
        let datw = narrow::<u8>(next("datw")?, "datw")?;
        let ed = narrow::<u8>(next("ed")?, "ed")?;

        if let Some(extra) = fields.next() {
            return Err(format!("unexpected trailing field `{extra}`"));
        }

        Ok(Self {
            bus,
            address,
            params: TimingParams { t, datw, datr, ed },
        })
    }
}

fn narrow<T: TryFrom<u64>>(value: u64, name: &str) -> Result<T, String> {
    T::try_from(value).map_err(|_| format!("field `{name}`: {value:#x} out of range"))
}

/// Parse an unsigned integer in C notation: `0x` hex, leading `0` octal,
/// otherwise decimal.
///
/// # Errors
///
/// Returns a description of the problem if `token` is not a valid number.
pub fn parse_c_int(token: &str) -> Result<u64, String> {
    let parsed = if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16)
    } else if token.len() > 1 && token.starts_with('0') {
        u64::from_str_radix(&token[1..], 8)
    } else {
        token.parse::<u64>()
    };
    parsed.map_err(|e| format!("`{token}`: {e}"))
}

/// Parse every non-blank line of `text`, keeping its 1-based line number.
///
/// # Errors
///
/// Returns [`ScdError::InvalidConfig`] for the first line that does not parse.
pub fn parse_tweaks(text: &str) -> Result<Vec<(usize, TimingOverride)>, ScdError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            line.parse::<TimingOverride>()
                .map(|o| (i + 1, o))
                .map_err(|reason| ScdError::InvalidConfig { line: i + 1, reason })
        })
        .collect()
}
