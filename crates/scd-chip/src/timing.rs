//! Per-device bus timing.
//!
//! Every request cycle carries a clock timing class `t`; the final cycle of a
//! transaction also carries a data-width select (`datw` for writes, `datr`
//! for reads) and the extended-device flag. Slow devices get an override
//! keyed by their bus address; everything else uses [`TimingParams::DEFAULT`].

/// Timing parameters applied to transactions addressed to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimingParams {
    /// Clock timing class. 0-3 select a hardware profile, anything above
    /// falls back to a flat block-read budget.
    pub t: u8,
    /// Data-width select for writes.
    pub datw: u8,
    /// Data-width select for reads.
    pub datr: u8,
    /// Extended-device flag.
    pub ed: u8,
}

impl TimingParams {
    /// Process-wide default: `t=1, datw=3, datr=3, ed=0`.
    pub const DEFAULT: Self = Self {
        t: 1,
        datw: 3,
        datr: 3,
        ed: 0,
    };

    /// Block-read completion budget, in poll steps, for this timing class.
    #[must_use]
    pub const fn block_read_budget(&self) -> u32 {
        block_read_budget(self.t)
    }
}

impl Default for TimingParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Budget for classes above 3.
pub const FALLBACK_BLOCK_READ_BUDGET: u32 = 100;

/// Budgets for classes 0-3: bus time for a 32-byte block plus 5 steps margin.
pub const BLOCK_READ_BUDGETS: [u32; 4] = [5, 35 + 5, 500 + 5, 1000 + 5];

/// Number of poll steps the accelerated block read may stay busy.
#[must_use]
pub const fn block_read_budget(t: u8) -> u32 {
    match t {
        0..=3 => BLOCK_READ_BUDGETS[t as usize],
        _ => FALLBACK_BLOCK_READ_BUDGET,
    }
}
