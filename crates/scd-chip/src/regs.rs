//! Register map of one SMBus bus-master.
//!
//! Each master occupies a small window of the device BAR. Offsets are
//! relative to the master's base address.
//!
//! ```text
//! Request (write)          LSB first
//!   d[8] ss[6] ed[1] br[1] dat[2] t[2] sp[1] da[1] dod[1] st[1] bs[4] ti[4]
//!
//! Control/status
//!   reserved[13] foe[1] reserved[12] brb[1] reserved[1] ver[2] fe[1] reset[1]
//!
//! Response (read, pops the FIFO)
//!   d[8] bus_conflict[1] timeout[1] ack_error[1] flushed[1] ti[4] ss[6]
//!   reserved[8] foe[1] fe[1]
//! ```

// ── Offsets ──────────────────────────────────────────────────────────────────

/// Request register, one write per protocol cycle.
pub const REQUEST: u32 = 0x10;
/// Control/status register.
pub const CONTROL_STATUS: u32 = 0x20;
/// Response register, head of the response FIFO.
pub const RESPONSE: u32 = 0x30;

/// Bytes a master window must span for all three registers to be mapped.
pub const MASTER_WINDOW: u32 = RESPONSE + 4;

// ── Bit-field helper ─────────────────────────────────────────────────────────

/// A contiguous bit-field inside a 32-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Position of the least significant bit.
    pub shift: u32,
    /// Width in bits.
    pub width: u32,
}

impl Field {
    /// Declare a field of `width` bits starting at bit `shift`.
    #[must_use]
    pub const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    /// Mask of the field value before shifting.
    #[must_use]
    pub const fn max(self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// Extract the field from a register value.
    #[must_use]
    pub const fn get(self, reg: u32) -> u32 {
        (reg >> self.shift) & self.max()
    }

    /// Return `reg` with the field replaced by `value` (truncated to width).
    #[must_use]
    pub const fn set(self, reg: u32, value: u32) -> u32 {
        let mask = self.max() << self.shift;
        (reg & !mask) | ((value << self.shift) & mask)
    }

    /// Single-bit helper.
    #[must_use]
    pub const fn flag(self, reg: u32) -> bool {
        self.get(reg) != 0
    }
}

/// Request register fields.
pub mod request {
    use super::Field;

    /// Data byte.
    pub const D: Field = Field::new(0, 8);
    /// Step-sequence length, only meaningful on the first cycle.
    pub const SS: Field = Field::new(8, 6);
    /// Extended-device.
    pub const ED: Field = Field::new(14, 1);
    /// Bus-reset request; starts the accelerated block read.
    pub const BR: Field = Field::new(15, 1);
    /// Data-width timing select.
    pub const DAT: Field = Field::new(16, 2);
    /// Clock timing class.
    pub const T: Field = Field::new(18, 2);
    /// Stop.
    pub const SP: Field = Field::new(20, 1);
    /// Data phase, always `!(dod || sp)`.
    pub const DA: Field = Field::new(21, 1);
    /// Device drives the bus.
    pub const DOD: Field = Field::new(22, 1);
    /// Start.
    pub const ST: Field = Field::new(23, 1);
    /// Bus select.
    pub const BS: Field = Field::new(24, 4);
    /// Transaction id.
    pub const TI: Field = Field::new(28, 4);
}

/// Control/status register fields.
pub mod control_status {
    use super::Field;

    /// FIFO overflow; written 1 together with reset to flush.
    pub const FOE: Field = Field::new(13, 1);
    /// Bus-read-busy, set while an accelerated block read runs.
    pub const BRB: Field = Field::new(26, 1);
    /// Protocol version reported by the hardware.
    pub const VER: Field = Field::new(28, 2);
    /// FIFO empty.
    pub const FE: Field = Field::new(30, 1);
    /// Master reset.
    pub const RESET: Field = Field::new(31, 1);
}

/// Response register fields.
pub mod response {
    use super::Field;

    /// Data byte.
    pub const D: Field = Field::new(0, 8);
    /// Bus conflict (arbitration lost).
    pub const BUS_CONFLICT: Field = Field::new(8, 1);
    /// Bus timeout.
    pub const TIMEOUT: Field = Field::new(9, 1);
    /// Missing acknowledge.
    pub const ACK_ERROR: Field = Field::new(10, 1);
    /// Entry flushed by a reset.
    pub const FLUSHED: Field = Field::new(11, 1);
    /// Transaction id echoed from the request.
    pub const TI: Field = Field::new(12, 4);
    /// Step-sequence length echoed from the request.
    pub const SS: Field = Field::new(16, 6);
    /// FIFO overflow.
    pub const FOE: Field = Field::new(30, 1);
    /// FIFO empty; the rest of the entry is invalid.
    pub const FE: Field = Field::new(31, 1);
}

/// Transaction ids are four bits wide and wrap.
pub const TI_MODULUS: u8 = 16;

/// Largest step-sequence length the `ss` field can carry.
pub const MAX_STEPS: u32 = request::SS.max();

// ── Request cycle ────────────────────────────────────────────────────────────

/// One request-register write.
///
/// `da` is not stored: it is derived from `dod` and `sp` when packing, so a
/// cycle can never carry an inconsistent data-phase bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCycle {
    /// Data byte.
    pub d: u8,
    /// Step-sequence length (6 bits).
    pub ss: u8,
    /// Extended-device.
    pub ed: bool,
    /// Bus-reset request.
    pub br: bool,
    /// Timing select (2 bits).
    pub dat: u8,
    /// Clock timing class (2 bits on the wire).
    pub t: u8,
    /// Stop.
    pub sp: bool,
    /// Device drives the bus.
    pub dod: bool,
    /// Start.
    pub st: bool,
    /// Bus select (4 bits).
    pub bs: u8,
    /// Transaction id (4 bits).
    pub ti: u8,
}

impl RequestCycle {
    /// Data-phase bit as written to the hardware.
    #[must_use]
    pub const fn da(&self) -> bool {
        !(self.dod || self.sp)
    }

    /// Pack into the register value. Over-wide fields are truncated.
    #[must_use]
    pub fn pack(&self) -> u32 {
        use request::{BR, BS, D, DA, DAT, DOD, ED, SP, SS, ST, T, TI};

        let mut reg = 0;
        reg = D.set(reg, u32::from(self.d));
        reg = SS.set(reg, u32::from(self.ss));
        reg = ED.set(reg, u32::from(self.ed));
        reg = BR.set(reg, u32::from(self.br));
        reg = DAT.set(reg, u32::from(self.dat));
        reg = T.set(reg, u32::from(self.t));
        reg = SP.set(reg, u32::from(self.sp));
        reg = DA.set(reg, u32::from(self.da()));
        reg = DOD.set(reg, u32::from(self.dod));
        reg = ST.set(reg, u32::from(self.st));
        reg = BS.set(reg, u32::from(self.bs));
        TI.set(reg, u32::from(self.ti))
    }

    /// Decode a register value. The `da` bit is dropped.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn unpack(reg: u32) -> Self {
        use request::{BR, BS, D, DAT, DOD, ED, SP, SS, ST, T, TI};

        Self {
            d: D.get(reg) as u8,
            ss: SS.get(reg) as u8,
            ed: ED.flag(reg),
            br: BR.flag(reg),
            dat: DAT.get(reg) as u8,
            t: T.get(reg) as u8,
            sp: SP.flag(reg),
            dod: DOD.flag(reg),
            st: ST.flag(reg),
            bs: BS.get(reg) as u8,
            ti: TI.get(reg) as u8,
        }
    }

    /// Data-phase bit of a raw register value, as the hardware sees it.
    #[must_use]
    pub const fn raw_da(reg: u32) -> bool {
        request::DA.flag(reg)
    }
}

// ── Control/status ───────────────────────────────────────────────────────────

/// Control/status register value.
///
/// Kept as the raw word so reserved bits survive a read-modify-write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlStatus(pub u32);

impl ControlStatus {
    /// Bus-read-busy.
    #[must_use]
    pub const fn brb(self) -> bool {
        control_status::BRB.flag(self.0)
    }

    /// Hardware protocol version (0-3).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn version(self) -> u8 {
        control_status::VER.get(self.0) as u8
    }

    /// FIFO empty.
    #[must_use]
    pub const fn fe(self) -> bool {
        control_status::FE.flag(self.0)
    }

    /// FIFO overflow / flush bit.
    #[must_use]
    pub const fn foe(self) -> bool {
        control_status::FOE.flag(self.0)
    }

    /// Reset bit.
    #[must_use]
    pub const fn reset(self) -> bool {
        control_status::RESET.flag(self.0)
    }

    /// Copy with the reset bit changed.
    #[must_use]
    pub const fn with_reset(self, on: bool) -> Self {
        Self(control_status::RESET.set(self.0, on as u32))
    }

    /// Copy with the flush (foe) bit changed.
    #[must_use]
    pub const fn with_flush(self, on: bool) -> Self {
        Self(control_status::FOE.set(self.0, on as u32))
    }

    /// Copy with the bus-read-busy bit changed.
    #[must_use]
    pub const fn with_brb(self, on: bool) -> Self {
        Self(control_status::BRB.set(self.0, on as u32))
    }

    /// Copy with the version field changed.
    #[must_use]
    pub const fn with_version(self, version: u8) -> Self {
        Self(control_status::VER.set(self.0, version as u32))
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// One decoded response FIFO entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseEntry {
    /// Data byte.
    pub d: u8,
    /// Bus conflict.
    pub bus_conflict: bool,
    /// Bus timeout.
    pub timeout: bool,
    /// Missing acknowledge.
    pub ack_error: bool,
    /// Flushed.
    pub flushed: bool,
    /// Transaction id.
    pub ti: u8,
    /// Echoed step-sequence length.
    pub ss: u8,
    /// FIFO overflow.
    pub foe: bool,
    /// FIFO empty.
    pub fe: bool,
}

impl ResponseEntry {
    /// Decode a response register value.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn unpack(reg: u32) -> Self {
        use response::{ACK_ERROR, BUS_CONFLICT, D, FE, FLUSHED, FOE, SS, TI, TIMEOUT};

        Self {
            d: D.get(reg) as u8,
            bus_conflict: BUS_CONFLICT.flag(reg),
            timeout: TIMEOUT.flag(reg),
            ack_error: ACK_ERROR.flag(reg),
            flushed: FLUSHED.flag(reg),
            ti: TI.get(reg) as u8,
            ss: SS.get(reg) as u8,
            foe: FOE.flag(reg),
            fe: FE.flag(reg),
        }
    }

    /// Encode, as the hardware would present the entry.
    #[must_use]
    pub fn pack(&self) -> u32 {
        use response::{ACK_ERROR, BUS_CONFLICT, D, FE, FLUSHED, FOE, SS, TI, TIMEOUT};

        let mut reg = 0;
        reg = D.set(reg, u32::from(self.d));
        reg = BUS_CONFLICT.set(reg, u32::from(self.bus_conflict));
        reg = TIMEOUT.set(reg, u32::from(self.timeout));
        reg = ACK_ERROR.set(reg, u32::from(self.ack_error));
        reg = FLUSHED.set(reg, u32::from(self.flushed));
        reg = TI.set(reg, u32::from(self.ti));
        reg = SS.set(reg, u32::from(self.ss));
        reg = FOE.set(reg, u32::from(self.foe));
        FE.set(reg, u32::from(self.fe))
    }

    /// The value the response register reads when the FIFO is empty.
    #[must_use]
    pub const fn empty() -> u32 {
        response::FE.set(0, 1)
    }
}
