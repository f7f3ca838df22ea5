//! Simulated SCD register space
//!
//! A software model of the bus-master used by the test-suite and the CLI's
//! `--sim` mode. Request cycles are decoded exactly as the hardware frames
//! them, serviced against simulated devices, and answered through the
//! response FIFO with matching transaction ids.
//!
//! ```text
//! write REQUEST ──► pending cycles ──(ss cycles, or br)──► devices
//!                                                            │
//! read RESPONSE ◄── response FIFO ◄──────────────────────────┘
//! ```
//!
//! Faults are armed per master and applied to the next transactions:
//!
//! ```rust
//! use scd_driver::sim::{Fault, SimulatedScd};
//!
//! let sim = SimulatedScd::new(0x1000);
//! sim.add_master(0x100, 2);
//! sim.inject(0x100, Fault::AckError, Some(1));
//! ```

use crate::error::SmbusError;
use crate::io::RegisterIo;
use scd_chip::regs::{self, control_status, ControlStatus, RequestCycle, ResponseEntry, TI_MODULUS};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A failure the simulated master reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// First response entry carries `ack_error`
    AckError,
    /// First response entry carries `timeout`
    Timeout,
    /// First response entry carries `bus_conflict`
    BusConflict,
    /// First response entry carries `flushed`
    Flushed,
    /// First response entry has its transaction id shifted by this amount
    TransactionIdSkew(u8),
    /// First response entry carries `foe`
    Overflow,
    /// The transaction produces no response entries
    EmptyFifo,
    /// An accelerated block read never clears bus-read-busy
    StuckBusy,
}

/// Simulated i2c device: a 256-byte register file plus length-prefixed
/// block registers.
///
/// Reads from a block register return the length byte followed by the
/// block. Writes to a block register take the first byte as the length.
/// Everything else reads and writes the register file, auto-incrementing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDevice {
    memory: Vec<u8>,
    blocks: BTreeMap<u8, Vec<u8>>,
    pointer: u8,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    /// Device with a zeroed register file and no block registers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            memory: vec![0; 256],
            blocks: BTreeMap::new(),
            pointer: 0,
        }
    }

    /// Preload the register file from `start`, wrapping at 256.
    #[must_use]
    pub fn with_bytes(mut self, start: u8, bytes: &[u8]) -> Self {
        let mut reg = start;
        for b in bytes {
            self.memory[usize::from(reg)] = *b;
            reg = reg.wrapping_add(1);
        }
        self
    }

    /// Turn `command` into a block register holding `bytes`.
    #[must_use]
    pub fn with_block(mut self, command: u8, bytes: &[u8]) -> Self {
        self.blocks.insert(command, bytes.to_vec());
        self
    }

    /// Register-file byte.
    #[must_use]
    pub fn byte(&self, reg: u8) -> u8 {
        self.memory[usize::from(reg)]
    }

    /// Block register contents.
    #[must_use]
    pub fn block(&self, command: u8) -> Option<&[u8]> {
        self.blocks.get(&command).map(Vec::as_slice)
    }

    /// The first `n` bytes the device drives after `command`.
    fn read_stream(&mut self, command: u8, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n);
        if let Some(block) = self.blocks.get(&command) {
            out.push(u8::try_from(block.len()).unwrap_or(u8::MAX));
            out.extend_from_slice(block);
        } else {
            let mut reg = command;
            while out.len() < n {
                out.push(self.memory[usize::from(reg)]);
                reg = reg.wrapping_add(1);
            }
            self.pointer = reg;
        }
        out.resize(n, 0);
        out
    }

    fn write(&mut self, command: u8, payload: &[u8]) {
        if let Some(block) = self.blocks.get_mut(&command) {
            if let Some((len, data)) = payload.split_first() {
                let len = usize::from(*len).min(data.len());
                *block = data[..len].to_vec();
            }
            return;
        }
        let mut reg = command;
        for b in payload {
            self.memory[usize::from(reg)] = *b;
            reg = reg.wrapping_add(1);
        }
        self.pointer = reg;
    }

    fn receive_byte(&mut self) -> u8 {
        let b = self.memory[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        b
    }
}

/// Counters of one simulated master.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// Completed reset sequences (reset bit set, then cleared)
    pub resets: u32,
    /// Transactions serviced
    pub transactions: u32,
    /// Control/status reads
    pub cs_reads: u32,
    /// Control/status reads while an accelerated block read was busy
    pub block_read_polls: u32,
    /// Response register reads
    pub response_reads: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Busy {
    Polls(u32),
    Forever,
}

#[derive(Debug)]
struct SimMaster {
    version: u8,
    cs: ControlStatus,
    in_reset: bool,
    fifo: VecDeque<u32>,
    pending: Vec<RequestCycle>,
    log: Vec<RequestCycle>,
    busy_polls: u32,
    busy: Option<Busy>,
    fault: Option<(Fault, Option<u32>)>,
    stats: SimStats,
}

impl SimMaster {
    fn new(version: u8) -> Self {
        Self {
            version,
            cs: ControlStatus::default(),
            in_reset: false,
            fifo: VecDeque::new(),
            pending: Vec::new(),
            log: Vec::new(),
            busy_polls: 2,
            busy: None,
            fault: None,
            stats: SimStats::default(),
        }
    }

    fn read_cs(&mut self) -> u32 {
        self.stats.cs_reads += 1;
        let busy = match self.busy {
            Some(Busy::Forever) => true,
            Some(Busy::Polls(0)) => {
                self.busy = None;
                false
            }
            Some(Busy::Polls(n)) => {
                self.busy = Some(Busy::Polls(n - 1));
                true
            }
            None => false,
        };
        if busy {
            self.stats.block_read_polls += 1;
        }
        let cs = self.cs.with_version(self.version).with_brb(busy);
        control_status::FE.set(cs.0, u32::from(self.fifo.is_empty()))
    }

    fn write_cs(&mut self, value: u32) {
        let cs = ControlStatus(value);
        if cs.reset() {
            self.in_reset = true;
        } else if self.in_reset {
            self.in_reset = false;
            self.stats.resets += 1;
            self.fifo.clear();
            self.pending.clear();
            self.busy = None;
        }
        // version, busy and empty are read-only
        self.cs = ControlStatus(value).with_brb(false).with_version(0);
    }

    fn read_response(&mut self) -> u32 {
        self.stats.response_reads += 1;
        self.fifo.pop_front().unwrap_or(ResponseEntry::empty())
    }

    /// The armed fault for the next transaction, consuming one occurrence.
    fn take_fault(&mut self, block_read: bool) -> Option<Fault> {
        let (fault, remaining) = self.fault?;
        if fault == Fault::StuckBusy && !block_read {
            return None;
        }
        match remaining {
            Some(0) => {
                self.fault = None;
                return None;
            }
            Some(1) => self.fault = None,
            Some(n) => self.fault = Some((fault, Some(n - 1))),
            None => {}
        }
        Some(fault)
    }

    fn publish(&mut self, mut entries: Vec<ResponseEntry>, fault: Option<Fault>) {
        if fault == Some(Fault::EmptyFifo) {
            return;
        }
        if let Some(first) = entries.first_mut() {
            match fault {
                Some(Fault::AckError) => first.ack_error = true,
                Some(Fault::Timeout) => first.timeout = true,
                Some(Fault::BusConflict) => first.bus_conflict = true,
                Some(Fault::Flushed) => first.flushed = true,
                Some(Fault::TransactionIdSkew(n)) => first.ti = first.ti.wrapping_add(n) % TI_MODULUS,
                Some(Fault::Overflow) => first.foe = true,
                Some(Fault::EmptyFifo | Fault::StuckBusy) | None => {}
            }
        }
        self.fifo.extend(entries.iter().map(ResponseEntry::pack));
    }
}

fn echo(cycle: &RequestCycle) -> ResponseEntry {
    ResponseEntry {
        d: cycle.d,
        ti: cycle.ti,
        ss: cycle.ss,
        ..ResponseEntry::default()
    }
}

type DeviceKey = (u32, u8, u16);

#[derive(Debug, Default)]
struct SimState {
    masters: BTreeMap<u32, SimMaster>,
    devices: BTreeMap<DeviceKey, SimDevice>,
    failing: Option<u32>,
}

/// Simulated register space with any number of bus-masters.
#[derive(Debug)]
pub struct SimulatedScd {
    size: usize,
    state: Mutex<SimState>,
}

impl SimulatedScd {
    /// Empty register space of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_master<T>(&self, base: u32, f: impl FnOnce(&mut SimMaster) -> T) -> Option<T> {
        self.lock().masters.get_mut(&base).map(f)
    }

    /// Place a master reporting protocol `version` at `base`.
    pub fn add_master(&self, base: u32, version: u8) {
        self.lock().masters.insert(base, SimMaster::new(version));
    }

    /// Attach `device` at `address` on bus `bus` of the master at `base`.
    pub fn add_device(&self, base: u32, bus: u8, address: u16, device: SimDevice) {
        self.lock().devices.insert((base, bus, address), device);
    }

    /// Snapshot of a device.
    #[must_use]
    pub fn device(&self, base: u32, bus: u8, address: u16) -> Option<SimDevice> {
        self.lock().devices.get(&(base, bus, address)).cloned()
    }

    /// Arm `fault` for the next `count` transactions, or all of them.
    pub fn inject(&self, base: u32, fault: Fault, count: Option<u32>) {
        self.with_master(base, |m| m.fault = Some((fault, count)));
    }

    /// Disarm any fault.
    pub fn clear_fault(&self, base: u32) {
        self.with_master(base, |m| m.fault = None);
    }

    /// Number of control/status reads an accelerated block read stays busy.
    pub fn set_busy_polls(&self, base: u32, polls: u32) {
        self.with_master(base, |m| m.busy_polls = polls);
    }

    /// Make every access to `offset` fail, or stop doing so.
    pub fn fail_register(&self, offset: Option<u32>) {
        self.lock().failing = offset;
    }

    /// Counters of the master at `base`.
    #[must_use]
    pub fn stats(&self, base: u32) -> SimStats {
        self.with_master(base, |m| m.stats).unwrap_or_default()
    }

    /// Every request cycle written to the master at `base`, oldest first.
    #[must_use]
    pub fn request_log(&self, base: u32) -> Vec<RequestCycle> {
        self.with_master(base, |m| m.log.clone()).unwrap_or_default()
    }

    /// Forget the request log of the master at `base`.
    pub fn clear_log(&self, base: u32) {
        self.with_master(base, |m| m.log.clear());
    }

    fn check(&self, state: &SimState, offset: u32) -> Result<(), SmbusError> {
        if state.failing == Some(offset) {
            return Err(SmbusError::register(offset, "injected access failure"));
        }
        if offset % 4 != 0 || offset as usize + 4 > self.size {
            return Err(SmbusError::register(
                offset,
                format!("out of bounds, limit={:#x}", self.size),
            ));
        }
        Ok(())
    }
}

/// Master owning `offset`, and the register offset within its window.
fn locate(state: &SimState, offset: u32) -> Option<(u32, u32)> {
    let (&base, _) = state.masters.range(..=offset).next_back()?;
    let rel = offset - base;
    (rel < regs::MASTER_WINDOW).then_some((base, rel))
}

impl SimState {
    fn request(&mut self, base: u32, value: u32) {
        let Self {
            masters, devices, ..
        } = self;
        let Some(master) = masters.get_mut(&base) else {
            return;
        };

        let cycle = RequestCycle::unpack(value);
        master.log.push(cycle);

        if cycle.st && cycle.ss != 0 {
            master.pending.clear();
        }
        master.pending.push(cycle);

        let expected = master.pending.first().map_or(0, |c| usize::from(c.ss));
        if cycle.br && master.version >= 2 {
            let cycles = std::mem::take(&mut master.pending);
            block_read(master, devices, base, &cycles);
        } else if master.pending.len() >= expected {
            let cycles = std::mem::take(&mut master.pending);
            transaction(master, devices, base, &cycles);
        }
    }
}

fn transaction(
    master: &mut SimMaster,
    devices: &mut BTreeMap<DeviceKey, SimDevice>,
    base: u32,
    cycles: &[RequestCycle],
) {
    master.stats.transactions += 1;
    let mut entries: Vec<ResponseEntry> = cycles.iter().map(echo).collect();

    let Some(first) = cycles.first() else {
        return;
    };
    let address = u16::from(first.d >> 1);

    match devices.get_mut(&(base, first.bs, address)) {
        None => entries[0].ack_error = true,
        Some(device) => match cycles {
            [_] => {}
            [first, second] => {
                if first.d & 1 == 1 {
                    entries[1].d = device.receive_byte();
                } else {
                    device.pointer = second.d;
                }
            }
            [_, command, rest @ ..] => {
                let read = rest.first().is_some_and(|c| c.st);
                if read {
                    let data = device.read_stream(command.d, rest.len() - 1);
                    for (entry, d) in entries[3..].iter_mut().zip(data) {
                        entry.d = d;
                    }
                } else {
                    let payload: Vec<u8> = rest.iter().map(|c| c.d).collect();
                    device.write(command.d, &payload);
                }
            }
            [] => {}
        },
    }

    let fault = master.take_fault(false);
    master.publish(entries, fault);
}

fn block_read(
    master: &mut SimMaster,
    devices: &mut BTreeMap<DeviceKey, SimDevice>,
    base: u32,
    cycles: &[RequestCycle],
) {
    master.stats.transactions += 1;
    let mut entries: Vec<ResponseEntry> = cycles.iter().map(echo).collect();

    if let [first, command, ..] = cycles {
        let address = u16::from(first.d >> 1);
        match devices.get_mut(&(base, first.bs, address)) {
            None => entries[0].ack_error = true,
            Some(device) => {
                let len = device.read_stream(command.d, 1)[0];
                let data = device.read_stream(command.d, usize::from(len) + 1);
                let mut ti = u8::try_from(entries.len()).unwrap_or_default() % TI_MODULUS;
                for d in data {
                    entries.push(ResponseEntry {
                        d,
                        ti,
                        ..ResponseEntry::default()
                    });
                    ti = (ti + 1) % TI_MODULUS;
                }
            }
        }
    }

    let fault = master.take_fault(true);
    master.busy = Some(if fault == Some(Fault::StuckBusy) {
        Busy::Forever
    } else {
        Busy::Polls(master.busy_polls)
    });
    master.publish(entries, fault);
}

impl RegisterIo for SimulatedScd {
    fn read_u32(&self, offset: u32) -> Result<u32, SmbusError> {
        let mut state = self.lock();
        self.check(&state, offset)?;

        let Some((base, rel)) = locate(&state, offset) else {
            return Ok(0);
        };
        let Some(master) = state.masters.get_mut(&base) else {
            return Ok(0);
        };
        Ok(match rel {
            regs::CONTROL_STATUS => master.read_cs(),
            regs::RESPONSE => master.read_response(),
            _ => 0,
        })
    }

    fn write_u32(&self, offset: u32, value: u32) -> Result<(), SmbusError> {
        let mut state = self.lock();
        self.check(&state, offset)?;

        let Some((base, rel)) = locate(&state, offset) else {
            return Ok(());
        };
        match rel {
            regs::REQUEST => state.request(base, value),
            regs::CONTROL_STATUS => {
                if let Some(master) = state.masters.get_mut(&base) {
                    master.write_cs(value);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.size
    }
}
