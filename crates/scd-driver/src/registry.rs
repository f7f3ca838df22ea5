//! Master and bus registry.
//!
//! Three lock tiers:
//!
//! - the registry lock guards the context table and the bus table
//! - each context lock guards the masters of one device
//! - each master lock serializes the transactions of that master
//!
//! A context lock may be held while taking the registry lock or a master
//! lock. The registry lock and a master lock are never held together, so a
//! long transaction never blocks lookups of other buses.

use crate::bus::Bus;
use crate::config::{self, EngineConfig};
use crate::error::{Result, ScdError};
use crate::io::RegisterIo;
use crate::master::{Master, MasterInfo};
use crate::protocol::{Direction, Protocol, SmbusData};
use scd_chip::regs::{self, request};
use scd_chip::TimingParams;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Largest number of buses a master can address.
pub const MAX_BUS_COUNT: u32 = request::BS.max() + 1;

/// One device exposing bus-masters in its register space.
#[derive(Debug)]
pub struct Context {
    name: String,
    io: Arc<dyn RegisterIo>,
    masters: Mutex<BTreeMap<u32, MasterEntry>>,
}

#[derive(Debug)]
struct MasterEntry {
    master: Arc<Master>,
    buses: Vec<Arc<Bus>>,
}

impl Context {
    /// Context name, used in bus names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, MasterEntry>> {
        self.masters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    contexts: BTreeMap<String, Arc<Context>>,
    buses: BTreeMap<u32, Arc<Bus>>,
    next_bus: u32,
}

/// Owner of every context, master and bus.
#[derive(Debug, Default)]
pub struct Registry {
    config: EngineConfig,
    inner: Mutex<RegistryInner>,
}

/// Buses published during `add_master`, withdrawn again unless committed.
struct PendingBuses<'a> {
    registry: &'a Registry,
    buses: Vec<Arc<Bus>>,
}

impl PendingBuses<'_> {
    fn commit(mut self) -> Vec<Arc<Bus>> {
        std::mem::take(&mut self.buses)
    }
}

impl Drop for PendingBuses<'_> {
    fn drop(&mut self) {
        if !self.buses.is_empty() {
            self.registry.unlink(&self.buses);
        }
    }
}

impl Registry {
    /// Create an empty registry whose masters use `config`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            inner: Mutex::default(),
        }
    }

    /// Configuration new masters start with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(&self, name: &str) -> Result<Arc<Context>> {
        self.lock()
            .contexts
            .get(name)
            .cloned()
            .ok_or_else(|| ScdError::not_found(format!("context {name}")))
    }

    /// Detach and forget `buses`. New lookups fail from here on.
    fn unlink(&self, buses: &[Arc<Bus>]) {
        let mut inner = self.lock();
        for bus in buses {
            bus.detach();
            inner.buses.remove(&bus.number());
        }
    }

    // ── Contexts ─────────────────────────────────────────────────────────────

    /// Register a device under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::AlreadyExists`] if the name is taken.
    pub fn add_context(&self, name: &str, io: Arc<dyn RegisterIo>) -> Result<()> {
        let mut inner = self.lock();
        if inner.contexts.contains_key(name) {
            return Err(ScdError::already_exists(format!("context {name}")));
        }
        inner.contexts.insert(
            name.to_string(),
            Arc::new(Context {
                name: name.to_string(),
                io,
                masters: Mutex::default(),
            }),
        );
        tracing::info!("Added context {name}");
        Ok(())
    }

    /// Remove a device and every master on it.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::NotFound`] if no context has that name.
    pub fn remove_context(&self, name: &str) -> Result<()> {
        let ctx = self
            .lock()
            .contexts
            .remove(name)
            .ok_or_else(|| ScdError::not_found(format!("context {name}")))?;

        let mut masters = ctx.lock();
        while let Some((_, entry)) = masters.pop_first() {
            self.teardown(entry);
        }
        tracing::info!("Removed context {name}");
        Ok(())
    }

    // ── Masters ──────────────────────────────────────────────────────────────

    /// Add a master at `base` with `bus_count` buses, reset it and probe its
    /// protocol version.
    ///
    /// Buses get consecutive registry numbers. On failure nothing stays
    /// registered.
    ///
    /// # Errors
    ///
    /// - [`ScdError::NotFound`] if the context does not exist
    /// - [`ScdError::AlreadyExists`] if the context has a master with this id
    /// - [`ScdError::InvalidArgument`] for a bad bus count or register window
    /// - [`ScdError::Smbus`] if the reset or probe fails
    pub fn add_master(&self, parent: &str, base: u32, id: u32, bus_count: u32) -> Result<MasterInfo> {
        if bus_count == 0 || bus_count > MAX_BUS_COUNT {
            return Err(ScdError::invalid_argument(format!(
                "bus count {bus_count} not in 1..={MAX_BUS_COUNT}"
            )));
        }

        let ctx = self.context(parent)?;
        let mut masters = ctx.lock();
        if masters.contains_key(&id) {
            return Err(ScdError::already_exists(format!("master {id} on {parent}")));
        }

        let end = u64::from(base) + u64::from(regs::MASTER_WINDOW);
        if base % 4 != 0 || end > ctx.io.size() as u64 {
            return Err(ScdError::invalid_argument(format!(
                "master window {base:#x}..{end:#x} outside {:#x}-byte register space",
                ctx.io.size()
            )));
        }

        let master = Arc::new(Master::new(
            parent,
            id,
            base,
            bus_count,
            Arc::clone(&ctx.io),
            self.config.clone(),
        ));

        let mut pending = PendingBuses {
            registry: self,
            buses: Vec::new(),
        };
        {
            let mut inner = self.lock();
            for i in 0..bus_count {
                let number = inner.next_bus;
                inner.next_bus += 1;
                // bus_count is bounded by MAX_BUS_COUNT
                #[allow(clippy::cast_possible_truncation)]
                let bus = Arc::new(Bus::new(number, i as u8, Arc::clone(&master)));
                inner.buses.insert(number, Arc::clone(&bus));
                pending.buses.push(bus);
            }
        }

        let version = master.reset_and_probe()?;
        let buses = pending.commit();

        tracing::info!(
            "smbus {parent} master {id:#x}:{base:#x} version {version}, buses {}..={}",
            buses.first().map_or(0, |b| b.number()),
            buses.last().map_or(0, |b| b.number())
        );

        let info = master.info();
        masters.insert(id, MasterEntry { master, buses });
        Ok(info)
    }

    /// Remove a master and its buses.
    ///
    /// The buses are unlinked first, then the hardware is reset once any
    /// in-flight transaction has finished, then the records are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::NotFound`] if the context or master does not exist.
    pub fn remove_master(&self, parent: &str, id: u32) -> Result<()> {
        let ctx = self.context(parent)?;
        let entry = ctx
            .lock()
            .remove(&id)
            .ok_or_else(|| ScdError::not_found(format!("master {id} on {parent}")))?;
        self.teardown(entry);
        Ok(())
    }

    fn teardown(&self, entry: MasterEntry) {
        let MasterEntry { master, buses } = entry;

        self.unlink(&buses);

        if let Err(e) = master.reset() {
            tracing::warn!("master {} reset on removal failed: {e}", master.id());
        }

        for bus in &buses {
            bus.clear_timing_overrides();
        }
        tracing::info!(
            "Removed {} master {} ({} buses)",
            master.parent(),
            master.id(),
            buses.len()
        );
    }

    fn with_master<T>(&self, parent: &str, id: u32, f: impl FnOnce(&Master) -> T) -> Result<T> {
        let ctx = self.context(parent)?;
        let masters = ctx.lock();
        masters
            .get(&id)
            .map(|entry| f(&entry.master))
            .ok_or_else(|| ScdError::not_found(format!("master {id} on {parent}")))
    }

    /// Change the retry bound of a master.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::NotFound`] if the context or master does not exist.
    pub fn set_max_retries(&self, parent: &str, id: u32, n: u32) -> Result<()> {
        self.with_master(parent, id, |m| m.set_max_retries(n))
    }

    /// Identity and probed capabilities of a master.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::NotFound`] if the context or master does not exist.
    pub fn master_info(&self, parent: &str, id: u32) -> Result<MasterInfo> {
        self.with_master(parent, id, Master::info)
    }

    // ── Buses ────────────────────────────────────────────────────────────────

    /// Look up a bus by its registry number.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::NotFound`] if no such bus is registered.
    pub fn bus(&self, number: u32) -> Result<Arc<Bus>> {
        self.lock()
            .buses
            .get(&number)
            .cloned()
            .ok_or_else(|| ScdError::not_found(format!("bus {number}")))
    }

    /// Every registered bus, ordered by number.
    #[must_use]
    pub fn buses(&self) -> Vec<Arc<Bus>> {
        self.lock().buses.values().cloned().collect()
    }

    /// Run one transaction on bus `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::NotFound`] for an unknown bus, otherwise
    /// [`ScdError::Transfer`] with the classified failure.
    pub fn submit(
        &self,
        bus: u32,
        address: u16,
        direction: Direction,
        command: u8,
        protocol: Protocol,
        data: SmbusData,
    ) -> Result<SmbusData> {
        let bus = self.bus(bus)?;
        Ok(bus.smbus_xfer(address, direction, command, protocol, data)?)
    }

    /// Insert or replace the timing of `address` on bus `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::NotFound`] for an unknown bus.
    pub fn set_timing_override(&self, bus: u32, address: u16, params: TimingParams) -> Result<()> {
        self.bus(bus)?.set_timing_override(address, params);
        Ok(())
    }

    /// Timing used for `address` on bus `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::NotFound`] for an unknown bus.
    pub fn timing_params(&self, bus: u32, address: u16) -> Result<TimingParams> {
        Ok(self.bus(bus)?.timing_params(address))
    }

    /// Apply `<bus> <addr> <t> <datr> <datw> <ed>` lines.
    ///
    /// Every line is parsed and its bus resolved before any override is
    /// written. Returns the number of overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ScdError::InvalidConfig`] naming the first bad line.
    pub fn apply_tweaks(&self, text: &str) -> Result<usize> {
        let records = config::parse_tweaks(text)?;

        let resolved = records
            .into_iter()
            .map(|(line, record)| {
                self.bus(u32::from(record.bus))
                    .map(|bus| (bus, record))
                    .map_err(|_| ScdError::InvalidConfig {
                        line,
                        reason: format!("bus {} not found", record.bus),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        for (bus, record) in &resolved {
            bus.set_timing_override(record.address, record.params);
        }
        Ok(resolved.len())
    }
}
