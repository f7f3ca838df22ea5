//! One hardware bus-master: transaction lock, retry and recovery.

use crate::bus::Bus;
use crate::config::EngineConfig;
use crate::engine::{self, MasterPort, Target, Transfer};
use crate::error::SmbusError;
use crate::io::RegisterIo;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Snapshot of a master's identity and probed capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterInfo {
    /// Name of the owning context
    pub parent: String,
    /// Master id, unique within the parent
    pub id: u32,
    /// Byte offset of the master's register window
    pub base: u32,
    /// Number of buses
    pub bus_count: u32,
    /// Hardware protocol version
    pub version: u8,
    /// Accelerated block read available
    pub fast_block_read: bool,
    /// Retry bound
    pub max_retries: u32,
}

/// Hardware state guarded by the transaction lock.
#[derive(Debug, Default)]
struct MasterState {
    version: u8,
    fast_block_read: bool,
}

/// A bus-master and the lock that serializes every transaction on it.
#[derive(Debug)]
pub struct Master {
    parent: String,
    id: u32,
    base: u32,
    bus_count: u32,
    io: Arc<dyn RegisterIo>,
    config: EngineConfig,
    state: Mutex<MasterState>,
    max_retries: AtomicU32,
}

impl Master {
    pub(crate) fn new(
        parent: &str,
        id: u32,
        base: u32,
        bus_count: u32,
        io: Arc<dyn RegisterIo>,
        config: EngineConfig,
    ) -> Self {
        let max_retries = AtomicU32::new(config.max_retries);
        Self {
            parent: parent.to_string(),
            id,
            base,
            bus_count,
            io,
            config,
            state: Mutex::new(MasterState::default()),
            max_retries,
        }
    }

    /// Master id within its parent.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Name of the owning context.
    #[must_use]
    pub fn parent(&self) -> &str {
        &self.parent
    }

    /// Current retry bound.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries.load(Ordering::Relaxed)
    }

    /// Change the retry bound. Takes effect on the next transaction.
    pub fn set_max_retries(&self, n: u32) {
        self.max_retries.store(n, Ordering::Relaxed);
    }

    /// Identity and capabilities.
    #[must_use]
    pub fn info(&self) -> MasterInfo {
        let state = self.lock();
        MasterInfo {
            parent: self.parent.clone(),
            id: self.id,
            base: self.base,
            bus_count: self.bus_count,
            version: state.version,
            fast_block_read: state.fast_block_read,
            max_retries: self.max_retries(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MasterState> {
        // state stays consistent across a panicking holder: it is only
        // written by reset_and_probe
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn port(&self) -> MasterPort<'_> {
        MasterPort::new(&*self.io, self.base, &self.config)
    }

    /// Reset the hardware and read its protocol version.
    ///
    /// # Errors
    ///
    /// Returns error if a register access fails.
    pub(crate) fn reset_and_probe(&self) -> Result<u8, SmbusError> {
        let mut state = self.lock();
        let port = self.port();
        port.reset()?;
        let version = port.read_control_status()?.version();
        state.version = version;
        state.fast_block_read = version >= 2;
        Ok(version)
    }

    /// Run the reset sequence under the transaction lock.
    ///
    /// Waits for any in-flight transaction to finish first.
    ///
    /// # Errors
    ///
    /// Returns error if a register access fails.
    pub(crate) fn reset(&self) -> Result<(), SmbusError> {
        let _state = self.lock();
        self.port().reset()
    }

    /// Run `xfer` on `bus`, retrying generic I/O failures.
    ///
    /// The request shape is checked once up front; a rejected shape never
    /// reaches the hardware.
    ///
    /// # Errors
    ///
    /// Returns the classification of the last failed attempt.
    pub(crate) fn transfer(&self, bus: &Bus, xfer: &mut Transfer<'_>) -> Result<(), SmbusError> {
        engine::validate(xfer)?;

        let max = self.max_retries();
        let mut retry = 0;
        loop {
            match self.attempt(bus, xfer) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_generic_io() && retry < max => {
                    retry += 1;
                    tracing::debug!("smbus retrying... {retry}/{max}");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt(&self, bus: &Bus, xfer: &mut Transfer<'_>) -> Result<(), SmbusError> {
        let state = self.lock();

        // removal unlinks the bus before taking this lock
        if !bus.is_attached() {
            return Err(SmbusError::BusRemoved);
        }

        let target = Target {
            bus_id: bus.id(),
            params: bus.timing_params(xfer.address),
            fast_block_read: state.fast_block_read,
        };
        let port = self.port();

        let result = engine::execute(&port, &target, xfer);
        if let Err(e) = &result {
            tracing::debug!(
                "smbus {} failed addr={:#04x} reg={:#04x} {:?} data_size={:#x} adapter=\"{}\" ({})",
                xfer.direction,
                xfer.address,
                xfer.command,
                xfer.protocol,
                xfer.block.len(),
                bus.name(),
                e
            );
            if let Err(reset_err) = port.reset() {
                tracing::warn!("master {} reset failed: {reset_err}", self.id);
            }
        }
        result
    }
}
