//! Contexts, command queues and events.
//!
//! A [`Context`] binds devices of one platform and owns what they share:
//! a compute pool per device (created on first use), the device memory
//! budget and the metrics collector. Queues, buffers, programs and user
//! events are created through it.

pub mod event;
pub mod queue;

pub use event::{
    wait_for_events, CommandFailure, CommandKind, Event, EventId, EventStatus, ProfilingInfo, UserEvent,
};
#[cfg(feature = "async")]
pub use event::EventFuture;
pub use queue::{CommandQueue, QueueId, QueueOrdering};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::ComputePool;
use crate::memory::{AccessMode, Buffer, MemoryBudget};
use crate::platform::{Device, DeviceId, DeviceTypeFilter, Platform, PlatformId};
use crate::program::Program;
use crate::telemetry::Metrics;
use crate::util::id::object_id;
use parking_lot::Mutex;
use queue::QueueShared;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

object_id!(
    /// Identifies one context.
    ContextId,
    "context"
);

/// Devices of one platform and the resources they share.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ContextId,
    platform: PlatformId,
    devices: Vec<Device>,
    config: Config,
    pools: Mutex<HashMap<DeviceId, Arc<ComputePool>>>,
    queues: Mutex<Vec<Weak<QueueShared>>>,
    budget: Arc<MemoryBudget>,
    max_alloc: u64,
    metrics: Arc<Metrics>,
    released: AtomicBool,
}

impl Context {
    pub fn new(devices: &[Device], config: &Config) -> Result<Self> {
        config.validate()?;
        let first = devices
            .first()
            .ok_or_else(|| Error::context_creation("device list is empty"))?;
        for (i, device) in devices.iter().enumerate() {
            if devices[..i].contains(device) {
                return Err(Error::context_creation(format!(
                    "device '{}' listed more than once",
                    device.name()
                )));
            }
            if device.platform_id() != first.platform_id() {
                return Err(Error::context_creation(format!(
                    "device '{}' belongs to another platform",
                    device.name()
                )));
            }
        }

        let metrics = Arc::new(Metrics::new());
        let limit = devices
            .iter()
            .map(|d| d.capabilities().global_mem_size)
            .min()
            .unwrap_or(0);
        let max_alloc = devices
            .iter()
            .map(|d| d.capabilities().max_mem_alloc_size)
            .min()
            .unwrap_or(0);

        let id = ContextId::next();
        info!("{} created with {} device(s)", id, devices.len());
        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                platform: first.platform_id(),
                devices: devices.to_vec(),
                config: config.clone(),
                pools: Mutex::new(HashMap::new()),
                queues: Mutex::new(Vec::new()),
                budget: Arc::new(MemoryBudget::new(limit, Arc::clone(&metrics))),
                max_alloc,
                metrics,
                released: AtomicBool::new(false),
            }),
        })
    }

    /// A context over every device of `platform` that passes `filter`.
    pub fn from_type(platform: &Platform, filter: DeviceTypeFilter, config: &Config) -> Result<Self> {
        Self::new(&platform.devices(filter)?, config)
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn platform(&self) -> PlatformId {
        self.inner.platform
    }

    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    pub fn contains(&self, device: &Device) -> bool {
        self.inner.devices.contains(device)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Bytes of device memory held by live buffers of this context.
    pub fn memory_in_use(&self) -> u64 {
        self.inner.budget.used()
    }

    /// Device memory available to this context in total.
    pub fn memory_limit(&self) -> u64 {
        self.inner.budget.limit()
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Abort every queue of this context and refuse new objects.
    ///
    /// Commands that have not started fail with `Aborted`. Buffers return
    /// their memory once their last handle drops.
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let queues = std::mem::take(&mut *self.inner.queues.lock());
        let live: Vec<_> = queues.iter().filter_map(Weak::upgrade).collect();
        for queue in &live {
            queue.abort();
        }
        info!("{} released ({} live queue(s) aborted)", self.inner.id, live.len());
    }

    pub fn create_queue(&self, device: &Device, ordering: QueueOrdering) -> Result<CommandQueue> {
        self.check_live()?;
        if !self.contains(device) {
            return Err(Error::DeviceNotInContext(device.name().to_string()));
        }
        let pool = self.pool_for(device)?;
        let queue = CommandQueue::new(
            self.inner.id,
            device.clone(),
            ordering,
            pool,
            &self.inner.config,
            Arc::clone(&self.inner.metrics),
        )?;

        let mut queues = self.inner.queues.lock();
        queues.retain(|q| q.strong_count() > 0);
        queues.push(Arc::downgrade(queue.shared()));
        Ok(queue)
    }

    /// A queue on the first device, with the configured default ordering.
    pub fn create_default_queue(&self) -> Result<CommandQueue> {
        let device = self.inner.devices[0].clone();
        self.create_queue(&device, self.inner.config.default_ordering)
    }

    pub fn create_buffer(&self, access: AccessMode, size: usize) -> Result<Buffer> {
        self.check_live()?;
        if size == 0 || size as u64 > self.inner.max_alloc {
            return Err(Error::InvalidBufferSize {
                size,
                max: self.inner.max_alloc,
            });
        }
        let allocation = self.inner.budget.reserve(size as u64)?;
        let buffer = Buffer::allocate(self.inner.id, access, size, allocation);
        debug!("{} allocated {} bytes ({:?})", buffer.id(), size, access);
        Ok(buffer)
    }

    /// A buffer initialised with the bytes of `data`.
    pub fn create_buffer_with_data<T: bytemuck::Pod>(&self, access: AccessMode, data: &[T]) -> Result<Buffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = self.create_buffer(access, bytes.len())?;
        buffer.memory().write(0, bytes);
        self.inner.metrics.record_write(bytes.len());
        Ok(buffer)
    }

    pub fn create_program(&self, source: &str) -> Result<Program> {
        self.check_live()?;
        Ok(Program::new(self.clone(), source))
    }

    pub fn create_user_event(&self) -> Result<UserEvent> {
        self.check_live()?;
        Ok(UserEvent::new(self.inner.id))
    }

    fn check_live(&self) -> Result<()> {
        if self.is_released() {
            return Err(Error::ObjectReleased("context"));
        }
        Ok(())
    }

    fn pool_for(&self, device: &Device) -> Result<Arc<ComputePool>> {
        let mut pools = self.inner.pools.lock();
        if let Some(pool) = pools.get(&device.id()) {
            return Ok(Arc::clone(pool));
        }

        let mut config = self.inner.config.clone();
        let units = device
            .capabilities()
            .max_compute_units
            .clamp(1, config.worker_threads());
        config.compute_units = Some(units);
        let label = format!("dev{}", device.id().as_u64());
        let pool = Arc::new(ComputePool::new(&config, &label, Arc::clone(&self.inner.metrics))?);
        pools.insert(device.id(), Arc::clone(&pool));
        Ok(pool)
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("devices", &self.inner.devices)
            .field("memory_in_use", &self.memory_in_use())
            .field("released", &self.is_released())
            .finish()
    }
}
