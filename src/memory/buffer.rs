//! Device buffers and the memory they live in.

use crate::context::ContextId;
use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use crate::util::id::object_id;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

object_id!(
    /// Identifies one buffer or sub-buffer.
    BufferId,
    "buffer"
);

/// Access a buffer grants to kernels, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Whether a host mapping of `mode` is permitted.
    pub fn permits(&self, mode: MapMode) -> bool {
        match self {
            AccessMode::ReadWrite => true,
            AccessMode::ReadOnly => !mode.writes(),
            AccessMode::WriteOnly => !mode.reads(),
        }
    }

    /// Whether a sub-buffer with mode `self` stays within `parent`.
    pub fn within(&self, parent: AccessMode) -> bool {
        parent == AccessMode::ReadWrite || *self == parent
    }
}

/// Host access requested when mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
    Read,
    Write,
    ReadWrite,
}

impl MapMode {
    pub fn reads(&self) -> bool {
        matches!(self, MapMode::Read | MapMode::ReadWrite)
    }

    pub fn writes(&self) -> bool {
        matches!(self, MapMode::Write | MapMode::ReadWrite)
    }
}

/// Device memory accounting for one context.
#[derive(Debug)]
pub(crate) struct MemoryBudget {
    limit: u64,
    used: AtomicU64,
    metrics: Arc<Metrics>,
}

impl MemoryBudget {
    pub fn new(limit: u64, metrics: Arc<Metrics>) -> Self {
        Self {
            limit,
            used: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn reserve(self: &Arc<Self>, bytes: u64) -> Result<Allocation> {
        let mut used = self.used.load(Ordering::Relaxed);
        loop {
            let available = self.limit.saturating_sub(used);
            if bytes > available {
                return Err(Error::OutOfDeviceMemory {
                    requested: bytes,
                    available,
                });
            }
            match self
                .used
                .compare_exchange_weak(used, used + bytes, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => used = current,
            }
        }
        self.metrics.record_allocation(bytes);
        Ok(Allocation {
            budget: Arc::clone(self),
            bytes,
        })
    }
}

/// Reserved device memory; returned to the budget on drop.
#[derive(Debug)]
pub(crate) struct Allocation {
    budget: Arc<MemoryBudget>,
    bytes: u64,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.budget.used.fetch_sub(self.bytes, Ordering::AcqRel);
        self.budget.metrics.record_release(self.bytes);
    }
}

/// A live host mapping over a byte range of device memory.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MapRecord {
    pub view: u64,
    pub buffer: BufferId,
    pub start: usize,
    pub end: usize,
}

/// Byte-addressed storage shared by a buffer and its sub-buffers.
pub(crate) struct DeviceMemory {
    bytes: Box<[AtomicU8]>,
    maps: Mutex<Vec<MapRecord>>,
    _allocation: Allocation,
}

impl DeviceMemory {
    fn new(size: usize, allocation: Allocation) -> Self {
        Self {
            bytes: (0..size).map(|_| AtomicU8::new(0)).collect(),
            maps: Mutex::new(Vec::new()),
            _allocation: allocation,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn read(&self, start: usize, dst: &mut [u8]) {
        for (d, s) in dst.iter_mut().zip(&self.bytes[start..]) {
            *d = s.load(Ordering::Relaxed);
        }
    }

    pub fn write(&self, start: usize, src: &[u8]) {
        for (d, s) in self.bytes[start..].iter().zip(src) {
            d.store(*s, Ordering::Relaxed);
        }
    }

    /// Repeat `pattern` over `len` bytes starting at `start`.
    pub fn fill(&self, start: usize, len: usize, pattern: &[u8]) {
        for (d, s) in self.bytes[start..start + len].iter().zip(pattern.iter().cycle()) {
            d.store(*s, Ordering::Relaxed);
        }
    }

    pub fn copy_to(&self, src_start: usize, dst: &DeviceMemory, dst_start: usize, len: usize) {
        let mut staging = vec![0u8; len];
        self.read(src_start, &mut staging);
        dst.write(dst_start, &staging);
    }

    pub fn add_map(&self, record: MapRecord) {
        self.maps.lock().push(record);
    }

    pub fn has_map(&self, view: u64, buffer: BufferId) -> bool {
        self.maps.lock().iter().any(|m| m.view == view && m.buffer == buffer)
    }

    /// Remove the mapping `view` made through `buffer`; false when there is none.
    pub fn remove_map(&self, view: u64, buffer: BufferId) -> bool {
        let mut maps = self.maps.lock();
        match maps.iter().position(|m| m.view == view && m.buffer == buffer) {
            Some(i) => {
                maps.swap_remove(i);
                true
            }
            None => false,
        }
    }

    pub fn mapped_overlap(&self, start: usize, end: usize) -> Option<MapRecord> {
        self.maps
            .lock()
            .iter()
            .find(|m| m.start < end && start < m.end)
            .copied()
    }

    pub fn map_count(&self) -> usize {
        self.maps.lock().len()
    }
}

/// A device memory region with a fixed access mode.
///
/// Cloning yields another handle to the same buffer. Memory returns to the
/// context when the last handle to the buffer (and all its sub-buffers) is
/// dropped.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    id: BufferId,
    context: ContextId,
    memory: Arc<DeviceMemory>,
    origin: usize,
    size: usize,
    access: AccessMode,
    parent: Option<Buffer>,
}

impl Buffer {
    pub(crate) fn allocate(context: ContextId, access: AccessMode, size: usize, allocation: Allocation) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                id: BufferId::next(),
                context,
                memory: Arc::new(DeviceMemory::new(size, allocation)),
                origin: 0,
                size,
                access,
                parent: None,
            }),
        }
    }

    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn access(&self) -> AccessMode {
        self.inner.access
    }

    /// Byte offset within the parent; 0 for a top-level buffer.
    pub fn origin(&self) -> usize {
        self.inner.origin
    }

    pub fn parent(&self) -> Option<&Buffer> {
        self.inner.parent.as_ref()
    }

    pub fn is_sub_buffer(&self) -> bool {
        self.inner.parent.is_some()
    }

    /// Number of live host mappings over the underlying memory.
    pub fn live_mappings(&self) -> usize {
        self.inner.memory.map_count()
    }

    /// A view of `size` bytes at `origin` that aliases this buffer's memory.
    pub fn create_sub_buffer(&self, access: AccessMode, origin: usize, size: usize) -> Result<Buffer> {
        if self.is_sub_buffer() {
            return Err(Error::InvalidSubBuffer(
                "cannot create a sub-buffer of a sub-buffer".to_string(),
            ));
        }
        if size == 0 {
            return Err(Error::InvalidSubBuffer("size must be non-zero".to_string()));
        }
        let end = origin
            .checked_add(size)
            .filter(|&end| end <= self.size())
            .ok_or_else(|| {
                Error::InvalidSubBuffer(format!(
                    "region at {origin} of {size} bytes exceeds parent size {}",
                    self.size()
                ))
            })?;
        if !access.within(self.access()) {
            return Err(Error::InvalidSubBuffer(format!(
                "{access:?} widens parent access {:?}",
                self.access()
            )));
        }

        debug!("sub-buffer of {} at {}..{}", self.id(), origin, end);
        Ok(Self {
            inner: Arc::new(BufferInner {
                id: BufferId::next(),
                context: self.inner.context,
                memory: Arc::clone(&self.inner.memory),
                origin,
                size,
                access,
                parent: Some(self.clone()),
            }),
        })
    }

    /// No other handle, sub-buffer, view or pending command refers to this buffer.
    pub(crate) fn is_exclusive(&self) -> bool {
        Arc::strong_count(&self.inner) == 1 && self.live_mappings() == 0
    }

    pub(crate) fn context_id(&self) -> ContextId {
        self.inner.context
    }

    pub(crate) fn memory(&self) -> &Arc<DeviceMemory> {
        &self.inner.memory
    }

    /// This buffer's window of device memory.
    pub(crate) fn device_bytes(&self) -> &[AtomicU8] {
        &self.inner.memory.bytes[self.inner.origin..self.inner.origin + self.inner.size]
    }

    /// Absolute memory range of `len` bytes at `offset`, bounds-checked.
    pub(crate) fn range(&self, offset: usize, len: usize) -> Result<(usize, usize)> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok((self.origin() + offset, self.origin() + end)),
            _ => Err(Error::OutOfBounds {
                offset,
                end: offset.saturating_add(len),
                size: self.size(),
            }),
        }
    }

    /// Fails when a live host mapping overlaps `len` bytes at `offset`.
    pub(crate) fn check_unmapped(&self, offset: usize, len: usize) -> Result<()> {
        let (start, end) = self.range(offset, len)?;
        match self.inner.memory.mapped_overlap(start, end) {
            Some(m) => Err(Error::ConcurrentAccessViolation {
                buffer: self.id(),
                offset: m.start.max(start) - self.origin(),
                end: m.end.min(end) - self.origin(),
            }),
            None => Ok(()),
        }
    }

    /// Whether this buffer and `other` share any bytes of device memory.
    pub(crate) fn overlaps(&self, offset: usize, other: &Buffer, other_offset: usize, len: usize) -> bool {
        if !Arc::ptr_eq(&self.inner.memory, &other.inner.memory) {
            return false;
        }
        let a = self.origin() + offset;
        let b = other.origin() + other_offset;
        a < b + len && b < a + len
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Buffer {}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Buffer");
        d.field("id", &self.inner.id)
            .field("size", &self.inner.size)
            .field("access", &self.inner.access);
        if let Some(parent) = &self.inner.parent {
            d.field("parent", &parent.id()).field("origin", &self.inner.origin);
        }
        d.finish()
    }
}
