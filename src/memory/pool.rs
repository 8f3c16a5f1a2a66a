//! Buffer recycling.

use super::buffer::{AccessMode, Buffer};
use crate::context::Context;
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keeps released buffers of a context for reuse, keyed by size and access.
///
/// Recycled buffers keep their previous contents.
pub struct BufferPool {
    context: Context,
    free: Mutex<HashMap<(usize, AccessMode), Vec<Buffer>>>,
    max_per_class: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferPool {
    pub fn new(context: &Context) -> Self {
        Self::with_capacity(context, 8)
    }

    /// Keep at most `max_per_class` idle buffers of each size and access mode.
    pub fn with_capacity(context: &Context, max_per_class: usize) -> Self {
        Self {
            context: context.clone(),
            free: Mutex::new(HashMap::new()),
            max_per_class,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn acquire(&self, access: AccessMode, size: usize) -> Result<Buffer> {
        let recycled = self
            .free
            .lock()
            .get_mut(&(size, access))
            .and_then(Vec::pop);
        if let Some(buffer) = recycled {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(buffer);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.context.create_buffer(access, size)
    }

    /// Return a buffer for reuse. Returns false (and drops the buffer) if it
    /// is a sub-buffer, is still referenced elsewhere, or its class is full.
    pub fn release(&self, buffer: Buffer) -> bool {
        if buffer.is_sub_buffer() || !buffer.is_exclusive() || buffer.context_id() != self.context.id() {
            return false;
        }
        let mut free = self.free.lock();
        let class = free.entry((buffer.size(), buffer.access())).or_default();
        if class.len() >= self.max_per_class {
            return false;
        }
        class.push(buffer);
        true
    }

    /// Idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().values().map(Vec::len).sum()
    }

    /// Drop every idle buffer, returning its memory to the context.
    pub fn clear(&self) {
        self.free.lock().clear();
    }

    /// (recycled, newly allocated) acquisition counts.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("context", &self.context.id())
            .field("idle", &self.idle())
            .field("max_per_class", &self.max_per_class)
            .finish()
    }
}
