//! Host mappings of device buffers.
//!
//! Mapping copies a region into a host staging area once the map command
//! runs. Unmapping is itself a command: for write mappings it copies the
//! staging area back, and only then do later device commands see the
//! host's writes. If the queue can no longer take the unmap, the
//! write-back runs on the calling thread instead.

use super::buffer::{Buffer, MapMode, MapRecord};
use crate::context::event::{CommandFailure, CommandKind, Event};
use crate::context::queue::Operation;
use crate::context::CommandQueue;
use crate::error::{Error, Result};
use crate::util::id::object_id;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

object_id!(
    /// Identifies one host mapping.
    MapId,
    "mapping"
);

type Slot = Arc<Mutex<Option<Vec<u128>>>>;

enum Staging {
    /// Filled by the map command when it runs.
    Pending(Slot),
    Ready(Vec<u128>),
    Released,
}

/// Host-visible window onto a mapped buffer region.
///
/// A non-blocking map returns a view that is not ready until its map
/// command has run; call [`wait`](Self::wait) first. Dropping a view that
/// was never unmapped enqueues the unmap on the queue that mapped it.
pub struct HostView {
    buffer: Buffer,
    id: MapId,
    offset: usize,
    len: usize,
    mode: MapMode,
    event: Event,
    staging: Staging,
    queue: Option<CommandQueue>,
}

impl HostView {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Byte offset of the mapped region within the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    /// Event of the map command.
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.staging, Staging::Ready(_))
    }

    /// Block until the map command has run and the contents are available.
    pub fn wait(&mut self) -> Result<()> {
        if let Staging::Pending(slot) = &self.staging {
            self.event.wait()?;
            let data = slot.lock().take().ok_or(Error::MapNotReady)?;
            self.staging = Staging::Ready(data);
        }
        Ok(())
    }

    pub fn bytes(&self) -> Result<&[u8]> {
        match &self.staging {
            Staging::Ready(data) => Ok(&bytemuck::cast_slice(data)[..self.len]),
            _ => Err(Error::MapNotReady),
        }
    }

    pub fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        if !self.mode.writes() {
            return Err(Error::AccessModeViolation {
                mode: self.buffer.access(),
                requested: MapMode::Write,
            });
        }
        let len = self.len;
        match &mut self.staging {
            Staging::Ready(data) => Ok(&mut bytemuck::cast_slice_mut(data)[..len]),
            _ => Err(Error::MapNotReady),
        }
    }

    /// The mapped bytes as elements of `T`.
    pub fn as_slice<T: bytemuck::Pod>(&self) -> Result<&[T]> {
        bytemuck::try_cast_slice(self.bytes()?).map_err(|e| Error::invalid_arg(format!("host view as slice: {e}")))
    }

    pub fn as_mut_slice<T: bytemuck::Pod>(&mut self) -> Result<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.bytes_mut()?)
            .map_err(|e| Error::invalid_arg(format!("host view as slice: {e}")))
    }

    /// Enqueue the unmap on the queue that created this view.
    pub fn unmap(self, wait_list: &[Event]) -> Result<Event> {
        let queue = match &self.queue {
            Some(queue) => queue.clone(),
            None => return Err(Error::UnmapWithoutMap(self.buffer.id())),
        };
        let buffer = self.buffer.clone();
        queue.enqueue_unmap(&buffer, self, wait_list)
    }

    /// Detach the view and build the command that ends the mapping.
    fn take_unmap(&mut self) -> Operation {
        self.queue = None;
        let staging = std::mem::replace(&mut self.staging, Staging::Released);
        if !self.mode.writes() {
            return Box::new(|| Ok(()));
        }

        let buffer = self.buffer.clone();
        let (offset, len) = (self.offset, self.len);
        Box::new(move || {
            let data = match staging {
                Staging::Ready(data) => data,
                Staging::Pending(slot) => slot.lock().take().ok_or(CommandFailure::Aborted)?,
                Staging::Released => return Ok(()),
            };
            let start = buffer.origin() + offset;
            buffer.memory().write(start, &bytemuck::cast_slice(&data)[..len]);
            Ok(())
        })
    }
}

impl Drop for HostView {
    fn drop(&mut self) {
        let Some(queue) = self.queue.clone() else {
            return;
        };
        warn!(
            "{} of {} dropped while mapped; enqueueing unmap",
            self.id,
            self.buffer.id()
        );
        self.buffer.memory().remove_map(self.id.as_u64(), self.buffer.id());
        let written = self.mode.writes().then_some(self.len);
        let op = self.take_unmap();
        if let Err(e) = queue.submit_unmap(self.id, &[self.event.clone()], op, written) {
            debug!("implicit unmap of {} not enqueued: {}", self.id, e);
        }
    }
}

impl fmt::Debug for HostView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostView")
            .field("id", &self.id)
            .field("buffer", &self.buffer.id())
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("mode", &self.mode)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl CommandQueue {
    /// Map `len` bytes of `buffer` at `offset` into host memory.
    ///
    /// With `blocking`, the call returns once the contents are available.
    /// Otherwise the returned view must be waited on before access.
    pub fn enqueue_map_buffer(
        &self,
        buffer: &Buffer,
        blocking: bool,
        mode: MapMode,
        offset: usize,
        len: usize,
        wait_list: &[Event],
    ) -> Result<HostView> {
        self.check_live()?;
        if buffer.context_id() != self.context_id() {
            return Err(Error::ContextMismatch);
        }
        if !buffer.access().permits(mode) {
            return Err(Error::AccessModeViolation {
                mode: buffer.access(),
                requested: mode,
            });
        }
        if len == 0 {
            return Err(Error::invalid_arg("cannot map an empty region"));
        }
        let (start, end) = buffer.range(offset, len)?;

        let id = MapId::next();
        buffer.memory().add_map(MapRecord {
            view: id.as_u64(),
            buffer: buffer.id(),
            start,
            end,
        });

        let slot: Slot = Arc::new(Mutex::new(None));
        let op: Operation = {
            let memory = Arc::clone(buffer.memory());
            let slot = Arc::clone(&slot);
            let metrics = Arc::clone(self.metrics());
            Box::new(move || {
                let mut data = vec![0u128; len.div_ceil(16)];
                memory.read(start, &mut bytemuck::cast_slice_mut(&mut data)[..len]);
                *slot.lock() = Some(data);
                metrics.record_read(len);
                Ok(())
            })
        };

        let event = match self.enqueue(CommandKind::MapBuffer, wait_list, op) {
            Ok(event) => event,
            Err(e) => {
                buffer.memory().remove_map(id.as_u64(), buffer.id());
                return Err(e);
            }
        };

        let mut view = HostView {
            buffer: buffer.clone(),
            id,
            offset,
            len,
            mode,
            event,
            staging: Staging::Pending(slot),
            queue: Some(self.clone()),
        };
        if blocking {
            view.wait()?;
        }
        Ok(view)
    }

    /// End a mapping. Written contents become visible to device commands
    /// that run after the returned event.
    ///
    /// A view rejected here is dropped, which unmaps it on the queue that
    /// mapped it.
    pub fn enqueue_unmap(&self, buffer: &Buffer, mut view: HostView, wait_list: &[Event]) -> Result<Event> {
        self.check_live()?;
        if buffer.context_id() != self.context_id() || wait_list.iter().any(|e| e.context_id() != self.context_id()) {
            return Err(Error::ContextMismatch);
        }
        if view.buffer != *buffer || !buffer.memory().has_map(view.id.as_u64(), buffer.id()) {
            return Err(Error::UnmapWithoutMap(buffer.id()));
        }

        buffer.memory().remove_map(view.id.as_u64(), buffer.id());
        let mut deps = wait_list.to_vec();
        deps.push(view.event.clone());
        let written = view.mode.writes().then_some(view.len);
        let op = view.take_unmap();
        self.submit_unmap(view.id, &deps, op, written)
    }

    /// Enqueue the write-back `op` of mapping `id`. When the queue refuses
    /// it, the write-back runs here so the host's writes are not lost.
    fn submit_unmap(&self, id: MapId, deps: &[Event], op: Operation, written: Option<usize>) -> Result<Event> {
        let cell = Arc::new(Mutex::new(Some(op)));
        let queued = Arc::clone(&cell);
        let metrics = Arc::clone(self.metrics());

        let result = self.enqueue(
            CommandKind::UnmapBuffer,
            deps,
            Box::new(move || {
                let op = queued.lock().take();
                if let Some(op) = op {
                    op()?;
                }
                if let Some(len) = written {
                    metrics.record_write(len);
                }
                Ok(())
            }),
        );

        if let Err(e) = &result {
            let op = cell.lock().take();
            if let Some(op) = op {
                warn!("unmap of {} not enqueued ({}); writing back on the host", id, e);
                if let Err(failure) = op() {
                    debug!("host write-back of {} skipped: {}", id, failure);
                }
            }
        }
        result
    }
}
