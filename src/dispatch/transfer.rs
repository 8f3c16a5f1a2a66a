//! Host/device and device/device transfers.
//!
//! Transfers copy host data at enqueue time, so the caller's slice is free
//! as soon as the call returns, blocking or not.

use crate::context::event::{CommandKind, Event};
use crate::context::CommandQueue;
use crate::error::{Error, Result};
use crate::memory::Buffer;
use bytemuck::Pod;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Result of a non-blocking read; the data arrives when its event completes.
pub struct PendingRead<T> {
    event: Event,
    slot: Arc<Mutex<Option<Vec<T>>>>,
}

impl<T: Pod> PendingRead<T> {
    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn is_ready(&self) -> bool {
        self.event.is_complete()
    }

    /// Block until the read has run and take its data.
    pub fn wait(self) -> Result<Vec<T>> {
        self.event.wait()?;
        self.slot.lock().take().ok_or(Error::MapNotReady)
    }
}

impl<T> fmt::Debug for PendingRead<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRead").field("event", &self.event).finish()
    }
}

impl CommandQueue {
    fn check_buffer(&self, buffer: &Buffer, offset: usize, len: usize) -> Result<(usize, usize)> {
        if buffer.context_id() != self.context_id() {
            return Err(Error::ContextMismatch);
        }
        let range = buffer.range(offset, len)?;
        buffer.check_unmapped(offset, len)?;
        Ok(range)
    }

    /// Copy `data` into `buffer` at byte `offset`.
    pub fn enqueue_write_buffer<T: Pod>(
        &self,
        buffer: &Buffer,
        blocking: bool,
        offset: usize,
        data: &[T],
        wait_list: &[Event],
    ) -> Result<Event> {
        self.check_live()?;
        let bytes: Vec<u8> = bytemuck::cast_slice(data).to_vec();
        let (start, _) = self.check_buffer(buffer, offset, bytes.len())?;

        let memory = Arc::clone(buffer.memory());
        let metrics = Arc::clone(self.metrics());
        let event = self.enqueue(
            CommandKind::WriteBuffer,
            wait_list,
            Box::new(move || {
                memory.write(start, &bytes);
                metrics.record_write(bytes.len());
                Ok(())
            }),
        )?;
        if blocking {
            event.wait()?;
        }
        Ok(event)
    }

    /// Read `count` elements of `T` from `buffer` at byte `offset`.
    pub fn enqueue_read_buffer<T: Pod + Send>(
        &self,
        buffer: &Buffer,
        offset: usize,
        count: usize,
        wait_list: &[Event],
    ) -> Result<PendingRead<T>> {
        self.check_live()?;
        let len = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| Error::invalid_arg("read length overflows"))?;
        let (start, _) = self.check_buffer(buffer, offset, len)?;

        let slot = Arc::new(Mutex::new(None));
        let memory = Arc::clone(buffer.memory());
        let metrics = Arc::clone(self.metrics());
        let filled = Arc::clone(&slot);
        let event = self.enqueue(
            CommandKind::ReadBuffer,
            wait_list,
            Box::new(move || {
                let mut data = vec![T::zeroed(); count];
                memory.read(start, bytemuck::cast_slice_mut(&mut data));
                *filled.lock() = Some(data);
                metrics.record_read(len);
                Ok(())
            }),
        )?;
        Ok(PendingRead { event, slot })
    }

    /// Blocking read filling `out` from byte `offset`.
    pub fn read_buffer<T: Pod + Send>(&self, buffer: &Buffer, offset: usize, out: &mut [T]) -> Result<()> {
        let data = self.enqueue_read_buffer::<T>(buffer, offset, out.len(), &[])?.wait()?;
        out.copy_from_slice(&data);
        Ok(())
    }

    /// Copy `len` bytes between buffers. Overlapping regions of the same
    /// memory are rejected.
    pub fn enqueue_copy_buffer(
        &self,
        src: &Buffer,
        dst: &Buffer,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        wait_list: &[Event],
    ) -> Result<Event> {
        self.check_live()?;
        let (src_start, _) = self.check_buffer(src, src_offset, len)?;
        let (dst_start, _) = self.check_buffer(dst, dst_offset, len)?;
        if src.overlaps(src_offset, dst, dst_offset, len) {
            return Err(Error::invalid_arg("source and destination regions overlap"));
        }

        let from = Arc::clone(src.memory());
        let to = Arc::clone(dst.memory());
        let metrics = Arc::clone(self.metrics());
        self.enqueue(
            CommandKind::CopyBuffer,
            wait_list,
            Box::new(move || {
                from.copy_to(src_start, &to, dst_start, len);
                metrics.record_copy(len);
                Ok(())
            }),
        )
    }

    /// Repeat `pattern` over `size` bytes at `offset`. Both must be
    /// multiples of the pattern size.
    pub fn enqueue_fill_buffer<T: Pod>(
        &self,
        buffer: &Buffer,
        pattern: T,
        offset: usize,
        size: usize,
        wait_list: &[Event],
    ) -> Result<Event> {
        self.check_live()?;
        let pattern: Vec<u8> = bytemuck::bytes_of(&pattern).to_vec();
        if pattern.is_empty() || offset % pattern.len() != 0 || size % pattern.len() != 0 {
            return Err(Error::invalid_arg(format!(
                "fill of {size} bytes at {offset} is not aligned to a {}-byte pattern",
                pattern.len()
            )));
        }
        let (start, _) = self.check_buffer(buffer, offset, size)?;

        let memory = Arc::clone(buffer.memory());
        let metrics = Arc::clone(self.metrics());
        self.enqueue(
            CommandKind::FillBuffer,
            wait_list,
            Box::new(move || {
                memory.fill(start, size, &pattern);
                metrics.record_write(size);
                Ok(())
            }),
        )
    }
}
