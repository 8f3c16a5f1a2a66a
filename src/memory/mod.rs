//! Device memory regions.
//!
//! Buffers are created through a [`Context`](crate::Context) and carry an
//! access mode fixed at creation. Host access goes through transfers or
//! through map/unmap, which hands out a [`HostView`].

pub mod buffer;
pub mod mapping;
pub mod pool;

pub use buffer::{AccessMode, Buffer, BufferId, MapMode};
pub use mapping::{HostView, MapId};
pub use pool::BufferPool;

pub(crate) use buffer::{Allocation, MemoryBudget};
