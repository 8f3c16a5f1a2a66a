//! Compute units of the host device.
//!
//! Each device in a context gets a [`ComputePool`]: worker threads that
//! steal ND-range work-groups from each other through `crossbeam-deque`.

pub mod compute_pool;
pub mod panic_handler;
pub mod task;
pub mod worker;

pub use compute_pool::{ComputePool, PoolStats};
pub use panic_handler::{CaughtPanic, PanicHandler};

pub(crate) use compute_pool::NdRangeJob;
