//! Kernel argument binding, index-space partitioning and command
//! submission.
//!
//! Launches and transfers are methods on [`CommandQueue`](crate::CommandQueue);
//! this module holds the types they work with and what kernel bodies see.

pub mod args;
mod engine;
pub mod ndrange;
mod transfer;
pub mod work_item;

pub use args::{ArgValue, Scalar, ScalarType, ScalarValue};
pub use ndrange::{padded_extent, NdRange, Partition};
pub use transfer::PendingRead;
pub use work_item::{
    KernelArgs, KernelFault, KernelFn, KernelResult, MemRef, PerGroup, PerItem, WorkGroup, WorkItem,
};
