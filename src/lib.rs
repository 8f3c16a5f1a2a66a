//! cldispatch - a compute dispatch core
//!
//! Select a platform and device, create a context and command queues,
//! build kernel programs, allocate device buffers with fixed access modes,
//! bind kernel arguments and enqueue ND-range execution and memory
//! transfers, observing completion through events.
//!
//! Native runtimes plug in behind the [`Driver`](platform::Driver) trait.
//! The built-in [`HostDriver`](platform::HostDriver) runs kernels on host
//! threads, linking each `__kernel` entry point in the source to a Rust
//! body registered in a [`KernelLibrary`].
//!
//! # Quick Start
//!
//! ```no_run
//! use cldispatch::prelude::*;
//!
//! let library = KernelLibrary::new();
//! library.register_fn("vadd", |item, args| {
//!     let i = item.global_id(0);
//!     let (a, b, c) = (args.global::<f32>(0)?, args.global::<f32>(1)?, args.global::<f32>(2)?);
//!     if i < c.len() {
//!         c.set(i, a.get(i)? + b.get(i)?)?;
//!     }
//!     Ok(())
//! });
//!
//! let config = Config::default();
//! let enumerator = Enumerator::with_library(library, &config)?;
//! let device = enumerator.first_device(DeviceTypeFilter::ALL)?;
//! let context = Context::new(&[device], &config)?;
//! let queue = context.create_default_queue()?;
//!
//! let program = context.create_program(
//!     "__kernel void vadd(__global const float* a, __global const float* b, __global float* c) {}",
//! )?;
//! program.build(&[], "")?;
//! let kernel = program.create_kernel("vadd")?;
//!
//! let a = context.create_buffer_with_data(AccessMode::ReadOnly, &[1.0f32; 16])?;
//! let b = context.create_buffer_with_data(AccessMode::ReadOnly, &[2.0f32; 16])?;
//! let c = context.create_buffer(AccessMode::WriteOnly, 16 * 4)?;
//! kernel.set_arg(0, &a)?;
//! kernel.set_arg(1, &b)?;
//! kernel.set_arg(2, &c)?;
//!
//! queue.enqueue_nd_range(&kernel, &NdRange::linear(16), &[])?;
//! queue.finish()?;
//! # Ok::<(), cldispatch::Error>(())
//! ```
//!
//! # Features
//!
//! - **telemetry** (default): command, transfer and memory metrics with
//!   JSON and console export
//! - **async**: `Event::wait_async` futures

#![warn(missing_debug_implementations)]

pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod memory;
pub mod platform;
pub mod prelude;
pub mod program;
pub mod telemetry;
pub(crate) mod util;

pub use config::{Config, ConfigBuilder};
pub use context::{CommandQueue, Context, Event, EventStatus, QueueOrdering, UserEvent};
pub use dispatch::{ArgValue, NdRange};
pub use error::{Error, ErrorCategory, Result};
pub use memory::{AccessMode, Buffer, HostView, MapMode};
pub use platform::{Device, DeviceType, DeviceTypeFilter, Enumerator, KernelLibrary, Platform};
pub use program::{BuildReport, Kernel, Program};
