//! ND-range launches.

use super::ndrange::NdRange;
use super::work_item::BoundArg;
use crate::context::event::{CommandFailure, CommandKind, Event};
use crate::context::CommandQueue;
use crate::error::{Error, Result};
use crate::executor::NdRangeJob;
use crate::program::Kernel;
use std::sync::Arc;
use tracing::debug;

impl CommandQueue {
    /// Enqueue `kernel` over `range` with its current argument bindings.
    ///
    /// When the range has a local size, each dimension's global size is
    /// rounded up to a multiple of it and the kernel observes the padded
    /// size. Kernels must bound-check against the size they were given.
    pub fn enqueue_nd_range(&self, kernel: &Kernel, range: &NdRange, wait_list: &[Event]) -> Result<Event> {
        self.check_live()?;
        if kernel.program().context().id() != self.context_id() {
            return Err(Error::ContextMismatch);
        }

        let device = self.device();
        let caps = device.capabilities();
        let snapshot = kernel.launch_snapshot(device)?;
        let partition = range.partition(caps)?;

        if snapshot.local_mem > caps.local_mem_size {
            return Err(Error::OutOfResources(format!(
                "kernel '{}' needs {} bytes of local memory, device '{}' has {}",
                kernel.name(),
                snapshot.local_mem,
                device.name(),
                caps.local_mem_size
            )));
        }
        for arg in &snapshot.args {
            if let BoundArg::Memory(buffer) = arg {
                if buffer.context_id() != self.context_id() {
                    return Err(Error::ContextMismatch);
                }
                buffer.check_unmapped(0, buffer.size())?;
            }
        }

        debug!(
            "enqueue '{}' on {}: global {:?}, local {:?}, {} group(s)",
            kernel.name(),
            self.id(),
            &partition.padded[..partition.work_dim],
            &partition.local[..partition.work_dim],
            partition.group_count()
        );

        let name = kernel.name().to_string();
        let pool = Arc::clone(self.pool());
        let metrics = Arc::clone(self.metrics());
        let job = NdRangeJob::new(name.clone(), snapshot.body, partition, snapshot.args);
        self.enqueue(
            CommandKind::NdRange,
            wait_list,
            Box::new(move || {
                metrics.record_kernel_launch();
                pool.run_ndrange(job)
                    .map_err(|message| CommandFailure::KernelFault { kernel: name, message })
            }),
        )
    }
}
