pub use crate::config::{Config, ConfigBuilder};
pub use crate::context::{
    wait_for_events, CommandKind, CommandQueue, Context, Event, EventStatus, QueueOrdering, UserEvent,
};
pub use crate::dispatch::{
    ArgValue, KernelArgs, KernelFault, KernelResult, NdRange, PerGroup, PerItem, PendingRead, WorkGroup, WorkItem,
};
pub use crate::error::{Error, ErrorCategory, Result};
pub use crate::memory::{AccessMode, Buffer, BufferPool, HostView, MapMode};
pub use crate::platform::{Device, DeviceType, DeviceTypeFilter, Enumerator, KernelLibrary, Platform};
pub use crate::program::{BuildReport, BuildStatus, Kernel, Program};

#[cfg(feature = "telemetry")]
pub use crate::telemetry::{Metrics, MetricsSnapshot};
