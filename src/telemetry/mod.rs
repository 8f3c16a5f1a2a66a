//! Dispatch metrics and their export.
//!
//! Every context owns one [`Metrics`] collector shared by its queues and
//! compute pools. With the `telemetry` feature disabled the collector is a
//! no-op with the same interface.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub mod export;

#[cfg(feature = "telemetry")]
pub use metrics::{Metrics, MetricsSnapshot};

#[cfg(feature = "telemetry")]
pub use export::{ConsoleExporter, JsonExporter, MetricsExporter};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    use std::time::Duration;

    #[derive(Debug, Clone, Default)]
    pub struct Metrics;

    impl Metrics {
        pub fn new() -> Self {
            Self
        }
        pub fn record_enqueued(&self) {}
        pub fn record_completed(&self, _: Duration, _: bool) {}
        pub fn record_kernel_launch(&self) {}
        pub fn record_work_groups(&self, _: u64) {}
        pub fn record_kernel_panic(&self) {}
        pub fn record_write(&self, _: usize) {}
        pub fn record_read(&self, _: usize) {}
        pub fn record_copy(&self, _: usize) {}
        pub fn record_allocation(&self, _: u64) {}
        pub fn record_release(&self, _: u64) {}
        pub fn snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
        pub fn reset(&self) {}
    }

    #[derive(Debug, Clone, Default)]
    pub struct MetricsSnapshot {
        pub commands_enqueued: u64,
        pub commands_completed: u64,
        pub commands_failed: u64,
        pub kernels_launched: u64,
        pub work_groups_executed: u64,
        pub bytes_written: u64,
        pub bytes_read: u64,
        pub bytes_copied: u64,
        pub memory_allocated: u64,
    }
}

#[cfg(not(feature = "telemetry"))]
pub use metrics::{Metrics, MetricsSnapshot};
