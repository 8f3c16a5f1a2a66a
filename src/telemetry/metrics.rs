//! Counters and latency histogram for one context.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Dispatch metrics collector
#[derive(Debug)]
pub struct Metrics {
    // Command counters
    commands_enqueued: AtomicU64,
    commands_completed: AtomicU64,
    commands_failed: AtomicU64,

    // Kernel execution
    kernels_launched: AtomicU64,
    work_groups_executed: AtomicU64,
    kernel_panics: AtomicU64,

    // Transfers
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    bytes_copied: AtomicU64,

    // Queue-to-completion latency
    latency_histogram: RwLock<Histogram<u64>>,

    // Device memory
    memory_allocated: AtomicU64,
    peak_memory_allocated: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        // 3 significant figures, max one hour in nanoseconds
        let histogram =
            Histogram::new_with_max(3_600_000_000_000, 3).expect("histogram bounds are valid");

        Self {
            commands_enqueued: AtomicU64::new(0),
            commands_completed: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            kernels_launched: AtomicU64::new(0),
            work_groups_executed: AtomicU64::new(0),
            kernel_panics: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            latency_histogram: RwLock::new(histogram),
            memory_allocated: AtomicU64::new(0),
            peak_memory_allocated: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_enqueued(&self) {
        self.commands_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a command reaching a terminal state after `latency`.
    pub fn record_completed(&self, latency: Duration, failed: bool) {
        if failed {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commands_completed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(mut hist) = self.latency_histogram.try_write() {
            let _ = hist.record(latency.as_nanos().min(u64::MAX as u128) as u64);
        }
    }

    pub fn record_kernel_launch(&self) {
        self.kernels_launched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_work_groups(&self, count: u64) {
        self.work_groups_executed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_kernel_panic(&self) {
        self.kernel_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_copy(&self, bytes: usize) {
        self.bytes_copied.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_allocation(&self, bytes: u64) {
        let now = self.memory_allocated.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak_memory_allocated.fetch_max(now, Ordering::Relaxed);
    }

    pub fn record_release(&self, bytes: u64) {
        self.memory_allocated.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.latency_histogram.read();

        MetricsSnapshot {
            timestamp: Instant::now(),
            uptime: self.start_time.elapsed(),
            commands_enqueued: self.commands_enqueued.load(Ordering::Relaxed),
            commands_completed: self.commands_completed.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            kernels_launched: self.kernels_launched.load(Ordering::Relaxed),
            work_groups_executed: self.work_groups_executed.load(Ordering::Relaxed),
            kernel_panics: self.kernel_panics.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            avg_latency_ns: if histogram.len() > 0 {
                histogram.mean() as u64
            } else {
                0
            },
            p50_latency_ns: histogram.value_at_quantile(0.50),
            p95_latency_ns: histogram.value_at_quantile(0.95),
            p99_latency_ns: histogram.value_at_quantile(0.99),
            max_latency_ns: histogram.max(),
            memory_allocated: self.memory_allocated.load(Ordering::Relaxed),
            peak_memory_allocated: self.peak_memory_allocated.load(Ordering::Relaxed),
        }
    }

    /// Reset counters and the histogram. Memory figures track live
    /// allocations and are left alone.
    pub fn reset(&self) {
        for counter in [
            &self.commands_enqueued,
            &self.commands_completed,
            &self.commands_failed,
            &self.kernels_launched,
            &self.work_groups_executed,
            &self.kernel_panics,
            &self.bytes_written,
            &self.bytes_read,
            &self.bytes_copied,
        ] {
            counter.store(0, Ordering::Relaxed);
        }

        if let Some(mut hist) = self.latency_histogram.try_write() {
            hist.reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: Instant,
    pub uptime: Duration,
    pub commands_enqueued: u64,
    pub commands_completed: u64,
    pub commands_failed: u64,
    pub kernels_launched: u64,
    pub work_groups_executed: u64,
    pub kernel_panics: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub bytes_copied: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p95_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
    pub memory_allocated: u64,
    pub peak_memory_allocated: u64,
}

impl MetricsSnapshot {
    /// Commands enqueued but not yet terminal.
    pub fn commands_in_flight(&self) -> u64 {
        self.commands_enqueued
            .saturating_sub(self.commands_completed + self.commands_failed)
    }

    pub fn commands_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        (self.commands_completed + self.commands_failed) as f64 / seconds
    }

    /// Host/device traffic in bytes.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_written + self.bytes_read + self.bytes_copied
    }
}
