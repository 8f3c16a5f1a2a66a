//! Metrics export to JSON files and the console.

use super::metrics::MetricsSnapshot;
use crate::error::{Error, Result};
use std::path::PathBuf;

pub trait MetricsExporter: Send + Sync {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Writes snapshots as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    output_path: PathBuf,
}

impl JsonExporter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    pub fn render(snapshot: &MetricsSnapshot) -> Result<String> {
        serde_json::to_string_pretty(&SerializableSnapshot::from(snapshot))
            .map_err(|e| Error::config(format!("metrics serialization failed: {e}")))
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let json = Self::render(snapshot)?;
        std::fs::write(&self.output_path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
struct SerializableSnapshot {
    uptime_secs: f64,
    commands_enqueued: u64,
    commands_completed: u64,
    commands_failed: u64,
    kernels_launched: u64,
    work_groups_executed: u64,
    kernel_panics: u64,
    bytes_written: u64,
    bytes_read: u64,
    bytes_copied: u64,
    avg_latency_us: f64,
    p50_latency_us: f64,
    p95_latency_us: f64,
    p99_latency_us: f64,
    max_latency_us: f64,
    memory_allocated_mb: f64,
    peak_memory_allocated_mb: f64,
    commands_per_second: f64,
}

impl From<&MetricsSnapshot> for SerializableSnapshot {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            uptime_secs: snapshot.uptime.as_secs_f64(),
            commands_enqueued: snapshot.commands_enqueued,
            commands_completed: snapshot.commands_completed,
            commands_failed: snapshot.commands_failed,
            kernels_launched: snapshot.kernels_launched,
            work_groups_executed: snapshot.work_groups_executed,
            kernel_panics: snapshot.kernel_panics,
            bytes_written: snapshot.bytes_written,
            bytes_read: snapshot.bytes_read,
            bytes_copied: snapshot.bytes_copied,
            avg_latency_us: snapshot.avg_latency_ns as f64 / 1_000.0,
            p50_latency_us: snapshot.p50_latency_ns as f64 / 1_000.0,
            p95_latency_us: snapshot.p95_latency_ns as f64 / 1_000.0,
            p99_latency_us: snapshot.p99_latency_ns as f64 / 1_000.0,
            max_latency_us: snapshot.max_latency_ns as f64 / 1_000.0,
            memory_allocated_mb: mb(snapshot.memory_allocated),
            peak_memory_allocated_mb: mb(snapshot.peak_memory_allocated),
            commands_per_second: snapshot.commands_per_second(),
        }
    }
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Prints snapshots to stdout.
#[derive(Debug, Clone, Default)]
pub struct ConsoleExporter {
    verbose: bool,
}

impl ConsoleExporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl MetricsExporter for ConsoleExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        println!("=== cldispatch metrics ===");
        println!("Uptime: {:.2}s", snapshot.uptime.as_secs_f64());
        println!(
            "Commands: {} enqueued, {} completed, {} failed",
            snapshot.commands_enqueued, snapshot.commands_completed, snapshot.commands_failed
        );
        println!(
            "Kernels: {} launched, {} work-groups",
            snapshot.kernels_launched, snapshot.work_groups_executed
        );
        println!("Transferred: {} bytes", snapshot.bytes_transferred());

        if self.verbose {
            println!("\nLatency:");
            println!("  Average: {:.2}μs", snapshot.avg_latency_ns as f64 / 1_000.0);
            println!("  P50: {:.2}μs", snapshot.p50_latency_ns as f64 / 1_000.0);
            println!("  P95: {:.2}μs", snapshot.p95_latency_ns as f64 / 1_000.0);
            println!("  P99: {:.2}μs", snapshot.p99_latency_ns as f64 / 1_000.0);
            println!("  Max: {:.2}μs", snapshot.max_latency_ns as f64 / 1_000.0);

            println!("\nDevice memory:");
            println!("  Allocated: {:.2}MB", mb(snapshot.memory_allocated));
            println!("  Peak: {:.2}MB", mb(snapshot.peak_memory_allocated));
        }

        println!("==========================");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Metrics;
    use std::time::Duration;

    fn sample() -> MetricsSnapshot {
        let metrics = Metrics::new();
        metrics.record_enqueued();
        metrics.record_kernel_launch();
        metrics.record_work_groups(4);
        metrics.record_completed(Duration::from_micros(20), false);
        metrics.record_allocation(2 * 1024 * 1024);
        metrics.snapshot()
    }

    #[test]
    fn json_contains_counters() {
        let json = JsonExporter::render(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["work_groups_executed"], 4);
        assert_eq!(value["memory_allocated_mb"], 2.0);
    }

    #[test]
    fn json_exporter_writes_file() {
        let path = std::env::temp_dir().join(format!("cldispatch_metrics_{}.json", std::process::id()));
        JsonExporter::new(&path).export(&sample()).unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn console_exporter_prints() {
        assert!(ConsoleExporter::new(true).export(&sample()).is_ok());
    }
}
