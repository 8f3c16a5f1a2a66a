use crate::context::QueueOrdering;
use crate::error::{Error, Result};

/// Runtime configuration for enumerators and contexts.
///
/// The `host_*` fields describe the capabilities of the built-in host
/// device; drivers that describe real hardware report their own limits.
#[derive(Debug, Clone)]
pub struct Config {
    /// Compute units (worker threads) per device pool. Defaults to the CPU count.
    pub compute_units: Option<usize>,
    /// Ordering used by [`Context::create_default_queue`](crate::Context::create_default_queue).
    pub default_ordering: QueueOrdering,
    /// Commands that may be in flight on one queue before enqueue blocks.
    pub max_pending_commands: usize,
    /// Record submit/start/end timestamps on events.
    pub profiling: bool,

    pub pin_workers: bool,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,

    pub host_max_work_group_size: usize,
    pub host_max_work_item_sizes: [usize; 3],
    pub host_global_mem_size: u64,
    pub host_max_alloc_size: u64,
    pub host_local_mem_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compute_units: None,
            default_ordering: QueueOrdering::InOrder,
            max_pending_commands: 1024,
            profiling: true,

            pin_workers: false,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "cldispatch".to_string(),

            host_max_work_group_size: 1024,
            host_max_work_item_sizes: [1024, 1024, 64],
            host_global_mem_size: 512 * 1024 * 1024,
            host_max_alloc_size: 128 * 1024 * 1024,
            host_local_mem_size: 32 * 1024,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.compute_units {
            if n == 0 {
                return Err(Error::config("compute_units must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("compute_units too large (max 1024)"));
            }
        }

        if self.max_pending_commands == 0 {
            return Err(Error::config("max_pending_commands must be > 0"));
        }

        if self.host_max_work_group_size == 0 {
            return Err(Error::config("host_max_work_group_size must be > 0"));
        }

        if self.host_max_work_item_sizes.iter().any(|&s| s == 0) {
            return Err(Error::config("host_max_work_item_sizes must all be > 0"));
        }

        if self.host_global_mem_size == 0 {
            return Err(Error::config("host_global_mem_size must be > 0"));
        }

        if self.host_max_alloc_size == 0 || self.host_max_alloc_size > self.host_global_mem_size {
            return Err(Error::config(
                "host_max_alloc_size must be in 1..=host_global_mem_size",
            ));
        }

        if self.host_local_mem_size == 0 {
            return Err(Error::config("host_local_mem_size must be > 0"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.compute_units.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn compute_units(mut self, n: usize) -> Self {
        self.config.compute_units = Some(n);
        self
    }

    pub fn default_ordering(mut self, ordering: QueueOrdering) -> Self {
        self.config.default_ordering = ordering;
        self
    }

    pub fn max_pending_commands(mut self, n: usize) -> Self {
        self.config.max_pending_commands = n;
        self
    }

    pub fn profiling(mut self, enable: bool) -> Self {
        self.config.profiling = enable;
        self
    }

    pub fn pin_workers(mut self, pin: bool) -> Self {
        self.config.pin_workers = pin;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn host_max_work_group_size(mut self, size: usize) -> Self {
        self.config.host_max_work_group_size = size;
        self
    }

    pub fn host_max_work_item_sizes(mut self, sizes: [usize; 3]) -> Self {
        self.config.host_max_work_item_sizes = sizes;
        self
    }

    pub fn host_global_mem_size(mut self, bytes: u64) -> Self {
        self.config.host_global_mem_size = bytes;
        self
    }

    pub fn host_max_alloc_size(mut self, bytes: u64) -> Self {
        self.config.host_max_alloc_size = bytes;
        self
    }

    pub fn host_local_mem_size(mut self, bytes: usize) -> Self {
        self.config.host_local_mem_size = bytes;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
