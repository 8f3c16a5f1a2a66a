use super::panic_handler::PanicHandler;
use super::task::Task;
use super::worker::{ComputeUnit, UnitCounters, UnitId};
use crate::config::Config;
use crate::dispatch::work_item::BoundArg;
use crate::dispatch::{KernelArgs, KernelFn, Partition, WorkGroup};
use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use crossbeam_deque::{Injector, Stealer};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

#[cfg(target_os = "linux")]
fn pin_thread_to_core(core_id: usize) {
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id % num_cpus::get(), &mut cpuset);
        let result = libc::sched_setaffinity(
            0, // current thread
            std::mem::size_of::<libc::cpu_set_t>(),
            &cpuset,
        );
        if result != 0 {
            warn!(
                "failed to pin thread {} to core {}",
                std::thread::current().name().unwrap_or("unknown"),
                core_id
            );
        }
    }
}

/// Work-stealing thread pool backing one device's compute units.
pub struct ComputePool {
    units: Vec<UnitHandle>,
    injector: Arc<Injector<Task>>,
    shutdown: Arc<AtomicBool>,
    num_threads: usize,
    panic_handler: PanicHandler,
    metrics: Arc<Metrics>,
}

struct UnitHandle {
    id: UnitId,
    thread: Option<JoinHandle<()>>,
    unparker: thread::Thread,
    counters: Arc<UnitCounters>,
}

/// Counters summed over a pool's compute units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub tasks_run: u64,
    pub tasks_stolen: u64,
    pub busy_time: Duration,
    /// Total time tasks sat queued before a unit took them.
    pub queue_wait: Duration,
}

impl ComputePool {
    /// Spawn `config.worker_threads()` compute units named after `label`.
    pub fn new(config: &Config, label: &str, metrics: Arc<Metrics>) -> Result<Self> {
        let num_threads = config.worker_threads();
        if num_threads == 0 {
            return Err(Error::config("need at least 1 compute unit"));
        }

        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let units: Vec<ComputeUnit> = (0..num_threads).map(ComputeUnit::new).collect();
        let stealers: Vec<Stealer<Task>> = units.iter().map(|u| u.deque.stealer()).collect();

        let mut handles = Vec::with_capacity(num_threads);

        for unit in units {
            let id = unit.id;
            let counters = Arc::clone(&unit.counters);
            let siblings = stealers.clone();
            let injector_clone = Arc::clone(&injector);
            let shutdown_clone = Arc::clone(&shutdown);
            let name = format!("{}-{}-cu{}", config.thread_name_prefix, label, id);

            let mut builder = thread::Builder::new().name(name);

            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let pin_workers = config.pin_workers;
            let thread = builder
                .spawn(move || {
                    #[cfg(target_os = "linux")]
                    if pin_workers {
                        pin_thread_to_core(id);
                    }
                    #[cfg(not(target_os = "linux"))]
                    let _ = pin_workers;

                    unit.run(siblings, injector_clone, shutdown_clone);
                })
                .map_err(|e| Error::config(format!("compute unit spawn failed: {e}")))?;

            let unparker = thread.thread().clone();

            handles.push(UnitHandle {
                id,
                thread: Some(thread),
                unparker,
                counters,
            });
        }

        debug!("compute pool '{}' started with {} unit(s)", label, num_threads);

        Ok(Self {
            units: handles,
            injector,
            shutdown,
            num_threads,
            panic_handler: PanicHandler::default(),
            metrics,
        })
    }

    pub(crate) fn submit(&self, task: Task) {
        self.injector.push(task);
    }

    fn wake_all(&self) {
        for unit in &self.units {
            unit.unparker.unpark();
        }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Tasks waiting in the shared injector.
    pub fn pending_tasks(&self) -> usize {
        self.injector.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.units.iter().fold(PoolStats::default(), |mut acc, u| {
            let c = &u.counters;
            acc.tasks_run += c.tasks_run.load(Ordering::Relaxed);
            acc.tasks_stolen += c.tasks_stolen.load(Ordering::Relaxed);
            acc.busy_time += Duration::from_nanos(c.busy_time_ns.load(Ordering::Relaxed));
            acc.queue_wait += Duration::from_nanos(c.queue_wait_ns.load(Ordering::Relaxed));
            acc
        })
    }

    /// Run every work-group of `job` and block until all are done or one
    /// faults. Returns the first fault message.
    pub(crate) fn run_ndrange(&self, job: NdRangeJob) -> std::result::Result<(), String> {
        let total = job.partition.group_count();
        let runners = self.num_threads.min(total).max(1);
        let job = Arc::new(job);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(runners);

        for _ in 0..runners {
            let job = Arc::clone(&job);
            let handler = self.panic_handler;
            let metrics = Arc::clone(&self.metrics);
            let done = done_tx.clone();
            self.submit(Task::new(move || {
                job.run(&handler, &metrics);
                let _ = done.send(());
            }));
        }
        drop(done_tx);
        self.wake_all();

        for _ in 0..runners {
            if done_rx.recv().is_err() {
                break;
            }
        }

        let executed = job.executed.load(Ordering::Relaxed);
        self.metrics.record_work_groups(executed);

        if let Some(message) = job.fault.lock().take() {
            return Err(message);
        }
        if executed < total as u64 {
            return Err(format!(
                "compute pool stopped after {executed} of {total} work-groups"
            ));
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);

        // wake everyone up to check shutdown flag
        self.wake_all();

        for unit in &mut self.units {
            if let Some(thread) = unit.thread.take() {
                if thread.join().is_err() {
                    warn!("compute unit {} exited by panic", unit.id);
                }
            }
        }
    }
}

impl Drop for ComputePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ComputePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePool")
            .field("num_threads", &self.num_threads)
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

/// One ND-range launch shared by the pool's group runners.
pub(crate) struct NdRangeJob {
    pub kernel: String,
    pub body: Arc<dyn KernelFn>,
    pub partition: Partition,
    pub args: Vec<BoundArg>,
    next_group: AtomicUsize,
    failed: AtomicBool,
    executed: AtomicU64,
    fault: Mutex<Option<String>>,
}

impl NdRangeJob {
    pub fn new(kernel: String, body: Arc<dyn KernelFn>, partition: Partition, args: Vec<BoundArg>) -> Self {
        Self {
            kernel,
            body,
            partition,
            args,
            next_group: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            executed: AtomicU64::new(0),
            fault: Mutex::new(None),
        }
    }

    /// Claim and execute groups until none remain or a fault is recorded.
    fn run(&self, handler: &PanicHandler, metrics: &Metrics) {
        let total = self.partition.group_count();
        loop {
            if self.failed.load(Ordering::Acquire) {
                return;
            }
            let index = self.next_group.fetch_add(1, Ordering::Relaxed);
            if index >= total {
                return;
            }

            let group = self.partition.work_group(index);
            let args = KernelArgs::new(&self.kernel, &self.args);
            let message = match handler.execute(|| self.body.execute_group(&group, &args)) {
                Ok(Ok(())) => {
                    self.executed.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Ok(Err(fault)) => format!("{}: {}", describe_group(&group), fault),
                Err(panic) => {
                    metrics.record_kernel_panic();
                    format!("{}: panicked: {}", describe_group(&group), panic.message)
                }
            };

            let mut slot = self.fault.lock();
            if slot.is_none() {
                *slot = Some(message);
            }
            self.failed.store(true, Ordering::Release);
            return;
        }
    }
}

fn describe_group(group: &WorkGroup) -> String {
    let ids: Vec<String> = (0..group.work_dim()).map(|d| group.group_id(d).to_string()).collect();
    format!("work-group ({})", ids.join(", "))
}
