// one compute unit: a thread draining its own deque, then the pool's
// injector, then its siblings
use super::task::Task;
use crossbeam_deque::{Injector, Steal, Stealer, Worker as Deque};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, trace};

pub type UnitId = usize;

/// Idle units park this long before rechecking for work.
const IDLE_PARK: Duration = Duration::from_micros(200);
const SPINS_BEFORE_PARK: u32 = 16;

#[derive(Debug, Default)]
pub struct UnitCounters {
    pub tasks_run: AtomicU64,
    pub tasks_stolen: AtomicU64,
    pub busy_time_ns: AtomicU64,
    pub queue_wait_ns: AtomicU64,
}

pub(crate) struct ComputeUnit {
    pub id: UnitId,
    pub deque: Deque<Task>,
    pub counters: Arc<UnitCounters>,
}

impl ComputeUnit {
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            deque: Deque::new_fifo(),
            counters: Arc::new(UnitCounters::default()),
        }
    }

    pub fn run(&self, siblings: Vec<Stealer<Task>>, injector: Arc<Injector<Task>>, shutdown: Arc<AtomicBool>) {
        let mut idle = 0u32;
        while !shutdown.load(Ordering::Acquire) {
            match self.next_task(&siblings, &injector) {
                Some(task) => {
                    idle = 0;
                    self.run_task(task);
                }
                None if idle < SPINS_BEFORE_PARK => {
                    idle += 1;
                    std::hint::spin_loop();
                }
                None => thread::park_timeout(IDLE_PARK),
            }
        }
        trace!("compute unit {} stopped", self.id);
    }

    fn next_task(&self, siblings: &[Stealer<Task>], injector: &Injector<Task>) -> Option<Task> {
        if let Some(task) = self.deque.pop() {
            return Some(task);
        }
        if let Some(task) = retry(|| injector.steal_batch_and_pop(&self.deque)) {
            return Some(task);
        }
        self.steal(siblings)
    }

    // victims are visited round-robin from a random start
    fn steal(&self, siblings: &[Stealer<Task>]) -> Option<Task> {
        let n = siblings.len();
        if n < 2 {
            return None;
        }
        let start = rand::thread_rng().gen_range(0..n);
        (0..n)
            .map(|i| (start + i) % n)
            .filter(|&victim| victim != self.id)
            .find_map(|victim| retry(|| siblings[victim].steal_batch_and_pop(&self.deque)))
            .map(|task| {
                self.counters.tasks_stolen.fetch_add(1, Ordering::Relaxed);
                task
            })
    }

    fn run_task(&self, task: Task) {
        self.counters
            .queue_wait_ns
            .fetch_add(task.queue_wait().as_nanos() as u64, Ordering::Relaxed);

        let start = Instant::now();
        // group runners catch kernel panics themselves; this only guards the thread
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.execute()));
        if result.is_err() {
            error!("task panicked on compute unit {}", self.id);
        }

        self.counters
            .busy_time_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.counters.tasks_run.fetch_add(1, Ordering::Relaxed);
    }
}

fn retry(mut steal: impl FnMut() -> Steal<Task>) -> Option<Task> {
    loop {
        match steal() {
            Steal::Success(task) => return Some(task),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}
