//! Command queues.
//!
//! Each queue owns a worker thread fed through a bounded channel. The
//! worker moves commands from the channel into a waiting list and runs
//! them one at a time: in FIFO order for an in-order queue, or the first
//! command whose wait list is satisfied for an out-of-order queue.
//! While commands wait on events that are not yet terminal, the worker
//! sleeps until one of those events completes and sends it a wake token.

use super::event::{CommandFailure, CommandKind, Event};
use super::ContextId;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::ComputePool;
use crate::platform::Device;
use crate::telemetry::Metrics;
use crate::util::id::object_id;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

object_id!(
    /// Identifies one command queue.
    QueueId,
    "queue"
);

/// Execution order of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueueOrdering {
    /// Commands run strictly in enqueue order.
    #[default]
    InOrder,
    /// Commands run once their wait list is satisfied; barriers order the rest.
    OutOfOrder,
}

pub(crate) type Operation = Box<dyn FnOnce() -> std::result::Result<(), CommandFailure> + Send>;

pub(crate) struct Command {
    event: Event,
    wait_list: Vec<Event>,
    op: Operation,
}

/// Ordered submission channel to one device.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueHandle>,
}

struct QueueHandle {
    shared: Arc<QueueShared>,
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct QueueShared {
    id: QueueId,
    context: ContextId,
    device: Device,
    ordering: QueueOrdering,
    pool: Arc<ComputePool>,
    profiling: bool,
    capacity: usize,
    pending: Mutex<PendingState>,
    idle: Condvar,
    aborted: AtomicBool,
    released: AtomicBool,
    /// Holds at most one token; wakes the worker when a dependency finishes.
    wake: Sender<()>,
    metrics: Arc<Metrics>,
}

#[derive(Default)]
struct PendingState {
    in_flight: usize,
    /// Events enqueued since the last barrier that may still be running.
    outstanding: Vec<Event>,
    last_barrier: Option<Event>,
    first_failure: Option<CommandFailure>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Fence {
    None,
    /// Waits for everything enqueued before it.
    Marker,
    /// Like a marker, and everything enqueued after it waits for it.
    Barrier,
    /// Everything enqueued after it waits for it; only its own wait list gates it.
    WaitList,
}

impl CommandQueue {
    pub(crate) fn new(
        context: ContextId,
        device: Device,
        ordering: QueueOrdering,
        pool: Arc<ComputePool>,
        config: &Config,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let capacity = config.max_pending_commands;
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let (wake, woken) = crossbeam_channel::bounded(1);
        let shared = Arc::new(QueueShared {
            id: QueueId::next(),
            context,
            device,
            ordering,
            pool,
            profiling: config.profiling,
            capacity,
            pending: Mutex::new(PendingState::default()),
            idle: Condvar::new(),
            aborted: AtomicBool::new(false),
            released: AtomicBool::new(false),
            wake,
            metrics,
        });

        let runner = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("{}-{}", config.thread_name_prefix, shared.id))
            .spawn(move || runner.run(receiver, woken))
            .map_err(|e| Error::context_creation(format!("queue worker spawn failed: {e}")))?;

        debug!(
            "{} created on '{}' ({:?})",
            shared.id,
            shared.device.name(),
            ordering
        );
        Ok(Self {
            inner: Arc::new(QueueHandle {
                shared,
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn id(&self) -> QueueId {
        self.inner.shared.id
    }

    pub fn device(&self) -> &Device {
        &self.inner.shared.device
    }

    pub fn ordering(&self) -> QueueOrdering {
        self.inner.shared.ordering
    }

    pub fn is_released(&self) -> bool {
        self.inner.shared.released.load(Ordering::Acquire)
    }

    /// Block until every command enqueued so far has finished.
    ///
    /// Returns the first execution failure observed since the previous
    /// `finish`, if any.
    pub fn finish(&self) -> Result<()> {
        let shared = &self.inner.shared;
        let mut pending = shared.pending.lock();
        while pending.in_flight > 0 {
            shared.idle.wait(&mut pending);
        }
        match pending.first_failure.take() {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    /// Commands are handed to the worker at enqueue time, so this only
    /// checks that the queue is still usable.
    pub fn flush(&self) -> Result<()> {
        self.check_live()
    }

    /// An event that completes once every command enqueued before it (and
    /// every event in `wait_list`) has finished.
    pub fn enqueue_marker(&self, wait_list: &[Event]) -> Result<Event> {
        self.enqueue_fenced(CommandKind::Marker, wait_list, Fence::Marker, Box::new(|| Ok(())))
    }

    /// Commands enqueued after the barrier start only after every command
    /// enqueued before it has finished.
    pub fn enqueue_barrier(&self, wait_list: &[Event]) -> Result<Event> {
        self.enqueue_fenced(CommandKind::Barrier, wait_list, Fence::Barrier, Box::new(|| Ok(())))
    }

    /// Commands enqueued after this call start only after `events` finish.
    pub fn enqueue_wait_for_events(&self, events: &[Event]) -> Result<Event> {
        if events.is_empty() {
            return Err(Error::invalid_arg("event list is empty"));
        }
        self.enqueue_fenced(CommandKind::Barrier, events, Fence::WaitList, Box::new(|| Ok(())))
    }

    /// Stop accepting commands. Commands that have not started fail with
    /// `Aborted`; a running command runs to completion before this returns.
    pub fn release(&self) {
        if !self.inner.shared.released.swap(true, Ordering::AcqRel) {
            debug!("{} released", self.inner.shared.id);
        }
        self.inner.shared.abort();
        self.inner.sender.lock().take();

        let Some(worker) = self.inner.worker.lock().take() else {
            return;
        };
        // released from a callback running on the worker itself
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!("{} worker exited by panic", self.inner.shared.id);
        }
    }

    pub(crate) fn context_id(&self) -> ContextId {
        self.inner.shared.context
    }

    pub(crate) fn pool(&self) -> &Arc<ComputePool> {
        &self.inner.shared.pool
    }

    pub(crate) fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.shared.metrics
    }

    pub(crate) fn shared(&self) -> &Arc<QueueShared> {
        &self.inner.shared
    }

    pub(crate) fn check_live(&self) -> Result<()> {
        if self.is_released() || self.inner.shared.aborted.load(Ordering::Acquire) {
            return Err(Error::ObjectReleased("command queue"));
        }
        Ok(())
    }

    /// Queue `op` behind `wait_list` and return its event.
    pub(crate) fn enqueue(&self, kind: CommandKind, wait_list: &[Event], op: Operation) -> Result<Event> {
        self.enqueue_fenced(kind, wait_list, Fence::None, op)
    }

    fn enqueue_fenced(&self, kind: CommandKind, wait_list: &[Event], fence: Fence, op: Operation) -> Result<Event> {
        self.check_live()?;
        let shared = &self.inner.shared;
        if wait_list.iter().any(|e| e.context_id() != shared.context) {
            return Err(Error::ContextMismatch);
        }

        let event = Event::new(kind, shared.context, shared.profiling);
        let mut deps = wait_list.to_vec();
        {
            let mut pending = shared.pending.lock();
            pending.outstanding.retain(|e| !e.is_terminal());
            if fence != Fence::WaitList {
                if let Some(barrier) = &pending.last_barrier {
                    deps.push(barrier.clone());
                }
            }
            match fence {
                Fence::None => pending.outstanding.push(event.clone()),
                Fence::Marker => {
                    deps.extend(pending.outstanding.iter().cloned());
                    pending.outstanding.push(event.clone());
                }
                Fence::Barrier => {
                    deps.extend(pending.outstanding.drain(..));
                    pending.last_barrier = Some(event.clone());
                }
                Fence::WaitList => {
                    if let Some(barrier) = pending.last_barrier.take() {
                        deps.push(barrier);
                    }
                    pending.last_barrier = Some(event.clone());
                }
            }
            pending.in_flight += 1;
        }

        shared.metrics.record_enqueued();
        let sender = self.inner.sender.lock().clone();
        let command = Command {
            event: event.clone(),
            wait_list: deps,
            op,
        };
        let sent = match sender {
            Some(sender) => sender.send(command).is_ok(),
            None => false,
        };
        if !sent {
            shared.finish_command(&event, Err(CommandFailure::Aborted), Duration::ZERO);
            return Err(Error::ObjectReleased("command queue"));
        }
        Ok(event)
    }
}

impl QueueShared {
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.released.store(true, Ordering::Release);
        self.notify();
    }

    fn notify(&self) {
        let _ = self.wake.try_send(());
    }

    fn run(self: Arc<Self>, receiver: Receiver<Command>, woken: Receiver<()>) {
        let mut waiting: VecDeque<Command> = VecDeque::new();
        let mut open = true;

        loop {
            if self.aborted.load(Ordering::Acquire) {
                for command in waiting.drain(..) {
                    self.finish_command(&command.event, Err(CommandFailure::Aborted), Duration::ZERO);
                }
                while let Ok(command) = receiver.try_recv() {
                    self.finish_command(&command.event, Err(CommandFailure::Aborted), Duration::ZERO);
                }
                match receiver.recv() {
                    Ok(command) => {
                        self.finish_command(&command.event, Err(CommandFailure::Aborted), Duration::ZERO);
                        continue;
                    }
                    Err(_) => break,
                }
            }

            while open && waiting.len() < self.capacity {
                match receiver.try_recv() {
                    Ok(command) => self.accept(command, &mut waiting),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => open = false,
                }
            }

            if let Some(index) = self.next_ready(&waiting) {
                if let Some(command) = waiting.remove(index) {
                    self.execute(command);
                }
                continue;
            }

            if !open {
                if waiting.is_empty() {
                    break;
                }
                let _ = woken.recv();
            } else if waiting.is_empty() {
                match receiver.recv() {
                    Ok(command) => self.accept(command, &mut waiting),
                    Err(_) => open = false,
                }
            } else if waiting.len() < self.capacity {
                crossbeam_channel::select! {
                    recv(receiver) -> command => match command {
                        Ok(command) => self.accept(command, &mut waiting),
                        Err(_) => open = false,
                    },
                    recv(woken) -> _ => {}
                }
            } else {
                let _ = woken.recv();
            }
        }
        debug!("{} worker exiting", self.id);
    }

    fn accept(&self, command: Command, waiting: &mut VecDeque<Command>) {
        command.event.mark_submitted();
        for dependency in command.wait_list.iter().filter(|e| !e.is_terminal()) {
            let wake = self.wake.clone();
            dependency.on_complete(move |_| {
                let _ = wake.try_send(());
            });
        }
        waiting.push_back(command);
    }

    fn next_ready(&self, waiting: &VecDeque<Command>) -> Option<usize> {
        let ready = |c: &Command| c.wait_list.iter().all(Event::is_terminal);
        match self.ordering {
            QueueOrdering::InOrder => waiting.front().filter(|c| ready(c)).map(|_| 0),
            QueueOrdering::OutOfOrder => waiting.iter().position(ready),
        }
    }

    fn execute(&self, command: Command) {
        let started = Instant::now();
        let failed_dependency = command
            .wait_list
            .iter()
            .find(|e| e.failure().is_some())
            .map(Event::id);

        let result = match failed_dependency {
            Some(id) => Err(CommandFailure::DependencyFailed(id)),
            None => {
                command.event.mark_running();
                (command.op)()
            }
        };
        if let Err(failure) = &result {
            warn!("{} on {}: {}", command.event.id(), self.id, failure);
        }
        self.finish_command(&command.event, result, started.elapsed());
    }

    fn finish_command(&self, event: &Event, result: std::result::Result<(), CommandFailure>, elapsed: Duration) {
        let failure = result.as_ref().err().cloned();
        event.finish(result);
        self.metrics.record_completed(elapsed, failure.is_some());

        let mut pending = self.pending.lock();
        pending.in_flight = pending.in_flight.saturating_sub(1);
        if let Some(failure) = failure {
            pending.first_failure.get_or_insert(failure);
        }
        drop(pending);
        self.idle.notify_all();
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.inner.shared.id)
            .field("device", &self.inner.shared.device.name())
            .field("ordering", &self.inner.shared.ordering)
            .field("released", &self.is_released())
            .finish()
    }
}

impl PartialEq for CommandQueue {
    fn eq(&self, other: &Self) -> bool {
        self.inner.shared.id == other.inner.shared.id
    }
}

impl Eq for CommandQueue {}
