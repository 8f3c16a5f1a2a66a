//! Command completion events.
//!
//! Every enqueued command returns an [`Event`] that moves through
//! `Queued -> Submitted -> Running` and ends `Complete` or `Failed`.
//! Events from any queue of the same context can appear in wait lists.

use super::ContextId;
use crate::error::{Error, Result};
use crate::executor::PanicHandler;
use crate::util::id::object_id;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

object_id!(
    /// Identifies one event.
    EventId,
    "event"
);

/// Why a command did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandFailure {
    #[error("kernel '{kernel}' faulted: {message}")]
    KernelFault { kernel: String, message: String },
    #[error("dependency {0} failed")]
    DependencyFailed(EventId),
    #[error("aborted before it started")]
    Aborted,
    #[error("failed by host: {0}")]
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    Failed(CommandFailure),
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Failed(_))
    }
}

/// The command an event tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    NdRange,
    WriteBuffer,
    ReadBuffer,
    CopyBuffer,
    FillBuffer,
    MapBuffer,
    UnmapBuffer,
    Marker,
    Barrier,
    User,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::NdRange => "ndrange",
            CommandKind::WriteBuffer => "write-buffer",
            CommandKind::ReadBuffer => "read-buffer",
            CommandKind::CopyBuffer => "copy-buffer",
            CommandKind::FillBuffer => "fill-buffer",
            CommandKind::MapBuffer => "map-buffer",
            CommandKind::UnmapBuffer => "unmap-buffer",
            CommandKind::Marker => "marker",
            CommandKind::Barrier => "barrier",
            CommandKind::User => "user",
        };
        f.write_str(name)
    }
}

/// Host timestamps of an event's transitions. Empty when profiling is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfilingInfo {
    pub queued: Option<Instant>,
    pub submitted: Option<Instant>,
    pub started: Option<Instant>,
    pub ended: Option<Instant>,
}

impl ProfilingInfo {
    /// Time spent running on the device.
    pub fn execution_time(&self) -> Option<Duration> {
        Some(self.ended?.saturating_duration_since(self.started?))
    }

    /// Time from enqueue to start.
    pub fn queue_latency(&self) -> Option<Duration> {
        Some(self.started?.saturating_duration_since(self.queued?))
    }
}

type Callback = Box<dyn FnOnce(&EventStatus) + Send>;

/// Completion handle of one command. Clones refer to the same event.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

struct EventInner {
    id: EventId,
    kind: CommandKind,
    context: ContextId,
    profiling: bool,
    state: Mutex<EventState>,
    cond: Condvar,
}

struct EventState {
    status: EventStatus,
    times: ProfilingInfo,
    callbacks: Vec<Callback>,
    #[cfg(feature = "async")]
    wakers: Vec<std::task::Waker>,
}

impl Event {
    pub(crate) fn new(kind: CommandKind, context: ContextId, profiling: bool) -> Self {
        let times = ProfilingInfo {
            queued: profiling.then(Instant::now),
            ..ProfilingInfo::default()
        };
        Self {
            inner: Arc::new(EventInner {
                id: EventId::next(),
                kind,
                context,
                profiling,
                state: Mutex::new(EventState {
                    status: EventStatus::Queued,
                    times,
                    callbacks: Vec::new(),
                    #[cfg(feature = "async")]
                    wakers: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> EventId {
        self.inner.id
    }

    pub fn command_kind(&self) -> CommandKind {
        self.inner.kind
    }

    pub fn status(&self) -> EventStatus {
        self.inner.state.lock().status.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().status == EventStatus::Complete
    }

    /// Complete or failed.
    pub fn is_terminal(&self) -> bool {
        self.inner.state.lock().status.is_terminal()
    }

    pub fn profiling(&self) -> ProfilingInfo {
        self.inner.state.lock().times
    }

    /// Block until the command finishes; its failure, if any, becomes the error.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            self.inner.cond.wait(&mut state);
        }
        outcome(&state.status)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.status.is_terminal() {
            if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                return state.status.is_terminal().then(|| outcome(&state.status));
            }
        }
        Some(outcome(&state.status))
    }

    /// Run `callback` once the event is terminal. Runs immediately if it
    /// already is; otherwise on the thread that finishes the command.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&EventStatus) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            let status = state.status.clone();
            drop(state);
            run_callback(Box::new(callback), &status);
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Resolves when the event is terminal.
    #[cfg(feature = "async")]
    pub fn wait_async(&self) -> EventFuture {
        EventFuture {
            event: self.clone(),
        }
    }

    pub(crate) fn context_id(&self) -> ContextId {
        self.inner.context
    }

    pub(crate) fn failure(&self) -> Option<CommandFailure> {
        match &self.inner.state.lock().status {
            EventStatus::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }

    pub(crate) fn mark_submitted(&self) {
        let mut state = self.inner.state.lock();
        if state.status == EventStatus::Queued {
            state.status = EventStatus::Submitted;
            if self.inner.profiling {
                state.times.submitted = Some(Instant::now());
            }
        }
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.inner.state.lock();
        if !state.status.is_terminal() {
            state.status = EventStatus::Running;
            if self.inner.profiling {
                state.times.started = Some(Instant::now());
            }
        }
    }

    /// Move to a terminal state. Returns false if the event already was terminal.
    pub(crate) fn finish(&self, result: std::result::Result<(), CommandFailure>) -> bool {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        state.status = match result {
            Ok(()) => EventStatus::Complete,
            Err(failure) => {
                debug!("{} ({}) failed: {}", self.inner.id, self.inner.kind, failure);
                EventStatus::Failed(failure)
            }
        };
        if self.inner.profiling {
            let now = Instant::now();
            state.times.started.get_or_insert(now);
            state.times.ended = Some(now);
        }

        let status = state.status.clone();
        let callbacks = std::mem::take(&mut state.callbacks);
        #[cfg(feature = "async")]
        let wakers = std::mem::take(&mut state.wakers);
        drop(state);

        self.inner.cond.notify_all();
        #[cfg(feature = "async")]
        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            run_callback(callback, &status);
        }
        true
    }
}

fn outcome(status: &EventStatus) -> Result<()> {
    match status {
        EventStatus::Failed(failure) => Err(failure.clone().into()),
        _ => Ok(()),
    }
}

fn run_callback(callback: Callback, status: &EventStatus) {
    let handler = PanicHandler::new("event callback");
    let _ = handler.execute(|| callback(status));
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Event {}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("status", &self.status())
            .finish()
    }
}

/// Wait for every event, then report the first failure in list order.
pub fn wait_for_events(events: &[Event]) -> Result<()> {
    let mut first = None;
    for event in events {
        if let Err(e) = event.wait() {
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

/// An event completed by the host rather than by a queue.
///
/// Put [`event()`](Self::event) in wait lists to gate commands on host work.
#[derive(Debug, Clone)]
pub struct UserEvent {
    event: Event,
}

impl UserEvent {
    pub(crate) fn new(context: ContextId) -> Self {
        let event = Event::new(CommandKind::User, context, false);
        event.mark_submitted();
        Self { event }
    }

    pub fn event(&self) -> Event {
        self.event.clone()
    }

    pub fn complete(&self) -> Result<()> {
        self.set(Ok(()))
    }

    /// Fail the event; commands waiting on it fail with `DependencyFailed`.
    pub fn fail<S: Into<String>>(&self, reason: S) -> Result<()> {
        self.set(Err(CommandFailure::User(reason.into())))
    }

    fn set(&self, result: std::result::Result<(), CommandFailure>) -> Result<()> {
        if self.event.finish(result) {
            Ok(())
        } else {
            Err(Error::EventAlreadyTerminal(self.event.id()))
        }
    }
}

/// Future returned by [`Event::wait_async`].
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct EventFuture {
    event: Event,
}

#[cfg(feature = "async")]
impl std::future::Future for EventFuture {
    type Output = Result<()>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        let mut state = self.event.inner.state.lock();
        if state.status.is_terminal() {
            return std::task::Poll::Ready(outcome(&state.status));
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        std::task::Poll::Pending
    }
}
