//! Error types shared by every stage of the dispatch pipeline.

use crate::context::event::{CommandFailure, EventId};
use crate::memory::{AccessMode, BufferId, MapMode};
use crate::program::BuildReport;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No matching platform or device.
    Enumeration,
    /// Program build or entry point lookup failed.
    Compilation,
    /// A context, queue, buffer or other resource could not be created.
    ResourceCreation,
    /// A kernel argument, transfer range or work size was rejected.
    ArgumentBinding,
    /// Map/unmap discipline was broken.
    SynchronizationViolation,
    /// A command failed on the device.
    Execution,
    /// Invalid configuration or host I/O failure.
    Config,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no compute platform found")]
    NoPlatformFound,

    #[error("no device matching {filter} on platform '{platform}'")]
    NoDeviceFound { platform: String, filter: String },

    #[error("context creation failed: {0}")]
    ContextCreation(String),

    #[error("device '{0}' is not part of this context")]
    DeviceNotInContext(String),

    #[error("objects belong to different contexts")]
    ContextMismatch,

    #[error("{0} has been released")]
    ObjectReleased(&'static str),

    #[error("invalid buffer size {size} (device allows 1..={max} bytes)")]
    InvalidBufferSize { size: usize, max: u64 },

    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfDeviceMemory { requested: u64, available: u64 },

    #[error("invalid sub-buffer: {0}")]
    InvalidSubBuffer(String),

    #[error("out of resources: {0}")]
    OutOfResources(String),

    #[error("{}", build_failure_message(.0))]
    BuildFailure(BuildReport),

    #[error("kernel entry point '{0}' not found")]
    EntryPointNotFound(String),

    #[error("program is not built for device '{0}'")]
    ProgramNotBuilt(String),

    #[error("argument index {index} out of range: kernel '{kernel}' declares {count} argument(s)")]
    InvalidArgIndex {
        kernel: String,
        index: usize,
        count: usize,
    },

    #[error("argument {index} of kernel '{kernel}' expects {expected}, got {actual}")]
    ArgTypeMismatch {
        kernel: String,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("argument {index} of kernel '{kernel}' is not set")]
    ArgNotSet { kernel: String, index: usize },

    #[error("invalid argument value: {0}")]
    InvalidArgValue(String),

    #[error("{requested:?} mapping is not permitted on a {mode:?} buffer")]
    AccessModeViolation { mode: AccessMode, requested: MapMode },

    #[error("range {offset}..{end} is out of bounds for a buffer of {size} bytes")]
    OutOfBounds { offset: usize, end: usize, size: usize },

    #[error("invalid work size: {0}")]
    InvalidWorkSize(String),

    #[error("buffer {buffer} has a live host mapping over {offset}..{end}")]
    ConcurrentAccessViolation {
        buffer: BufferId,
        offset: usize,
        end: usize,
    },

    #[error("buffer {0} has no matching mapping to release")]
    UnmapWithoutMap(BufferId),

    #[error("host view is not ready; wait for the map command first")]
    MapNotReady,

    #[error("event {0} has already reached a terminal state")]
    EventAlreadyTerminal(EventId),

    #[error("kernel '{kernel}' faulted: {message}")]
    KernelFault { kernel: String, message: String },

    #[error("command aborted: dependency event {0} failed")]
    DependencyFailed(EventId),

    #[error("command aborted: queue or context was released")]
    Aborted,

    #[error("user event failed: {0}")]
    UserEventFailed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn build_failure_message(report: &BuildReport) -> String {
    format!(
        "program build failed on {} of {} device(s)",
        report.failed().count(),
        report.outcomes().len()
    )
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn context_creation<S: Into<String>>(msg: S) -> Self {
        Error::ContextCreation(msg.into())
    }

    pub fn invalid_arg<S: Into<String>>(msg: S) -> Self {
        Error::InvalidArgValue(msg.into())
    }

    pub fn work_size<S: Into<String>>(msg: S) -> Self {
        Error::InvalidWorkSize(msg.into())
    }

    /// Which part of the error taxonomy this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        use Error::*;
        match self {
            NoPlatformFound | NoDeviceFound { .. } => ErrorCategory::Enumeration,
            BuildFailure(_) | EntryPointNotFound(_) | ProgramNotBuilt(_) => {
                ErrorCategory::Compilation
            }
            ContextCreation(_)
            | DeviceNotInContext(_)
            | ContextMismatch
            | ObjectReleased(_)
            | InvalidBufferSize { .. }
            | OutOfDeviceMemory { .. }
            | InvalidSubBuffer(_)
            | OutOfResources(_) => ErrorCategory::ResourceCreation,
            InvalidArgIndex { .. }
            | ArgTypeMismatch { .. }
            | ArgNotSet { .. }
            | InvalidArgValue(_)
            | AccessModeViolation { .. }
            | OutOfBounds { .. }
            | InvalidWorkSize(_) => ErrorCategory::ArgumentBinding,
            ConcurrentAccessViolation { .. }
            | UnmapWithoutMap(_)
            | MapNotReady
            | EventAlreadyTerminal(_) => ErrorCategory::SynchronizationViolation,
            KernelFault { .. } | DependencyFailed(_) | Aborted | UserEventFailed(_) => {
                ErrorCategory::Execution
            }
            Config(_) | Io(_) => ErrorCategory::Config,
        }
    }

    /// The per-device build report, if this is a build failure.
    pub fn build_report(&self) -> Option<&BuildReport> {
        match self {
            Error::BuildFailure(report) => Some(report),
            _ => None,
        }
    }
}

impl From<CommandFailure> for Error {
    fn from(failure: CommandFailure) -> Self {
        match failure {
            CommandFailure::KernelFault { kernel, message } => Error::KernelFault { kernel, message },
            CommandFailure::DependencyFailed(event) => Error::DependencyFailed(event),
            CommandFailure::Aborted => Error::Aborted,
            CommandFailure::User(reason) => Error::UserEventFailed(reason),
        }
    }
}
