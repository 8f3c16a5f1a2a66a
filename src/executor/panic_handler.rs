use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Catches panics from user code run on dispatch threads and logs them.
#[derive(Debug, Clone, Copy)]
pub struct PanicHandler {
    /// Names the kind of user code in log lines.
    site: &'static str,
}

impl PanicHandler {
    pub fn new(site: &'static str) -> Self {
        Self { site }
    }

    pub fn execute<F, R>(&self, f: F) -> Result<R, CaughtPanic>
    where
        F: FnOnce() -> R,
    {
        catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
            let caught = CaughtPanic::from_payload(payload);
            error!("{} panicked: {}", self.site, caught.message);
            caught
        })
    }
}

impl Default for PanicHandler {
    fn default() -> Self {
        Self::new("kernel body")
    }
}

/// The message of a caught panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaughtPanic {
    pub message: String,
}

impl CaughtPanic {
    fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(s) => *s,
            Err(payload) => payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "non-string panic payload".to_string()),
        };
        Self { message }
    }
}
