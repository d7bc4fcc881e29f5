use tracing::{error, info};

/// Output channel for due messages and poll-loop failures.
pub trait Emitter: Send + Sync {
    /// Emit the payload of a due message.
    fn info(&self, message: &str);

    /// Report a failure inside the poll loop.
    fn error(&self, message: &str);
}

/// Emits through `tracing` under the `herald::emit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

impl Emitter for TracingEmitter {
    fn info(&self, message: &str) {
        info!(target: "herald::emit", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "herald::emit", "{message}");
    }
}
