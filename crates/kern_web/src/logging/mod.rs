use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Sink for per-request log lines, see [`AccessLog`](crate::module::AccessLog).
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str, request_id: &str);
}

/// Forwards to the `tracing` macros with the request id as a field.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, msg: &str, request_id: &str) {
        match level {
            Level::Error => error!(request_id, "{}", msg),
            Level::Warn => warn!(request_id, "{}", msg),
            Level::Info => info!(request_id, "{}", msg),
            Level::Debug => debug!(request_id, "{}", msg),
            Level::Trace => trace!(request_id, "{}", msg),
        }
    }
}
