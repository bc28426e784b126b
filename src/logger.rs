//! Line-oriented logging collaborator
//!
//! Tool output and operation progress are written to a [`Logger`] one line at
//! a time. The default implementation forwards to `tracing`.

use std::sync::Arc;

/// Accepts discrete lines of diagnostic text. Never fails.
pub trait Logger: Send + Sync {
    /// Log a single line (without trailing newline)
    fn log(&self, line: &str);
}

impl<F> Logger for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        self(line)
    }
}

/// [`Logger`] that emits each line as a `tracing` event at INFO level
#[derive(Debug, Clone)]
pub struct TracingLogger {
    name: Arc<str>,
}

impl TracingLogger {
    /// Create a logger whose events carry `name` in the `source` field
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    /// Shared handle suitable for [`crate::ProcessOutput::logger`]
    pub fn shared(name: impl Into<Arc<str>>) -> Arc<dyn Logger> {
        Arc::new(Self::new(name))
    }

    /// The name events are tagged with
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Logger for TracingLogger {
    fn log(&self, line: &str) {
        tracing::info!(source = %self.name, "{}", line);
    }
}
