//! Logger collaborator
//!
//! Clients never call `tracing` directly for per-operation output; they go through
//! an injected [`Logger`] so tests can capture what was emitted.

use std::fmt;

/// Leveled, infallible logger
pub trait Logger: Send + Sync {
    fn debug(&self, args: fmt::Arguments<'_>);

    /// Informational message
    fn log(&self, args: fmt::Arguments<'_>);

    fn error(&self, args: fmt::Arguments<'_>);
}

/// Forwards every message to the `tracing` macros
#[derive(Debug, Clone)]
pub struct TracingLogger {
    component: &'static str,
}

impl TracingLogger {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new("docstore")
    }
}

impl Logger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(component = self.component, "{}", args);
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        tracing::info!(component = self.component, "{}", args);
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(component = self.component, "{}", args);
    }
}
