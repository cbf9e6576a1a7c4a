//! Operator-facing error reporting.
//!
//! Internal causes never reach clients beyond what the debug flags allow, so
//! this sink is the only place an operator sees them in full.

use std::fmt;

/// Internal failure captured behind a client-visible error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CauseRecord {
    /// Method that observed the failure.
    pub origin: &'static str,
    pub message: String,
    /// Source chain below `message`, outermost first.
    pub chain: Vec<String>,
}

impl CauseRecord {
    pub fn from_error(origin: &'static str, error: &anyhow::Error) -> Self {
        Self {
            origin,
            message: error.to_string(),
            chain: error.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }
}

impl fmt::Display for CauseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.chain {
            write!(f, "\n  caused by: {cause}")?;
        }
        Ok(())
    }
}

/// Observability sink for the dispatcher.
pub trait ErrorReporter: Send + Sync {
    /// Record an internal cause in full.
    fn internal_cause(&self, record: &CauseRecord);

    /// Record a notice-level summary.
    fn notice(&self, origin: &'static str, message: &str);
}

/// Reports through `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn internal_cause(&self, record: &CauseRecord) {
        tracing::error!(origin = record.origin, "{record}");
    }

    fn notice(&self, origin: &'static str, message: &str) {
        tracing::info!(origin, "{message}");
    }
}
