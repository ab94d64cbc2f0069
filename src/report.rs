//! Error reporting seam for failures nobody is waiting on.
use serde_json::Value;
use tracing::error;

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub transaction_name: &'static str,
    pub metadata: Value,
}

/// Fire-and-forget sink for background errors.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, err: &anyhow::Error, ctx: &ErrorContext);
}

/// Reports through `tracing` as a structured error event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, err: &anyhow::Error, ctx: &ErrorContext) {
        error!(
            transaction = ctx.transaction_name,
            metadata = %ctx.metadata,
            error = ?err,
            "background task failed"
        );
    }
}
