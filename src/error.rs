use crate::context::ContextError;
use std::fmt;
use thiserror::Error;

/// Where an error originated, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Option or configuration key that was rejected (e.g. "pool.workers", "retry.max_delay")
    pub field_path: Option<String>,
    pub details: Option<String>,
    /// Component that raised the error (e.g. "pool_config", "rate_limiter")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Errors raised by the toolkit itself.
///
/// Failures of caller-supplied operations never show up here: they travel in
/// [`crate::concurrency::TaskError`] or [`crate::resilience::retry::RetryError`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", describe(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("{0}")]
    Context(#[from] ContextError),

    #[error("rate limiter closed")]
    LimiterClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn describe(ctx: &ErrorContext) -> String {
    let parts: Vec<String> = [
        ctx.field_path.as_ref().map(|f| format!("field: {}", f)),
        ctx.details.as_ref().map(|d| format!("details: {}", d)),
        ctx.source.as_ref().map(|s| format!("source: {}", s)),
    ]
    .into_iter()
    .flatten()
    .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Reject an option value at construction time. `rejected` ends up in the details.
    pub(crate) fn invalid_option(
        message: impl Into<String>,
        field_path: &str,
        source: &str,
        rejected: impl fmt::Display,
    ) -> Self {
        Self::configuration_with_context(
            message,
            ErrorContext::new()
                .with_field_path(field_path)
                .with_details(format!("rejected value: {}", rejected))
                .with_source(source),
        )
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The cancellation reason, when this error came from a done [`crate::Context`].
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Error::Context(reason) => Some(*reason),
            _ => None,
        }
    }
}
