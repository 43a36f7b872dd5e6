//! Error type for calls against the transformation service.
//!
//! [`RemoteError`] keeps the structured service code (when the service sent
//! one) apart from the free-form message so callers can classify on the code
//! first and fall back to the text.

use thiserror::Error;

/// Service error codes the core knows how to interpret.
pub mod codes {
    pub const TOO_MANY_JOBS: &str = "TooManyActiveJobs";
    pub const VALIDATION: &str = "ValidationException";
}

#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP 429 from the service. The body is kept: a throttled start can
    /// still explain itself.
    #[error("rate limited, retry after {retry_after_ms}ms: {message}")]
    RateLimited {
        retry_after_ms: u64,
        code: Option<String>,
        message: String,
    },

    /// Any other non-success response. `code` is the service error code when
    /// the body carried one.
    #[error("service error (status {status}): {message}")]
    Service {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The service answered with something the client cannot interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub fn service(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        RemoteError::Service {
            status,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Structured service code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            RemoteError::Service { code, .. } | RemoteError::RateLimited { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }
}
