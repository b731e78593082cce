//! Typed errors for the question-answering pipeline.
//!
//! [`QaError`] is the error surface of every pipeline component. Unanswerable
//! questions and spent repair budgets are not errors: they are terminal
//! [`SqlOutcome`](crate::repair::SqlOutcome) values with their own messages.

use thiserror::Error;

/// Errors raised by completion and embedding providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("provider rate limited the request: {0}")]
    RateLimited(String),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("provider unreachable: {0}")]
    Unavailable(String),

    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether another attempt at the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout { .. }
                | ProviderError::RateLimited(_)
                | ProviderError::Unavailable(_)
        ) || matches!(self, ProviderError::Http { status, .. } if *status >= 500)
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { secs: timeout_secs }
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

/// Errors raised while loading or querying a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("record {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("query vector has dimension {found}, index dimension is {expected}")]
    QueryDimension { expected: usize, found: usize },

    #[error("failed to read embeddings file {path}: {message}")]
    Load { path: String, message: String },
}

/// Top-level error for a question-answering request.
#[derive(Error, Debug)]
pub enum QaError {
    #[error("failed to read database schema: {0}")]
    SchemaRead(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("query execution failed: {0}")]
    QueryExecution(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QaError {
    /// Machine-readable tag used in HTTP responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            QaError::SchemaRead(_) => "schema_read",
            QaError::Provider(ProviderError::Timeout { .. }) => "provider_timeout",
            QaError::Provider(_) => "provider_error",
            QaError::QueryExecution(_) => "query_execution",
            QaError::Index(_) => "index_error",
            QaError::Io(_) => "io_error",
            QaError::Json(_) => "json_error",
        }
    }
}

pub type QaResult<T> = std::result::Result<T, QaError>;
