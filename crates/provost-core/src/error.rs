//! Error types for the provost system.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvostError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Network or socket level failure; never retried by the client layer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A non-2xx response the hooks did not translate to success.
    #[error("server responded with status: {code} for the {verb} request on {url}")]
    HttpStatus { verb: String, url: String, code: u16 },

    /// A polling budget was exhausted.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Advisory-lock contention.
    #[error("Lock is busy: {0}")]
    Busy(String),

    /// A concurrent actor got there first (scheduler start, duplicate rows).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProvostError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error is the semantic "resource already exists"
    /// conflict that drives the Create self-healing strategy.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::Conflict(_) | Self::HttpStatus { code: 409, .. }
        )
    }
}

pub type ProvostResult<T> = Result<T, ProvostError>;
