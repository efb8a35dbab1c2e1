//! Database-specific error types and conversions.

use provost_core::ProvostError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Lock is busy: {0}")]
    Busy(String),
}

impl From<DbError> for ProvostError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => ProvostError::NotFound { entity, id },
            DbError::Busy(msg) => ProvostError::Busy(msg),
            other => ProvostError::Database(other.to_string()),
        }
    }
}
