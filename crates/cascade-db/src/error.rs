//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with additional context about which operation failed.
//! The orchestrator sees them as [`StoreError`]s.

use cascade_core::StoreError;
use cascade_types::{HistoryViolation, SimulationId};

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No simulation with this ID is stored.
    #[error("Simulation not found: {0}")]
    NotFound(SimulationId),

    /// The stored history rejected an appended round.
    #[error("Rejected round: {0}")]
    Rejected(#[from] HistoryViolation),

    /// A stored row holds a value that does not map back to the model.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(id) => Self::NotFound(id),
            DbError::Rejected(source) => Self::Rejected { source },
            DbError::Serialization(source) => Self::Serialization { source },
            other => Self::Backend(other.to_string()),
        }
    }
}
