//! Error types for tablewright.

use thiserror::Error;

/// The main error type for schema operations.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A table or column invariant is violated. Raised before any side effect.
    #[error("Validation error on {scope}: {rule}")]
    Validation { scope: String, rule: String },

    /// Name collision with an existing table.
    #[error("Conflict: table '{0}' already exists")]
    Conflict(String),

    /// Disallowed schema revision.
    #[error("Transition error on table '{table}': {reason}")]
    Transition { table: String, reason: String },

    /// Unknown table id or migration name.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The physical store failed an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// A migration unit cannot be applied or reverted in its current state.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Definition, catalog blob or migration file (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchemaError {
    /// Create a validation error for the given table.
    pub fn validation(table: &str, rule: impl Into<String>) -> Self {
        Self::Validation {
            scope: format!("table '{}'", table),
            rule: rule.into(),
        }
    }

    /// Create a validation error for a column outside any table.
    pub fn column_validation(column: &str, rule: impl Into<String>) -> Self {
        Self::Validation {
            scope: format!("column '{}'", column),
            rule: rule.into(),
        }
    }

    /// Create a transition error for the given table.
    pub fn transition(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transition {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised before anything touched the store.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::Conflict(_) | Self::Transition { .. } | Self::NotFound(_)
        )
    }
}

impl From<sqlx::Error> for SchemaError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;
