//! Crate-wide error taxonomy.

use thiserror::Error;

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage-layer failures as seen by domain code.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Internal database error: {0}")]
    Internal(String),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Migration error: {0}")]
    Migration(String),

    /// Raised when a write targets a collection table the local schema does
    /// not have yet. Reads degrade silently instead (see the local store).
    #[error("Local data for '{0}' is out of date. Please refresh the app to upgrade the local database")]
    SchemaDrift(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sync error: {0}")]
    Sync(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto(message.into())
    }

    /// Create a sync error
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync(message.into())
    }
}
