//! Storage error types.

use thiserror::Error;

use ledgerbook_core::errors::{DatabaseError, Error};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Filesystem error: {0}")]
    Io(String),

    /// A write hit a collection table the local schema does not have.
    #[error("Local table '{0}' is missing")]
    SchemaDrift(String),

    #[error("Write actor unavailable: {0}")]
    WriterGone(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Pool(message) => Error::Database(DatabaseError::Pool(message)),
            StorageError::Migration(message) => Error::Database(DatabaseError::Migration(message)),
            StorageError::SchemaDrift(collection) => {
                Error::Database(DatabaseError::SchemaDrift(collection))
            }
            other => Error::Database(DatabaseError::Internal(other.to_string())),
        }
    }
}
