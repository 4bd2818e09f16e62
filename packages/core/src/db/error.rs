//! Storage Error Types
//!
//! This module defines error types for the storage gateway, covering
//! connection, statement execution, transaction control, and row decoding.

use std::path::PathBuf;
use thiserror::Error;

/// Storage gateway errors
///
/// Every failure raised while executing a batch, controlling a transaction,
/// or reading ordered records surfaces as one of these variants.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open the database
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to create parent directory for a file-backed database
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    Libsql(#[from] libsql::Error),

    /// Statement execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecution { context: String },

    /// Transaction control error with context
    #[error("Transaction failed: {context}")]
    Transaction { context: String },

    /// Stored row could not be turned into a record
    #[error("Failed to decode stored row: {context}")]
    Decode { context: String },
}

impl StorageError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecution {
            context: context.into(),
        }
    }

    /// Create a transaction error with context
    pub fn transaction(context: impl Into<String>) -> Self {
        Self::Transaction {
            context: context.into(),
        }
    }

    /// Create a decode error with context
    pub fn decode(context: impl Into<String>) -> Self {
        Self::Decode {
            context: context.into(),
        }
    }
}
