//! Storage error types.

use std::fmt::Display;

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage failures, each naming the key or prefix involved.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage misconfigured: {0}")]
    Config(String),

    #[error("No object at {0}")]
    NotFound(String),

    #[error("Writing {key} failed: {message}")]
    Write { key: String, message: String },

    #[error("Reading {key} failed: {message}")]
    Read { key: String, message: String },

    #[error("Removing {key} failed: {message}")]
    Delete { key: String, message: String },

    #[error("Listing {prefix} failed: {message}")]
    Listing { prefix: String, message: String },

    #[error("Key escapes the storage root or is empty: {0:?}")]
    InvalidKey(String),

    #[error("Storage unreachable: {0}")]
    Unreachable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn write(key: &str, err: impl Display) -> Self {
        Self::Write {
            key: key.to_string(),
            message: err.to_string(),
        }
    }

    pub fn read(key: &str, err: impl Display) -> Self {
        Self::Read {
            key: key.to_string(),
            message: err.to_string(),
        }
    }

    pub fn delete(key: &str, err: impl Display) -> Self {
        Self::Delete {
            key: key.to_string(),
            message: err.to_string(),
        }
    }

    pub fn listing(prefix: &str, err: impl Display) -> Self {
        Self::Listing {
            prefix: prefix.to_string(),
            message: err.to_string(),
        }
    }

    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey(key.into())
    }
}
