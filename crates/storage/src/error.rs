// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors surfaced by a [`crate::StateStoreAdapter`] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("process not found: {0}")]
    NotFound(String),

    #[error("conditional update rejected: row for {0} does not exist")]
    NoSuchRow(String),

    #[error("adapter backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StorageError> for ghost_core::GhostError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => ghost_core::GhostError::NotFound(id),
            other => ghost_core::GhostError::PersistenceFailed(other.to_string()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
