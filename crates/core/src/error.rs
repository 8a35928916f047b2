// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain-level error kinds shared across the supervisor, bus, and storage layers.

use thiserror::Error;

/// Errors raised by the supervisor, message bus, and state store.
///
/// These are domain errors, not transport-specific ones: a Redis timeout and
/// a Unix-socket timeout both surface as [`GhostError::Timeout`].
#[derive(Debug, Error)]
pub enum GhostError {
    /// The bus cannot reach the remote transport and no outbox is configured.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The operation succeeded only via the outbox fallback. Not fatal; only
    /// surfaced through diagnostics, never returned to a publisher.
    #[error("transport degraded: {0}")]
    TransportDegraded(String),

    /// No `ProcessInfo` exists for the given id.
    #[error("process not found: {0}")]
    NotFound(String),

    /// `register` without `force` against an id that already exists.
    #[error("process already exists: {0}")]
    AlreadyExists(String),

    /// The request violates the lifecycle state machine (e.g. Start on Stopping).
    #[error("illegal state transition: {0}")]
    IllegalState(String),

    /// The OS refused to start the process.
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    /// A state store write failed after exhausting retries.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// The operation exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A payload could not be decoded.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The operation targeted a disposed component.
    #[error("disposed: {0}")]
    Disposed(String),
}

impl GhostError {
    /// Stable, lowercase kind tag used in `CommandResponse::Error` and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GhostError::TransportUnavailable(_) => "TransportUnavailable",
            GhostError::TransportDegraded(_) => "TransportDegraded",
            GhostError::NotFound(_) => "NotFound",
            GhostError::AlreadyExists(_) => "AlreadyExists",
            GhostError::IllegalState(_) => "IllegalState",
            GhostError::SpawnFailed(_) => "SpawnFailed",
            GhostError::PersistenceFailed(_) => "PersistenceFailed",
            GhostError::Timeout(_) => "Timeout",
            GhostError::Malformed(_) => "Malformed",
            GhostError::Disposed(_) => "Disposed",
        }
    }
}

pub type GhostResult<T> = Result<T, GhostError>;
