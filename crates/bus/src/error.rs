// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors from publish/subscribe and transport operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("transport unavailable and no outbox configured")]
    TransportUnavailable,

    #[error("transport degraded: {0}")]
    TransportDegraded(String),

    #[error("transport backend error: {0}")]
    Transport(String),

    #[error("invalid channel pattern: {0}")]
    InvalidPattern(String),

    #[error("payload codec error: {0}")]
    Codec(#[from] ghost_wire::ProtocolError),
}

impl From<BusError> for ghost_core::GhostError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::TransportUnavailable => {
                ghost_core::GhostError::TransportUnavailable(err.to_string())
            }
            BusError::TransportDegraded(msg) => ghost_core::GhostError::TransportDegraded(msg),
            other => ghost_core::GhostError::TransportUnavailable(other.to_string()),
        }
    }
}

pub type BusResult<T> = Result<T, BusError>;
