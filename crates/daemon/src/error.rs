// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("bus error: {0}")]
    Bus(#[from] ghost_bus::BusError),

    #[error("storage error: {0}")]
    Storage(#[from] ghost_storage::StorageError),

    #[error("wire protocol error: {0}")]
    Wire(#[from] ghost_wire::ProtocolError),

    #[error("process {0} not found")]
    NotFound(ghost_core::ProcessId),

    #[error("process {0} already registered")]
    AlreadyExists(ghost_core::ProcessId),

    #[error("illegal transition for {0}: {1} -> {2}")]
    IllegalTransition(ghost_core::ProcessId, ghost_core::ProcessStatus, ghost_core::ProcessStatus),

    #[error("failed to spawn process {0}: {1}")]
    SpawnFailed(ghost_core::ProcessId, String),

    #[error("malformed command payload: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

impl From<DaemonError> for ghost_core::GhostError {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::Bus(e) => e.into(),
            DaemonError::Storage(e) => e.into(),
            DaemonError::Wire(e) => e.into(),
            DaemonError::NotFound(id) => ghost_core::GhostError::NotFound(id.to_string()),
            DaemonError::AlreadyExists(id) => ghost_core::GhostError::AlreadyExists(id.to_string()),
            DaemonError::IllegalTransition(id, from, to) => {
                ghost_core::GhostError::IllegalState(format!("{id}: {from} -> {to}"))
            }
            DaemonError::SpawnFailed(id, reason) => {
                ghost_core::GhostError::SpawnFailed(format!("{id}: {reason}"))
            }
            DaemonError::Malformed(msg) => ghost_core::GhostError::Malformed(msg),
            DaemonError::Io(e) => ghost_core::GhostError::SpawnFailed(e.to_string()),
            DaemonError::Codec(e) => ghost_core::GhostError::Malformed(e.to_string()),
        }
    }
}
