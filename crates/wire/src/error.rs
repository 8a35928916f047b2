// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors from framing or decoding a wire payload.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message exceeds max frame size ({0} bytes)")]
    FrameTooLarge(usize),

    #[error("truncated payload: expected at least {0} more bytes")]
    Truncated(usize),

    #[error("invalid utf-8 in payload")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown tag byte {0} for {1}")]
    UnknownTag(u8, &'static str),

    #[error("invalid uuid in payload")]
    Uuid(#[from] uuid::Error),
}

impl From<ProtocolError> for ghost_core::GhostError {
    fn from(err: ProtocolError) -> Self {
        ghost_core::GhostError::Malformed(err.to_string())
    }
}
