// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeHookError {
    #[error("bus error: {0}")]
    Bus(#[from] ghost_bus::BusError),

    #[error("registration was rejected: {0}")]
    RegistrationRejected(String),

    #[error("timed out waiting for register response")]
    RegisterTimeout,
}

pub type RuntimeHookResult<T> = Result<T, RuntimeHookError>;
