// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only process events, as consumed by the state store adapter.

use serde::{Deserialize, Serialize};

use crate::process::ProcessId;

/// Category of an append-only [`ProcessEvent`]. Never mutated once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Lifecycle,
    Metrics,
    Log,
    Error,
}

crate::simple_display! {
    EventType {
        Lifecycle => "lifecycle",
        Metrics => "metrics",
        Log => "log",
        Error => "error",
    }
}

/// One append-only record in a process's event stream.
///
/// Invariant (i): every status change produces exactly one `Lifecycle` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub process_id: ProcessId,
    pub event_type: EventType,
    pub payload: Vec<u8>,
    pub timestamp: u64,
}

impl ProcessEvent {
    pub fn lifecycle(process_id: ProcessId, status: impl std::fmt::Display, timestamp: u64) -> Self {
        Self {
            process_id,
            event_type: EventType::Lifecycle,
            payload: status.to_string().into_bytes(),
            timestamp,
        }
    }

    pub fn log(process_id: ProcessId, line: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self { process_id, event_type: EventType::Log, payload: line.into(), timestamp }
    }

    pub fn error(process_id: ProcessId, message: impl Into<String>, timestamp: u64) -> Self {
        Self {
            process_id,
            event_type: EventType::Error,
            payload: message.into().into_bytes(),
            timestamp,
        }
    }
}
