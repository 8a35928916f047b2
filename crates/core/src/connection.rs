// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness record for an app connected to the daemon over the bus.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::metrics::ProcessMetrics;
use crate::process::ProcessId;

/// Metadata an app reports when it first registers with the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    pub kind: String,
    pub version: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

/// Liveness state of a connected app, driven by heartbeat recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Running,
    Unhealthy,
    Stopped,
}

crate::simple_display! {
    ConnectionStatus {
        Connecting => "connecting",
        Running => "running",
        Unhealthy => "unhealthy",
        Stopped => "stopped",
    }
}

/// Connection Tracker's view of one managed app.
///
/// Created on first `register`, refreshed on every heartbeat, evicted by the
/// sweeper after `UnhealthyTimeout` (see `ghost-daemon::connection_tracker`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConnection {
    pub id: ProcessId,
    pub metadata: AppMetadata,
    pub status: ConnectionStatus,
    pub last_seen: u64,
    pub last_metrics: Option<ProcessMetrics>,
    /// The daemon's own self-registration; never evicted by the sweeper.
    pub is_daemon: bool,
}

impl AppConnection {
    pub fn new(id: ProcessId, metadata: AppMetadata, now_ms: u64, is_daemon: bool) -> Self {
        Self {
            id,
            metadata,
            status: ConnectionStatus::Connecting,
            last_seen: now_ms,
            last_metrics: None,
            is_daemon,
        }
    }

    pub fn touch(&mut self, now_ms: u64, metrics: Option<ProcessMetrics>) {
        self.last_seen = now_ms;
        if metrics.is_some() {
            self.last_metrics = metrics;
        }
        if self.status != ConnectionStatus::Stopped {
            self.status = ConnectionStatus::Running;
        }
    }
}
