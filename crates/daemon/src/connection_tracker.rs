// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness tracking for apps connected over the bus (§4.D).

use std::collections::HashMap;

use ghost_core::{AppConnection, AppMetadata, ConnectionStatus, ProcessId, ProcessMetrics};
use parking_lot::RwLock;
use tracing::debug;

/// `now - last_seen > unhealthy_timeout` marks a connection Unhealthy;
/// past `stop_timeout` it is marked Stopped and swept out.
pub struct ConnectionTracker {
    connections: RwLock<HashMap<ProcessId, AppConnection>>,
    unhealthy_timeout_ms: u64,
    stop_timeout_ms: u64,
}

impl ConnectionTracker {
    pub fn new(health_check_interval_ms: u64) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            unhealthy_timeout_ms: health_check_interval_ms * 2,
            stop_timeout_ms: health_check_interval_ms * 5,
        }
    }

    /// Register a connection on first contact (a `register` command or the
    /// daemon's own self-registration).
    pub fn register(&self, id: ProcessId, metadata: AppMetadata, now_ms: u64, is_daemon: bool) {
        self.connections.write().entry(id).or_insert_with(|| AppConnection::new(id, metadata, now_ms, is_daemon));
    }

    /// Update `last_seen`/`last_metrics` on a heartbeat message for `id`.
    pub fn touch(&self, id: &ProcessId, now_ms: u64, metrics: Option<ProcessMetrics>) {
        if let Some(conn) = self.connections.write().get_mut(id) {
            conn.touch(now_ms, metrics);
        }
    }

    pub fn get(&self, id: &ProcessId) -> Option<AppConnection> {
        self.connections.read().get(id).cloned()
    }

    pub fn snapshot(&self) -> Vec<AppConnection> {
        self.connections.read().values().cloned().collect()
    }

    /// Run the sweep: transition stale connections to Unhealthy, then Stopped.
    /// Returns the ids that transitioned to Stopped this round, for lifecycle
    /// event emission by the caller (the daemon's own entry is never swept).
    pub fn sweep(&self, now_ms: u64) -> Vec<ProcessId> {
        let mut stopped = Vec::new();
        let mut conns = self.connections.write();
        for conn in conns.values_mut() {
            if conn.is_daemon || conn.status == ConnectionStatus::Stopped {
                continue;
            }
            let age = now_ms.saturating_sub(conn.last_seen);
            if age > self.stop_timeout_ms {
                debug!(id = %conn.id, age_ms = age, "connection swept as stopped");
                conn.status = ConnectionStatus::Stopped;
                stopped.push(conn.id);
            } else if age > self.unhealthy_timeout_ms {
                conn.status = ConnectionStatus::Unhealthy;
            }
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> AppMetadata {
        AppMetadata {
            name: "svc".into(),
            kind: "service".into(),
            version: "1.0".into(),
            environment: HashMap::new(),
            configuration: HashMap::new(),
        }
    }

    #[test]
    fn touch_transitions_connecting_to_running() {
        let tracker = ConnectionTracker::new(30_000);
        let id = ProcessId::from_string("proc-1");
        tracker.register(id, metadata(), 0, false);
        assert_eq!(tracker.get(&id).unwrap().status, ConnectionStatus::Connecting);

        tracker.touch(&id, 100, None);
        assert_eq!(tracker.get(&id).unwrap().status, ConnectionStatus::Running);
    }

    #[test]
    fn sweep_marks_unhealthy_then_stopped() {
        let tracker = ConnectionTracker::new(30_000);
        let id = ProcessId::from_string("proc-1");
        tracker.register(id, metadata(), 0, false);
        tracker.touch(&id, 0, None);

        tracker.sweep(65_000);
        assert_eq!(tracker.get(&id).unwrap().status, ConnectionStatus::Unhealthy);

        let stopped = tracker.sweep(151_000);
        assert_eq!(stopped, vec![id]);
        assert_eq!(tracker.get(&id).unwrap().status, ConnectionStatus::Stopped);
    }

    #[test]
    fn daemon_entry_is_never_swept() {
        let tracker = ConnectionTracker::new(30_000);
        let id = ProcessId::from_string("proc-daemon");
        tracker.register(id, metadata(), 0, true);

        let stopped = tracker.sweep(1_000_000_000);
        assert!(stopped.is_empty());
        assert_eq!(tracker.get(&id).unwrap().status, ConnectionStatus::Connecting);
    }
}
