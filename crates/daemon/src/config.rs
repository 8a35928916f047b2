// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Resolve state directory: GHOST_STATE_DIR > XDG_STATE_HOME/ghost > ~/.local/state/ghost
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GHOST_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("ghost");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".local/state/ghost")
}

/// Directory scanned at startup for app manifests (§4.F Discovery).
pub fn apps_dir() -> PathBuf {
    std::env::var("GHOST_APPS_DIR").map(PathBuf::from).unwrap_or_else(|_| state_dir().join("apps"))
}

/// Redis connection string for the Message Bus transport.
pub fn redis_url() -> String {
    std::env::var("GHOST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Supervisor/connection-tracker maintenance tick (default 1 s).
pub fn tick_interval() -> Duration {
    env_millis("GHOST_TICK_MS").map(Duration::from_millis).unwrap_or(Duration::from_secs(1))
}

/// Daemon-metrics-publish and state-checkpoint period (default 5 s).
pub fn checkpoint_interval() -> Duration {
    env_millis("GHOST_CHECKPOINT_MS").map(Duration::from_millis).unwrap_or(Duration::from_secs(5))
}

/// Connection Tracker sweeper period (default 30 s, §4.D).
pub fn health_check_interval() -> Duration {
    env_millis("GHOST_HEALTH_CHECK_MS").map(Duration::from_millis).unwrap_or(Duration::from_secs(30))
}

/// Grace period between a graceful stop signal and force-kill (default 10 s, §4.F).
pub fn grace_period() -> Duration {
    env_millis("GHOST_GRACE_PERIOD_MS").map(Duration::from_millis).unwrap_or(Duration::from_secs(10))
}

/// Drain timeout used by the Daemon Shell's shutdown sequence.
pub fn drain_timeout() -> Duration {
    env_millis("GHOST_DRAIN_TIMEOUT_MS").map(Duration::from_millis).unwrap_or(Duration::from_secs(5))
}

fn env_millis(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
}
