// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process registration and the supervised-process record.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::GhostError;

crate::define_id! {
    /// Unique identifier for a registered, supervised process.
    pub struct ProcessId("proc");
}

/// Kind of managed process, as declared at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    App,
    Service,
    Daemon,
    Wrapped,
}

crate::simple_display! {
    ProcessType {
        App => "app",
        Service => "service",
        Daemon => "daemon",
        Wrapped => "wrapped",
    }
}

/// Whether a process is expected to exit on its own (`OneShot`) or run
/// indefinitely and be restarted on crash (`Service`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppType {
    OneShot,
    Service,
}

impl Default for AppType {
    fn default() -> Self {
        AppType::Service
    }
}

/// Recognized, enumerated configuration keys for a [`ProcessRegistration`].
///
/// The source system reads these out of a dynamic `a:b:c`-style JSON tree;
/// here they are flattened into a fixed struct at registration time so the
/// supervisor never walks arbitrary config paths at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfiguration {
    #[serde(default)]
    pub app_type: AppType,
    #[serde(default)]
    pub auto_restart: bool,
    /// 0 means unbounded.
    #[serde(default)]
    pub max_restart_attempts: u32,
    #[serde(default)]
    pub restart_delay_ms: u64,
    #[serde(default)]
    pub watch: bool,
}

impl Default for ProcessConfiguration {
    fn default() -> Self {
        Self {
            app_type: AppType::default(),
            auto_restart: false,
            max_restart_attempts: 0,
            restart_delay_ms: 1_000,
            watch: false,
        }
    }
}

/// Immutable-once-accepted registration for a process the supervisor will manage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRegistration {
    pub id: ProcessId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProcessType,
    #[serde(default)]
    pub version: String,
    pub executable_path: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub configuration: ProcessConfiguration,
}

impl ProcessRegistration {
    /// Validate the invariants this type promises: non-empty id and path.
    pub fn validate(&self) -> Result<(), GhostError> {
        if self.id.is_empty() {
            return Err(GhostError::Malformed("registration id is empty".into()));
        }
        if self.executable_path.is_empty() {
            return Err(GhostError::Malformed("registration executable_path is empty".into()));
        }
        Ok(())
    }

    /// Effective environment: registration env merged over the daemon's own
    /// process environment, per §4.F `Start`.
    pub fn effective_environment(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(self.environment.clone());
        env
    }
}

/// Lifecycle status of a supervised process. See the DAG in §4.F of the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Crashed,
    Warning,
}

crate::simple_display! {
    ProcessStatus {
        Starting => "starting",
        Running => "running",
        Stopping => "stopping",
        Stopped => "stopped",
        Failed => "failed",
        Crashed => "crashed",
        Warning => "warning",
    }
}

impl ProcessStatus {
    /// Parse a persisted status string, mapping unknown values to `Warning`
    /// rather than failing the read (§9: string-typed status validation).
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "starting" => ProcessStatus::Starting,
            "running" => ProcessStatus::Running,
            "stopping" => ProcessStatus::Stopping,
            "stopped" => ProcessStatus::Stopped,
            "failed" => ProcessStatus::Failed,
            "crashed" => ProcessStatus::Crashed,
            _ => ProcessStatus::Warning,
        }
    }

    /// Whether `self -> next` is a legal edge in the supervisor's DAG.
    pub fn can_transition_to(self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Warning)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Running, Stopped)
                | (Warning, Running)
                | (Warning, Crashed)
                | (Stopping, Stopped)
                | (Crashed, Starting)
                | (Failed, Starting)
        )
    }
}

/// Runtime record for a registered process: one per id, mutated only by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub registration: ProcessRegistration,
    pub status: ProcessStatus,
    pub os_pid: Option<u32>,
    pub started_at: Option<u64>,
    pub last_heartbeat: Option<u64>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub last_metrics: Option<crate::metrics::ProcessMetrics>,
}

impl ProcessInfo {
    pub fn new(registration: ProcessRegistration) -> Self {
        Self {
            registration,
            status: ProcessStatus::Stopped,
            os_pid: None,
            started_at: None,
            last_heartbeat: None,
            restart_count: 0,
            last_exit_code: None,
            last_metrics: None,
        }
    }

    pub fn id(&self) -> &ProcessId {
        &self.registration.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_dag_allows_documented_edges() {
        assert!(ProcessStatus::Stopped.can_transition_to(ProcessStatus::Starting));
        assert!(ProcessStatus::Starting.can_transition_to(ProcessStatus::Running));
        assert!(ProcessStatus::Running.can_transition_to(ProcessStatus::Crashed));
        assert!(ProcessStatus::Crashed.can_transition_to(ProcessStatus::Starting));
        assert!(ProcessStatus::Failed.can_transition_to(ProcessStatus::Starting));
    }

    #[test]
    fn status_dag_rejects_illegal_edges() {
        assert!(!ProcessStatus::Stopping.can_transition_to(ProcessStatus::Starting));
        assert!(!ProcessStatus::Stopped.can_transition_to(ProcessStatus::Running));
    }

    #[test]
    fn parse_lenient_maps_unknown_to_warning() {
        assert_eq!(ProcessStatus::parse_lenient("bogus"), ProcessStatus::Warning);
        assert_eq!(ProcessStatus::parse_lenient("running"), ProcessStatus::Running);
    }

    #[test]
    fn validate_rejects_empty_executable_path() {
        let reg = ProcessRegistration {
            id: ProcessId::from_string("proc-x"),
            name: "x".into(),
            kind: ProcessType::Service,
            version: String::new(),
            executable_path: String::new(),
            arguments: vec![],
            working_directory: None,
            environment: HashMap::new(),
            configuration: ProcessConfiguration::default(),
        };
        assert!(reg.validate().is_err());
    }
}
