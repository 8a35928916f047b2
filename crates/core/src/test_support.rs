// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use std::collections::HashMap;

use crate::process::{
    AppType, ProcessConfiguration, ProcessId, ProcessRegistration, ProcessStatus, ProcessType,
};

/// Proptest strategies for core state machine types.
pub mod strategies {
    use super::ProcessStatus;
    use proptest::prelude::*;

    pub fn arb_process_status() -> impl Strategy<Value = ProcessStatus> {
        prop_oneof![
            Just(ProcessStatus::Starting),
            Just(ProcessStatus::Running),
            Just(ProcessStatus::Stopping),
            Just(ProcessStatus::Stopped),
            Just(ProcessStatus::Failed),
            Just(ProcessStatus::Crashed),
            Just(ProcessStatus::Warning),
        ]
    }

    /// A status reachable via a single legal edge from `from`, or `None` if terminal.
    pub fn arb_legal_next(from: ProcessStatus) -> impl Strategy<Value = Option<ProcessStatus>> {
        let candidates: Vec<ProcessStatus> = [
            ProcessStatus::Starting,
            ProcessStatus::Running,
            ProcessStatus::Stopping,
            ProcessStatus::Stopped,
            ProcessStatus::Failed,
            ProcessStatus::Crashed,
            ProcessStatus::Warning,
        ]
        .into_iter()
        .filter(|next| from.can_transition_to(*next))
        .collect();
        if candidates.is_empty() {
            Just(None).boxed()
        } else {
            proptest::sample::select(candidates).prop_map(Some).boxed()
        }
    }
}

/// Build a minimal, valid service registration for tests.
pub fn service_registration(id: &str, executable_path: &str) -> ProcessRegistration {
    ProcessRegistration {
        id: ProcessId::from_string(id),
        name: id.to_string(),
        kind: ProcessType::Service,
        version: String::new(),
        executable_path: executable_path.to_string(),
        arguments: vec![],
        working_directory: None,
        environment: HashMap::new(),
        configuration: ProcessConfiguration::default(),
    }
}

/// Build a one-shot registration with auto-restart configured, for backoff tests.
pub fn auto_restart_registration(
    id: &str,
    executable_path: &str,
    max_attempts: u32,
    restart_delay_ms: u64,
) -> ProcessRegistration {
    ProcessRegistration {
        configuration: ProcessConfiguration {
            app_type: AppType::Service,
            auto_restart: true,
            max_restart_attempts: max_attempts,
            restart_delay_ms,
            watch: false,
        },
        ..service_registration(id, executable_path)
    }
}
