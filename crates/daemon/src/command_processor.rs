// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Processor: dispatches inbound `SystemCommand`s to the Supervisor
//! and Connection Tracker, and publishes `CommandResponse`s (§4.G).

use std::sync::Arc;
use std::time::Instant;

use ghost_bus::MessageBus;
use ghost_core::{
    AppMetadata, Clock, ProcessConfiguration, ProcessId, ProcessRegistration, ProcessType,
    SystemClock,
};
use ghost_wire::{CommandResponse, CommandType, SystemCommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::connection_tracker::ConnectionTracker;
use crate::supervisor::Supervisor;

/// Default handler timeout (§5): past this, the caller gives up waiting and
/// a failure response is published instead.
const HANDLER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Serialize)]
struct PingStatus {
    uptime_ms: u64,
    process_count: usize,
    connected_apps: usize,
}

pub struct CommandProcessor<C: Clock + 'static = SystemClock> {
    supervisor: Arc<Supervisor<C>>,
    connections: Arc<ConnectionTracker>,
    bus: Arc<MessageBus<C>>,
    clock: C,
    started_at: Instant,
}

impl<C: Clock + 'static> CommandProcessor<C> {
    pub fn new(
        supervisor: Arc<Supervisor<C>>,
        connections: Arc<ConnectionTracker>,
        bus: Arc<MessageBus<C>>,
        clock: C,
    ) -> Self {
        Self { supervisor, connections, bus, clock, started_at: Instant::now() }
    }

    /// Subscribe to `ghost:commands` and dispatch every inbound command until
    /// `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut sub = match self.bus.subscribe("ghost:commands").await {
            Ok(sub) => sub,
            Err(e) => {
                error!(error = %e, "command processor failed to subscribe");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    sub.cancel();
                    return;
                }
                msg = sub.receiver.recv() => {
                    let Some(msg) = msg else { return };
                    let Ok(command) = SystemCommand::decode(&msg.payload) else {
                        warn!("dropped malformed system command");
                        continue;
                    };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.handle(command).await });
                }
            }
        }
    }

    async fn handle(&self, command: SystemCommand) {
        let command_id = command.command_id.clone();
        let response_channel = command.response_channel().to_string();
        let timestamp = self.clock.epoch_ms();

        let response = match tokio::time::timeout(HANDLER_TIMEOUT, self.dispatch(&command)).await {
            Ok(Ok(data)) => CommandResponse::ok(command_id, timestamp, data),
            Ok(Err(e)) => {
                let ghost_err: ghost_core::GhostError = e.into();
                CommandResponse::failure(command_id, timestamp, format!("{}: {}", ghost_err.kind(), ghost_err))
            }
            Err(_) => {
                let ghost_err = ghost_core::GhostError::Timeout("command handler".to_string());
                CommandResponse::failure(command_id, timestamp, format!("{}: {}", ghost_err.kind(), ghost_err))
            }
        };

        if let Err(e) = self
            .bus
            .publish(&response_channel, response.encode(), ghost_core::Priority::Normal, None, "command_response")
            .await
        {
            warn!(error = %e, response_channel, "failed to publish command response");
        }
    }

    async fn dispatch(&self, command: &SystemCommand) -> Result<Option<Vec<u8>>, crate::error::DaemonError> {
        match &command.command_type {
            CommandType::Ping => self.handle_ping().await,
            CommandType::Register => self.handle_register(command).await,
            CommandType::Start => self.handle_start(command).await,
            CommandType::Stop => self.handle_stop(command).await,
            CommandType::Restart => self.handle_restart(command).await,
            CommandType::Status => self.handle_status(command).await,
            CommandType::Run => self.handle_run(command).await,
            CommandType::Connections => self.handle_connections().await,
            CommandType::Unknown => Err(crate::error::DaemonError::Malformed("unknown command".into())),
        }
    }

    async fn handle_ping(&self) -> Result<Option<Vec<u8>>, crate::error::DaemonError> {
        let status = PingStatus {
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            process_count: self.supervisor.process_count(),
            connected_apps: self.connections.snapshot().len(),
        };
        Ok(Some(serde_json::to_vec(&status)?))
    }

    async fn handle_register(&self, command: &SystemCommand) -> Result<Option<Vec<u8>>, crate::error::DaemonError> {
        let registration = parse_registration(command)?;
        self.supervisor.register(registration).await?;
        Ok(None)
    }

    fn target_id(&self, command: &SystemCommand) -> Result<ProcessId, crate::error::DaemonError> {
        command
            .target_process_id
            .ok_or_else(|| crate::error::DaemonError::Malformed("processId is required".into()))
    }

    async fn handle_start(&self, command: &SystemCommand) -> Result<Option<Vec<u8>>, crate::error::DaemonError> {
        let id = self.target_id(command)?;
        let info = self.supervisor.start(id).await?;
        Ok(Some(serde_json::to_vec(&info)?))
    }

    async fn handle_stop(&self, command: &SystemCommand) -> Result<Option<Vec<u8>>, crate::error::DaemonError> {
        let id = self.target_id(command)?;
        let info = self.supervisor.stop(id).await?;
        Ok(Some(serde_json::to_vec(&info)?))
    }

    async fn handle_restart(&self, command: &SystemCommand) -> Result<Option<Vec<u8>>, crate::error::DaemonError> {
        let id = self.target_id(command)?;
        let info = self.supervisor.restart(id).await?;
        Ok(Some(serde_json::to_vec(&info)?))
    }

    async fn handle_status(&self, command: &SystemCommand) -> Result<Option<Vec<u8>>, crate::error::DaemonError> {
        match command.target_process_id {
            Some(id) => {
                let info = self.supervisor.status(&id).await?;
                Ok(Some(serde_json::to_vec(&info)?))
            }
            None => {
                let infos = self.supervisor.status_all().await?;
                Ok(Some(serde_json::to_vec(&infos)?))
            }
        }
    }

    async fn handle_run(&self, command: &SystemCommand) -> Result<Option<Vec<u8>>, crate::error::DaemonError> {
        let registration = build_run_registration(command)?;
        let info = self.supervisor.run_one_shot(registration).await?;
        Ok(Some(serde_json::to_vec(&info)?))
    }

    async fn handle_connections(&self) -> Result<Option<Vec<u8>>, crate::error::DaemonError> {
        Ok(Some(serde_json::to_vec(&self.connections.snapshot())?))
    }

    /// Record/refresh a connection when a `register` or heartbeat arrives
    /// outside the normal command path (called from the metrics-watcher task).
    pub fn touch_connection(&self, id: ProcessId, metadata: AppMetadata, metrics: Option<ghost_core::ProcessMetrics>) {
        let now = self.clock.epoch_ms();
        self.connections.register(id, metadata, now, false);
        self.connections.touch(&id, now, metrics);
    }
}

fn parse_registration(command: &SystemCommand) -> Result<ProcessRegistration, crate::error::DaemonError> {
    if let Some(data) = &command.data {
        return serde_json::from_slice(data).map_err(|e| crate::error::DaemonError::Malformed(e.to_string()));
    }
    if let Some(json) = command.parameters.get("registration") {
        return serde_json::from_str(json).map_err(|e| crate::error::DaemonError::Malformed(e.to_string()));
    }
    Err(crate::error::DaemonError::Malformed("register requires Data or Parameters.registration".into()))
}

fn build_run_registration(command: &SystemCommand) -> Result<ProcessRegistration, crate::error::DaemonError> {
    let params = &command.parameters;
    let app_id =
        params.get("appId").ok_or_else(|| crate::error::DaemonError::Malformed("run requires appId".into()))?;
    let app_path =
        params.get("appPath").ok_or_else(|| crate::error::DaemonError::Malformed("run requires appPath".into()))?;
    let arguments = params
        .get("args")
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let environment = params
        .iter()
        .filter_map(|(k, v)| k.strip_prefix("env:").map(|key| (key.to_string(), v.clone())))
        .collect();
    let watch = params.get("watch").map(|v| v == "true").unwrap_or(false);

    Ok(ProcessRegistration {
        id: ProcessId::from_string(app_id),
        name: app_id.clone(),
        kind: ProcessType::App,
        version: String::new(),
        executable_path: app_path.clone(),
        arguments,
        working_directory: None,
        environment,
        configuration: ProcessConfiguration {
            app_type: ghost_core::AppType::OneShot,
            watch,
            ..ProcessConfiguration::default()
        },
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn command(params: HashMap<String, String>) -> SystemCommand {
        SystemCommand {
            command_id: "c-1".into(),
            command_type: CommandType::Run,
            target_process_id: None,
            parameters: params,
            data: None,
        }
    }

    #[test]
    fn build_run_registration_parses_env_prefixed_parameters() {
        let mut params = HashMap::new();
        params.insert("appId".to_string(), "app-1".to_string());
        params.insert("appPath".to_string(), "/bin/true".to_string());
        params.insert("args".to_string(), "--flag value".to_string());
        params.insert("env:FOO".to_string(), "bar".to_string());
        params.insert("watch".to_string(), "true".to_string());

        let reg = build_run_registration(&command(params)).unwrap();
        assert_eq!(reg.arguments, vec!["--flag", "value"]);
        assert_eq!(reg.environment.get("FOO"), Some(&"bar".to_string()));
        assert!(reg.configuration.watch);
        assert_eq!(reg.configuration.app_type, ghost_core::AppType::OneShot);
    }

    #[test]
    fn build_run_registration_requires_app_id() {
        let mut params = HashMap::new();
        params.insert("appPath".to_string(), "/bin/true".to_string());
        assert!(build_run_registration(&command(params)).is_err());
    }
}
