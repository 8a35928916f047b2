// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The library linked into managed apps: registers with the daemon, sends
//! heartbeats/metrics, and answers targeted commands (§4.I).

use std::sync::Arc;
use std::time::Duration;

use ghost_bus::MessageBus;
use ghost_core::{Clock, ProcessRegistration, SystemClock};
use ghost_wire::{CommandResponse, CommandType, SystemCommand};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{RuntimeHookError, RuntimeHookResult};
use crate::metrics_source::MetricsSource;

pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);
const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Handler for commands addressed to this app on `ghost:commands:{self}`.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, command: SystemCommand) -> CommandResponse;
}

/// Answers every command with success and no data; used when an app has no
/// targeted commands of its own to handle beyond the runtime's own `ping`.
pub struct NoopCommandHandler;

impl CommandHandler for NoopCommandHandler {
    fn handle(&self, command: SystemCommand) -> CommandResponse {
        match command.command_type {
            CommandType::Ping => CommandResponse::ok(command.command_id, 0, None),
            _ => CommandResponse::unknown_command(command.command_id, 0),
        }
    }
}

/// A connected, registered managed app. Owns the background heartbeat and
/// command-subscription tasks; dropping or calling [`AppRuntime::shutdown`]
/// stops them.
pub struct AppRuntime<C: Clock + 'static = SystemClock> {
    bus: Arc<MessageBus<C>>,
    registration: ProcessRegistration,
    clock: C,
    cancel: CancellationToken,
}

impl<C: Clock + 'static> AppRuntime<C> {
    /// Send `register` and wait up to [`REGISTER_TIMEOUT`] for a response on
    /// `ghost:responses` with a matching `command_id`.
    pub async fn connect(
        bus: Arc<MessageBus<C>>,
        registration: ProcessRegistration,
        clock: C,
    ) -> RuntimeHookResult<Self> {
        let command_id = uuid::Uuid::new_v4().to_string();
        let data = serde_json::to_vec(&registration)
            .map_err(|e| RuntimeHookError::RegistrationRejected(e.to_string()))?;
        let command = SystemCommand {
            command_id: command_id.clone(),
            command_type: CommandType::Register,
            target_process_id: None,
            parameters: Default::default(),
            data: Some(data),
        };

        let mut responses = bus.subscribe("ghost:responses").await?;
        bus.publish(
            "ghost:commands",
            command.encode(),
            ghost_core::Priority::High,
            None,
            "system_command",
        )
        .await?;

        let wait = async {
            loop {
                let Some(msg) = responses.receiver.recv().await else { return None };
                if let Ok(resp) = CommandResponse::decode(&msg.payload) {
                    if resp.command_id == command_id {
                        return Some(resp);
                    }
                }
            }
        };

        match timeout(REGISTER_TIMEOUT, wait).await {
            Ok(Some(resp)) if resp.success => {
                responses.cancel();
                Ok(Self { bus, registration, clock, cancel: CancellationToken::new() })
            }
            Ok(Some(resp)) => {
                responses.cancel();
                Err(RuntimeHookError::RegistrationRejected(
                    resp.error.unwrap_or_else(|| "unknown error".into()),
                ))
            }
            Ok(None) => {
                responses.cancel();
                Err(RuntimeHookError::RegisterTimeout)
            }
            Err(_) => {
                responses.cancel();
                Err(RuntimeHookError::RegisterTimeout)
            }
        }
    }

    /// Spawn the heartbeat loop and the targeted-command subscriber. Returns
    /// immediately; both run until [`AppRuntime::shutdown`] is called.
    pub fn run(
        &self,
        metrics_source: Arc<dyn MetricsSource>,
        command_handler: Arc<dyn CommandHandler>,
        metrics_interval: Duration,
    ) {
        self.spawn_heartbeat(metrics_source, metrics_interval);
        self.spawn_command_listener(command_handler);
    }

    fn spawn_heartbeat(&self, metrics_source: Arc<dyn MetricsSource>, interval: Duration) {
        let bus = Arc::clone(&self.bus);
        let id = self.registration.id;
        let clock = self.clock.clone();
        let cancel = self.cancel.clone();
        let channel = format!("ghost:metrics:{id}");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                let snapshot = metrics_source.snapshot(clock.epoch_ms());
                let payload = match serde_json::to_vec(&snapshot) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize metrics snapshot");
                        continue;
                    }
                };
                if let Err(e) =
                    bus.publish(&channel, payload, ghost_core::Priority::Low, None, "metrics").await
                {
                    warn!(error = %e, channel, "failed to publish heartbeat");
                }
            }
        });
    }

    fn spawn_command_listener(&self, handler: Arc<dyn CommandHandler>) {
        let bus = Arc::clone(&self.bus);
        let id = self.registration.id;
        let cancel = self.cancel.clone();
        let channel = format!("ghost:commands:{id}");
        tokio::spawn(async move {
            let Ok(mut sub) = bus.subscribe(&channel).await else {
                warn!(channel, "failed to subscribe to targeted command channel");
                return;
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
                            debug!(channel, "dropped malformed targeted command");
                            continue;
                        };
                        let response = handler.handle(command.clone());
                        let response_channel = command.response_channel().to_string();
                        if let Err(e) = bus
                            .publish(
                                &response_channel,
                                response.encode(),
                                ghost_core::Priority::Normal,
                                None,
                                "command_response",
                            )
                            .await
                        {
                            warn!(error = %e, "failed to publish targeted command response");
                        }
                    }
                }
            }
        });
    }

    /// Publish a `Stopped` lifecycle event and stop the background tasks.
    pub async fn shutdown(&self) -> RuntimeHookResult<()> {
        self.cancel.cancel();
        let id = self.registration.id;
        let event = ghost_core::ProcessEvent::lifecycle(id, "stopped", self.clock.epoch_ms());
        let payload = serde_json::to_vec(&event)
            .map_err(|e| RuntimeHookError::RegistrationRejected(e.to_string()))?;
        self.bus
            .publish(&format!("ghost:events:{id}"), payload, ghost_core::Priority::High, None, "lifecycle")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ghost_bus::{InMemoryOutbox, InMemoryTransport};
    use ghost_core::FakeClock;

    use super::*;

    fn registration() -> ProcessRegistration {
        ghost_core::test_support::service_registration("app-1", "/bin/myapp")
    }

    async fn responder_bus(clock: FakeClock) -> Arc<MessageBus<FakeClock>> {
        let transport = Arc::new(InMemoryTransport::new());
        let outbox = Arc::new(InMemoryOutbox::new());
        MessageBus::new(transport, Some(outbox), clock)
    }

    #[tokio::test]
    async fn connect_succeeds_when_daemon_acks_register() {
        let clock = FakeClock::new();
        let bus = responder_bus(clock.clone()).await;

        let mut commands = bus.subscribe("ghost:commands").await.unwrap();
        let daemon_bus = Arc::clone(&bus);
        tokio::spawn(async move {
            let msg = commands.receiver.recv().await.unwrap();
            let cmd = SystemCommand::decode(&msg.payload).unwrap();
            let resp = CommandResponse::ok(cmd.command_id, 0, None);
            daemon_bus
                .publish("ghost:responses", resp.encode(), ghost_core::Priority::Normal, None, "r")
                .await
                .unwrap();
        });

        let runtime = AppRuntime::connect(bus, registration(), clock).await.unwrap();
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn connect_fails_on_rejection() {
        let clock = FakeClock::new();
        let bus = responder_bus(clock.clone()).await;

        let mut commands = bus.subscribe("ghost:commands").await.unwrap();
        let daemon_bus = Arc::clone(&bus);
        tokio::spawn(async move {
            let msg = commands.receiver.recv().await.unwrap();
            let cmd = SystemCommand::decode(&msg.payload).unwrap();
            let resp = CommandResponse::failure(cmd.command_id, 0, "AlreadyExists: app-1");
            daemon_bus
                .publish("ghost:responses", resp.encode(), ghost_core::Priority::Normal, None, "r")
                .await
                .unwrap();
        });

        let err = AppRuntime::connect(bus, registration(), clock).await.unwrap_err();
        assert!(matches!(err, RuntimeHookError::RegistrationRejected(_)));
    }
}
