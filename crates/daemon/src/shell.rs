// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon Shell: boot order, maintenance ticks, and shutdown sequence (§4.H).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use ghost_bus::MessageBus;
use ghost_core::{
    AppMetadata, Clock, ProcessId, ProcessInfo, ProcessRegistration, ProcessStatus, ProcessType,
    SystemClock,
};
use ghost_storage::StateStoreAdapter;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command_processor::CommandProcessor;
use crate::config;
use crate::connection_tracker::ConnectionTracker;
use crate::error::DaemonResult;
use crate::supervisor::Supervisor;

/// The running daemon: owns every long-lived component and drives the tick
/// loop until told to shut down.
pub struct DaemonShell<C: Clock + 'static = SystemClock> {
    supervisor: Arc<Supervisor<C>>,
    command_processor: Arc<CommandProcessor<C>>,
    connections: Arc<ConnectionTracker>,
    store: Arc<dyn StateStoreAdapter>,
    bus: Arc<MessageBus<C>>,
    clock: C,
    daemon_id: ProcessId,
    apps_dir: PathBuf,
    cancel: CancellationToken,
}

impl<C: Clock + 'static> DaemonShell<C> {
    /// Boot order (§4.H): State Store Adapter, Command Processor, Bus,
    /// Supervisor (which self-registers the daemon), then app discovery.
    pub async fn boot(
        store: Arc<dyn StateStoreAdapter>,
        bus: Arc<MessageBus<C>>,
        clock: C,
        apps_dir: PathBuf,
    ) -> DaemonResult<Arc<Self>> {
        let connections = Arc::new(ConnectionTracker::new(config::health_check_interval().as_millis() as u64));
        let supervisor =
            Supervisor::new(Arc::clone(&store), Arc::clone(&bus), Arc::clone(&connections), clock.clone());
        let command_processor =
            Arc::new(CommandProcessor::new(Arc::clone(&supervisor), Arc::clone(&connections), Arc::clone(&bus), clock.clone()));

        let daemon_id = ProcessId::from_string("ghost-daemon");
        connections.register(daemon_id, daemon_metadata(), clock.epoch_ms(), true);
        store.upsert_process(&daemon_process_info(daemon_id)).await?;

        let cancel = CancellationToken::new();
        let shell = Arc::new(Self {
            supervisor,
            command_processor,
            connections,
            store,
            bus,
            clock,
            daemon_id,
            apps_dir,
            cancel,
        });

        tokio::spawn(Arc::clone(&shell.command_processor).run(shell.cancel.clone()));
        shell.bus.spawn_outbox_flush(shell.cancel.clone());
        shell.bus.spawn_connection_monitor(shell.cancel.clone());

        match shell.supervisor.discover(&shell.apps_dir).await {
            Ok(n) => info!(count = n, dir = %shell.apps_dir.display(), "discovered app manifests"),
            Err(e) => warn!(error = %e, "app discovery failed"),
        }

        Ok(shell)
    }

    /// Drive the daemon's maintenance tick (default 1s) and metrics/checkpoint
    /// tick (default 5s) until `shutdown` is called.
    pub async fn run(self: &Arc<Self>) {
        let tick_interval = config::tick_interval();
        let checkpoint_every = (config::checkpoint_interval().as_millis() / tick_interval.as_millis().max(1)).max(1) as u64;
        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(tick_interval) => {}
            }
            ticks += 1;
            self.supervisor.maintenance_tick().await;
            self.sweep_connections().await;
            if ticks % checkpoint_every == 0 {
                self.publish_metrics_tick().await;
            }
        }
    }

    async fn sweep_connections(&self) {
        let now = self.clock.epoch_ms();
        for id in self.connections.sweep(now) {
            warn!(%id, "connection swept as stopped, no heartbeat within timeout");
        }
    }

    /// Every 5s: publish the daemon's own metrics and every running
    /// process's last-known metrics, and checkpoint the daemon's row.
    async fn publish_metrics_tick(&self) {
        let now = self.clock.epoch_ms();
        let daemon_metrics = ghost_core::ProcessMetrics { timestamp: now, ..Default::default() };

        if let Ok(payload) = serde_json::to_vec(&daemon_metrics) {
            let _ = self
                .bus
                .publish(&format!("ghost:metrics:{}", self.daemon_id), payload, ghost_core::Priority::Normal, None, "metrics")
                .await;
        }
        if let Err(e) = self.store.patch_latest_metrics(&self.daemon_id, &daemon_metrics).await {
            warn!(error = %e, "failed to checkpoint daemon metrics");
        }

        match self.supervisor.status_all().await {
            Ok(infos) => {
                for info in infos.iter().filter(|i| i.status == ProcessStatus::Running) {
                    let Some(metrics) = &info.last_metrics else { continue };
                    if let Ok(payload) = serde_json::to_vec(metrics) {
                        let _ = self
                            .bus
                            .publish(
                                &format!("ghost:metrics:{}", info.id()),
                                payload,
                                ghost_core::Priority::Normal,
                                None,
                                "metrics",
                            )
                            .await;
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to snapshot process status for metrics tick"),
        }
    }

    /// Shutdown sequence (§4.H): publish "Stopping", stop every supervised
    /// process with grace, flush the outbox one final time, then cancel
    /// background tasks and let adapters drop.
    pub async fn shutdown(&self) {
        info!("daemon shutting down");
        self.publish_stopping().await;

        let stop_all = async {
            match self.supervisor.status_all().await {
                Ok(infos) => {
                    for info in infos.into_iter().filter(|i| i.status == ProcessStatus::Running) {
                        let id = *info.id();
                        if let Err(e) = self.supervisor.stop(id).await {
                            warn!(%id, error = %e, "failed to stop process during shutdown");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "failed to enumerate processes for shutdown"),
            }
        };
        if tokio::time::timeout(config::drain_timeout(), stop_all).await.is_err() {
            warn!("drain timeout elapsed before every process stopped");
        }

        self.bus.flush_outbox_once().await;
        self.cancel.cancel();
    }

    async fn publish_stopping(&self) {
        let now = self.clock.epoch_ms();
        let event = ghost_core::ProcessEvent::lifecycle(self.daemon_id, ProcessStatus::Stopping, now);
        let _ = self.store.append_event(&event).await;
        if let Ok(payload) = serde_json::to_vec(&event) {
            let _ = self
                .bus
                .publish(&format!("ghost:events:{}", self.daemon_id), payload, ghost_core::Priority::High, None, "lifecycle")
                .await;
        }
    }

    pub fn command_processor(&self) -> &Arc<CommandProcessor<C>> {
        &self.command_processor
    }
}

fn daemon_metadata() -> AppMetadata {
    AppMetadata {
        name: "ghost-daemon".into(),
        kind: "daemon".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        environment: HashMap::new(),
        configuration: HashMap::new(),
    }
}

/// The daemon's own self-registration row, so its checkpoint/metrics have
/// somewhere to land in the state store (§4.H boot order step 4).
fn daemon_process_info(id: ProcessId) -> ProcessInfo {
    let registration = ProcessRegistration {
        id,
        name: "ghost-daemon".into(),
        kind: ProcessType::Daemon,
        version: env!("CARGO_PKG_VERSION").into(),
        executable_path: std::env::current_exe().map(|p| p.display().to_string()).unwrap_or_default(),
        arguments: Vec::new(),
        working_directory: None,
        environment: HashMap::new(),
        configuration: ghost_core::ProcessConfiguration::default(),
    };
    let mut info = ProcessInfo::new(registration);
    info.status = ProcessStatus::Running;
    info
}
