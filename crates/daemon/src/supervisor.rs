// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process Supervisor: the lifecycle state machine, auto-restart policy,
//! file-watch restart, and discovery (§4.F).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use ghost_bus::MessageBus;
use ghost_core::{
    Clock, EventType, ProcessEvent, ProcessId, ProcessInfo, ProcessRegistration, ProcessStatus,
    ProcessType, SystemClock,
};
use ghost_storage::StateStoreAdapter;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use notify::{RecursiveMode, Watcher};
use parking_lot::{Mutex as SyncMutex, RwLock};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config;
use crate::connection_tracker::ConnectionTracker;
use crate::error::{DaemonError, DaemonResult};

const HEARTBEAT_GRACE: Duration = Duration::from_secs(5);
const RESTART_WINDOW: Duration = Duration::from_secs(5 * 60);
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

struct Entry {
    info: AsyncMutex<ProcessInfo>,
    exited: Arc<Notify>,
}

/// Per-id auto-restart bookkeeping, separate from the persisted `ProcessInfo`
/// so a crash storm doesn't require a store round-trip per attempt.
struct RestartState {
    window_start_ms: u64,
    due_at_ms: u64,
}

/// What `schedule_auto_restart` decided; the caller persists accordingly.
enum AutoRestartOutcome {
    NotConfigured,
    Scheduled,
    Failed,
}

/// Owns the full supervised-process registry. Mutations to one id are
/// serialized by that id's async mutex; discovery and sweeps only ever take
/// the registry's read lock (§5 Shared-resource policy).
pub struct Supervisor<C: Clock + 'static = SystemClock> {
    registry: RwLock<HashMap<ProcessId, Arc<Entry>>>,
    store: Arc<dyn StateStoreAdapter>,
    bus: Arc<MessageBus<C>>,
    connections: Arc<ConnectionTracker>,
    clock: C,
    restart_state: SyncMutex<HashMap<ProcessId, RestartState>>,
    watchers: SyncMutex<HashMap<ProcessId, CancellationToken>>,
}

impl<C: Clock + 'static> Supervisor<C> {
    pub fn new(
        store: Arc<dyn StateStoreAdapter>,
        bus: Arc<MessageBus<C>>,
        connections: Arc<ConnectionTracker>,
        clock: C,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(HashMap::new()),
            store,
            bus,
            connections,
            clock,
            restart_state: SyncMutex::new(HashMap::new()),
            watchers: SyncMutex::new(HashMap::new()),
        })
    }

    fn entry(&self, id: &ProcessId) -> Option<Arc<Entry>> {
        self.registry.read().get(id).cloned()
    }

    /// `(none) --Register--> Stopped`. Registering twice is idempotent: the
    /// existing row's `restart_count` is preserved.
    pub async fn register(self: &Arc<Self>, registration: ProcessRegistration) -> DaemonResult<()> {
        registration.validate().map_err(|e| DaemonError::Malformed(e.to_string()))?;
        let id = registration.id;

        if let Some(existing) = self.entry(&id) {
            let mut info = existing.info.lock().await;
            info.registration = registration;
            self.store.upsert_process(&info).await?;
            return Ok(());
        }

        let prior_restart_count =
            self.store.query_latest(&id).await?.map(|p| p.restart_count).unwrap_or(0);
        let mut info = ProcessInfo::new(registration);
        info.restart_count = prior_restart_count;
        self.store.upsert_process(&info).await?;

        self.registry
            .write()
            .insert(id, Arc::new(Entry { info: AsyncMutex::new(info), exited: Arc::new(Notify::new()) }));
        Ok(())
    }

    /// `Stopped --Start--> Starting --spawn-ok--> Running` / `--spawn-fail--> Failed`.
    pub async fn start(self: &Arc<Self>, id: ProcessId) -> DaemonResult<ProcessInfo> {
        let entry = self.entry(&id).ok_or(DaemonError::NotFound(id))?;
        let mut info = entry.info.lock().await;

        if !info.status.can_transition_to(ProcessStatus::Starting) {
            return Err(DaemonError::IllegalTransition(id, info.status, ProcessStatus::Starting));
        }
        self.transition(&mut info, ProcessStatus::Starting).await?;

        match self.spawn(&info, Arc::clone(&entry)).await {
            Ok(pid) => {
                info.os_pid = Some(pid);
                info.started_at = Some(self.clock.epoch_ms());

                // Starting -> Running once the process has survived the
                // initial grace window; an immediate exit surfaces as a
                // spawn failure instead (the reaper task would otherwise
                // race this transition to Crashed).
                tokio::select! {
                    _ = entry.exited.notified() => {
                        self.transition(&mut info, ProcessStatus::Failed).await?;
                        return Err(DaemonError::SpawnFailed(id, "process exited immediately after spawn".into()));
                    }
                    _ = tokio::time::sleep(HEARTBEAT_GRACE) => {}
                }

                self.transition(&mut info, ProcessStatus::Running).await?;
                if info.registration.configuration.watch {
                    self.spawn_watcher(id, info.registration.working_directory.clone());
                }
                Ok(info.clone())
            }
            Err(e) => {
                self.transition(&mut info, ProcessStatus::Failed).await?;
                Err(DaemonError::SpawnFailed(id, e.to_string()))
            }
        }
    }

    /// `Running --Stop--> Stopping --exit--> Stopped`.
    pub async fn stop(self: &Arc<Self>, id: ProcessId) -> DaemonResult<ProcessInfo> {
        let entry = self.entry(&id).ok_or(DaemonError::NotFound(id))?;
        let mut info = entry.info.lock().await;

        if info.status != ProcessStatus::Running && info.status != ProcessStatus::Warning {
            if info.status == ProcessStatus::Stopped {
                return Ok(info.clone());
            }
            return Err(DaemonError::IllegalTransition(id, info.status, ProcessStatus::Stopping));
        }
        self.transition(&mut info, ProcessStatus::Stopping).await?;
        self.cancel_watcher(&id);

        if let Some(pid) = info.os_pid {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            let grace = tokio::time::timeout(config::grace_period(), entry.exited.notified()).await;
            if grace.is_err() {
                warn!(%id, "grace period elapsed without exit, force-killing");
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                entry.exited.notified().await;
            }
        }

        info.os_pid = None;
        self.transition(&mut info, ProcessStatus::Stopped).await?;
        Ok(info.clone())
    }

    /// `Restart(id)`: Stop then Start, ignoring a not-running Stop.
    pub async fn restart(self: &Arc<Self>, id: ProcessId) -> DaemonResult<ProcessInfo> {
        match self.stop(id).await {
            Ok(_) | Err(DaemonError::IllegalTransition(..)) => {}
            Err(e) => return Err(e),
        }
        self.start(id).await
    }

    /// `run` command: build a one-shot registration and Register+Start it.
    pub async fn run_one_shot(self: &Arc<Self>, registration: ProcessRegistration) -> DaemonResult<ProcessInfo> {
        let id = registration.id;
        self.register(registration).await?;
        self.start(id).await
    }

    pub fn process_count(&self) -> usize {
        self.registry.read().len()
    }

    pub async fn status(&self, id: &ProcessId) -> DaemonResult<ProcessInfo> {
        let entry = self.entry(id).ok_or(DaemonError::NotFound(*id))?;
        Ok(entry.info.lock().await.clone())
    }

    pub async fn status_all(&self) -> DaemonResult<Vec<ProcessInfo>> {
        let entries: Vec<Arc<Entry>> = self.registry.read().values().cloned().collect();
        let mut infos = Vec::with_capacity(entries.len());
        for entry in entries {
            infos.push(entry.info.lock().await.clone());
        }
        Ok(infos)
    }

    async fn transition(&self, info: &mut ProcessInfo, next: ProcessStatus) -> DaemonResult<()> {
        let id = *info.id();
        let now = self.clock.epoch_ms();

        let mut attempts = 0;
        loop {
            match self.store.update_status(&id, next, now).await {
                Ok(()) => break,
                Err(e) if attempts < 2 => {
                    attempts += 1;
                    warn!(%id, error = %e, attempt = attempts, "update_status failed, retrying");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        info.status = next;

        let event = ProcessEvent::lifecycle(id, next, now);
        if let Err(e) = self.store.append_event(&event).await {
            warn!(%id, error = %e, "failed to append lifecycle event");
        }
        self.connections.touch(&id, now, info.last_metrics.clone());
        self.publish_event(&event).await;
        Ok(())
    }

    async fn publish_event(&self, event: &ProcessEvent) {
        let Ok(payload) = serde_json::to_vec(event) else { return };
        let channel = format!("ghost:events:{}", event.process_id);
        if let Err(e) = self.bus.publish(&channel, payload, ghost_core::Priority::High, None, "lifecycle").await {
            warn!(error = %e, channel, "failed to publish lifecycle event");
        }
    }

    async fn spawn(self: &Arc<Self>, info: &ProcessInfo, entry: Arc<Entry>) -> DaemonResult<u32> {
        let reg = &info.registration;
        let mut command = tokio::process::Command::new(&reg.executable_path);
        command.args(&reg.arguments);
        command.envs(reg.effective_environment());
        if let Some(dir) = &reg.working_directory {
            command.current_dir(dir);
        }
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(false);

        let mut child = command.spawn().map_err(|e| DaemonError::SpawnFailed(reg.id, e.to_string()))?;
        let pid = child.id().ok_or_else(|| DaemonError::SpawnFailed(reg.id, "no pid after spawn".into()))?;

        if let Some(stdout) = child.stdout.take() {
            self.spawn_log_reader(reg.id, stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_log_reader(reg.id, stderr, "stderr");
        }

        let this = Arc::clone(self);
        let id = reg.id;
        tokio::spawn(async move {
            let status = child.wait().await;
            entry.exited.notify_waiters();
            let mut info = entry.info.lock().await;
            // Start()/Stop() already drive every exit they caused themselves
            // to its terminal status before releasing this lock; only an
            // exit that happens while steady-state Running is this reaper's
            // job to classify.
            if info.status != ProcessStatus::Running {
                return;
            }
            let exit_code = status.ok().and_then(|s| s.code());
            info.last_exit_code = exit_code;
            let now = this.clock.epoch_ms();
            let mut target = if exit_code == Some(0) && info.registration.configuration.app_type
                == ghost_core::AppType::OneShot
            {
                ProcessStatus::Stopped
            } else {
                ProcessStatus::Crashed
            };
            if target == ProcessStatus::Crashed
                && matches!(this.schedule_auto_restart(&id, &mut info, now), AutoRestartOutcome::Failed)
            {
                target = ProcessStatus::Failed;
            }
            if let Err(e) = this.store.update_status(&id, target, now).await {
                warn!(%id, error = %e, "failed to persist crash status");
            }
            info.status = target;
            let event = ProcessEvent::lifecycle(id, target, now);
            let _ = this.store.append_event(&event).await;
            if let Ok(payload) = serde_json::to_vec(&event) {
                let _ = this
                    .bus
                    .publish(&format!("ghost:events:{id}"), payload, ghost_core::Priority::High, None, "lifecycle")
                    .await;
            }
        });

        Ok(pid)
    }

    fn spawn_log_reader(&self, id: ProcessId, pipe: impl tokio::io::AsyncRead + Unpin + Send + 'static, stream: &'static str) {
        let store = Arc::clone(&self.store);
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let event = ProcessEvent {
                    process_id: id,
                    event_type: EventType::Log,
                    payload: format!("[{stream}] {line}").into_bytes(),
                    timestamp: clock.epoch_ms(),
                };
                if let Err(e) = store.append_event(&event).await {
                    debug!(%id, error = %e, "failed to append log event");
                }
            }
        });
    }

    fn spawn_watcher(self: &Arc<Self>, id: ProcessId, working_directory: Option<String>) {
        let Some(dir) = working_directory else { return };
        let cancel = CancellationToken::new();
        self.watchers.lock().insert(id, cancel.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            }) {
                Ok(w) => w,
                Err(e) => {
                    warn!(%id, error = %e, "failed to create file watcher");
                    return;
                }
            };
            if watcher.watch(std::path::Path::new(&dir), RecursiveMode::Recursive).is_err() {
                warn!(%id, dir, "failed to watch working directory");
                return;
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = rx.recv() => {
                        if event.is_none() {
                            return;
                        }
                        // Debounce: drain any further events that land within
                        // WATCH_DEBOUNCE before acting, coalescing bursts.
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(WATCH_DEBOUNCE) => {}
                        }
                        while rx.try_recv().is_ok() {}
                        info!(%id, "file change detected, restarting");
                        if let Err(e) = this.restart(id).await {
                            warn!(%id, error = %e, "watch-triggered restart failed");
                        }
                    }
                }
            }
        });
    }

    fn cancel_watcher(&self, id: &ProcessId) {
        if let Some(token) = self.watchers.lock().remove(id) {
            token.cancel();
        }
    }

    /// Scan `dir` for `*.json` manifests and register each, preserving
    /// `restart_count` for already-known ids (§4.F Discovery).
    pub async fn discover(self: &Arc<Self>, dir: &std::path::Path) -> DaemonResult<usize> {
        let mut count = 0;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else { continue };
            let Ok(registration) = serde_json::from_slice::<ProcessRegistration>(&bytes) else {
                warn!(path = %path.display(), "skipping unparsable manifest");
                continue;
            };
            self.register(registration).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Every tick: fire due auto-restarts, sweep OS-dead processes (§4.F MaintenanceTick).
    pub async fn maintenance_tick(self: &Arc<Self>) {
        let now = self.clock.epoch_ms();
        let due: Vec<ProcessId> = {
            let states = self.restart_state.lock();
            states.iter().filter(|(_, s)| s.due_at_ms <= now).map(|(id, _)| *id).collect()
        };
        for id in due {
            self.restart_state.lock().remove(&id);
            if let Err(e) = self.start(id).await {
                warn!(%id, error = %e, "scheduled auto-restart failed");
            }
        }

        let ids: Vec<ProcessId> = self.registry.read().keys().copied().collect();
        for id in ids {
            self.sweep_one(id, now).await;
        }
    }

    async fn sweep_one(self: &Arc<Self>, id: ProcessId, now: u64) {
        let Some(entry) = self.entry(&id) else { return };
        let mut info = entry.info.lock().await;
        if info.status != ProcessStatus::Running {
            return;
        }
        let Some(pid) = info.os_pid else { return };
        if kill(Pid::from_raw(pid as i32), None).is_ok() {
            return;
        }
        warn!(%id, pid, "orphaned process no longer exists, marking crashed");
        info.os_pid = None;
        let mut status = ProcessStatus::Crashed;
        if matches!(self.schedule_auto_restart(&id, &mut info, now), AutoRestartOutcome::Failed) {
            status = ProcessStatus::Failed;
        }
        info.status = status;
        if let Err(e) = self.store.update_status(&id, status, now).await {
            warn!(%id, error = %e, "failed to persist crash status");
        }
        let event = ProcessEvent::lifecycle(id, status, now);
        let _ = self.store.append_event(&event).await;
        if let Ok(payload) = serde_json::to_vec(&event) {
            let _ = self
                .bus
                .publish(&format!("ghost:events:{id}"), payload, ghost_core::Priority::High, None, "lifecycle")
                .await;
        }
    }

    /// Called after a crash lands; schedules the next attempt per §4.F's
    /// backoff/jitter policy if `autoRestart` is set and attempts remain.
    /// Persistence of a resulting `Failed` status is the caller's job, since
    /// both callers already hold the process's info lock and need to publish
    /// a single lifecycle event for whichever status actually sticks.
    fn schedule_auto_restart(&self, id: &ProcessId, info: &mut ProcessInfo, now: u64) -> AutoRestartOutcome {
        let cfg = &info.registration.configuration;
        if !cfg.auto_restart {
            return AutoRestartOutcome::NotConfigured;
        }

        let mut states = self.restart_state.lock();
        let state = states.entry(*id).or_insert(RestartState { window_start_ms: now, due_at_ms: 0 });
        if now.saturating_sub(state.window_start_ms) > RESTART_WINDOW.as_millis() as u64 {
            state.window_start_ms = now;
            info.restart_count = 0;
        }
        info.restart_count += 1;

        if cfg.max_restart_attempts > 0 && info.restart_count >= cfg.max_restart_attempts {
            states.remove(id);
            return AutoRestartOutcome::Failed;
        }

        let delay = restart_delay(info.restart_count, cfg.restart_delay_ms);
        state.due_at_ms = now + delay.as_millis() as u64;
        AutoRestartOutcome::Scheduled
    }
}

/// `min(30s, restartDelayMs * 2^(restartCount-1)) * jitter`, `jitter` uniform in [0.75, 1.25].
fn restart_delay(restart_count: u32, restart_delay_ms: u64) -> Duration {
    let exp = restart_count.saturating_sub(1).min(20);
    let base_ms = restart_delay_ms.saturating_mul(1u64 << exp).min(30_000);
    let jitter = rand::rng().random_range(0.75..=1.25);
    Duration::from_millis((base_ms as f64 * jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_delay_is_capped_at_30s_before_jitter() {
        let d = restart_delay(10, 1_000);
        assert!(d.as_millis() <= (30_000.0 * 1.25) as u128);
    }

    #[test]
    fn restart_delay_grows_exponentially() {
        let d1 = restart_delay(1, 1_000).as_millis() as f64;
        let d2 = restart_delay(2, 1_000).as_millis() as f64;
        assert!(d2 > d1 * 1.3, "expected roughly doubling growth: {d1} -> {d2}");
    }
}
