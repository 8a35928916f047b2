// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios exercised against real crate wiring, in-process
//! transport/storage doubles standing in for Redis and a real database.

use std::sync::Arc;
use std::time::Duration;

use ghost_bus::{InMemoryOutbox, InMemoryTransport, MessageBus};
use ghost_core::test_support::{auto_restart_registration, service_registration};
use ghost_core::{EventType, FakeClock, Priority, ProcessId, ProcessStatus};
use ghost_daemon::{CommandProcessor, ConnectionTracker, Supervisor};
use ghost_storage::InMemoryStateStore;
use ghost_wire::{CommandResponse, CommandType, SystemCommand};

fn in_memory_bus(clock: FakeClock) -> (Arc<MessageBus<FakeClock>>, Arc<InMemoryTransport>) {
    let transport = Arc::new(InMemoryTransport::new());
    let outbox = Arc::new(InMemoryOutbox::new());
    (MessageBus::new(transport.clone(), Some(outbox), clock), transport)
}

fn supervisor(
    clock: FakeClock,
    bus: &Arc<MessageBus<FakeClock>>,
) -> (Arc<Supervisor<FakeClock>>, Arc<InMemoryStateStore>) {
    let store = Arc::new(InMemoryStateStore::new());
    let connections = Arc::new(ConnectionTracker::new(30_000));
    let supervisor = Supervisor::new(store.clone(), Arc::clone(bus), connections, clock);
    (supervisor, store)
}

/// Scenario 1: register then start brings a process to Running with exactly
/// one `Starting` and one `Running` lifecycle event.
#[tokio::test]
async fn register_and_start_reaches_running_with_two_lifecycle_events() {
    let clock = FakeClock::new();
    let (bus, _transport) = in_memory_bus(clock.clone());
    let (supervisor, store) = supervisor(clock, &bus);

    let registration = service_registration("svc-1", "/bin/sleep");
    let mut registration = registration;
    registration.arguments = vec!["30".to_string()];

    supervisor.register(registration).await.unwrap();
    let info = supervisor.start(ProcessId::from_string("svc-1")).await.unwrap();
    assert_eq!(info.status, ProcessStatus::Running);

    let events = store.query_events(&ProcessId::from_string("svc-1"), None).await.unwrap();
    let lifecycle: Vec<_> = events.into_iter().filter(|e| e.event_type == EventType::Lifecycle).collect();
    assert_eq!(lifecycle.len(), 2, "expected exactly Starting then Running");
    assert_eq!(lifecycle[0].payload, b"starting");
    assert_eq!(lifecycle[1].payload, b"running");

    supervisor.stop(ProcessId::from_string("svc-1")).await.unwrap();
}

/// Starts `id`, fast-forwarding tokio's paused virtual clock past the
/// Starting->Running grace window without actually waiting on it.
async fn start_past_grace(
    supervisor: &Arc<Supervisor<FakeClock>>,
    id: ProcessId,
) -> ghost_core::ProcessInfo {
    let supervisor = Arc::clone(supervisor);
    let handle = tokio::spawn(async move { supervisor.start(id).await });
    tokio::time::advance(Duration::from_secs(6)).await;
    handle.await.unwrap().unwrap()
}

/// Polls `status` until it matches `want`. The reaper task that observes a
/// real child exit is IO-driven, not timer-driven, so it keeps making
/// progress even while tokio's virtual clock is paused.
async fn wait_for_status(
    supervisor: &Arc<Supervisor<FakeClock>>,
    id: ProcessId,
    want: ProcessStatus,
) -> ghost_core::ProcessInfo {
    for _ in 0..500 {
        let info = supervisor.status(&id).await.unwrap();
        if info.status == want {
            return info;
        }
        tokio::task::yield_now().await;
    }
    panic!("status for {id} never reached {want:?}");
}

/// Scenario 2: repeated crashes of an auto-restart service schedule backoff
/// delays that grow exponentially and stop after `maxRestartAttempts`.
#[tokio::test]
async fn auto_restart_backoff_fails_after_max_attempts() {
    tokio::time::pause();
    let clock = FakeClock::new();
    let (bus, _transport) = in_memory_bus(clock.clone());
    let (supervisor, store) = supervisor(clock.clone(), &bus);

    let id = ProcessId::from_string("svc-2");
    let registration = auto_restart_registration("svc-2", "/bin/sleep", 2, 100);
    let mut registration = registration;
    registration.arguments = vec!["300".to_string()];
    supervisor.register(registration).await.unwrap();

    // Reach Running, then kill the OS process externally (first crash). The
    // spawn reaper (not `maintenance_tick`) is what observes a `Running`
    // process's exit and classifies it, scheduling the next attempt itself.
    let info = start_past_grace(&supervisor, id).await;
    assert_eq!(info.status, ProcessStatus::Running);
    let pid = info.os_pid.expect("running process has a pid");
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGKILL).unwrap();

    let info = wait_for_status(&supervisor, id, ProcessStatus::Crashed).await;
    assert_eq!(info.restart_count, 1);

    // Backoff for restart_count=1 is 100ms * jitter(0.75..=1.25); advancing
    // past the jitter ceiling guarantees the scheduled restart is due, and
    // `maintenance_tick` is what notices a due restart and calls `start`.
    clock.advance(Duration::from_millis(200));
    start_past_grace_via_tick(&supervisor).await;
    let info = wait_for_status(&supervisor, id, ProcessStatus::Running).await;
    let pid = info.os_pid.expect("running process has a pid");
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGKILL).unwrap();

    // Second crash pushes restart_count to 2, meeting maxRestartAttempts: the
    // reaper lands directly on Failed, never observably Crashed.
    let info = wait_for_status(&supervisor, id, ProcessStatus::Failed).await;
    assert_eq!(info.restart_count, 2);

    // The Failed transition is persisted, not just held in memory: one
    // lifecycle event per Running exit, each landing on its eventual status,
    // so the first crash is recorded as Crashed and only the second (which
    // exhausts maxRestartAttempts) lands on Failed.
    let events = store.query_events(&id, None).await.unwrap();
    let lifecycle: Vec<_> =
        events.into_iter().filter(|e| e.event_type == EventType::Lifecycle).collect();
    assert_eq!(lifecycle.last().unwrap().payload, b"failed");
    assert_eq!(lifecycle.iter().filter(|e| e.payload == b"crashed").count(), 1);

    // No further restart is scheduled once Failed.
    clock.advance(Duration::from_secs(10));
    supervisor.maintenance_tick().await;
    let info = supervisor.status(&id).await.unwrap();
    assert_eq!(info.status, ProcessStatus::Failed);
}

/// `maintenance_tick` itself calls `start` for any process whose restart is
/// due; that `start` call waits out the same grace window, so this advances
/// tokio's paused clock around the tick the same way `start_past_grace` does
/// for a direct call.
async fn start_past_grace_via_tick(supervisor: &Arc<Supervisor<FakeClock>>) {
    let supervisor = Arc::clone(supervisor);
    let handle = tokio::spawn(async move { supervisor.maintenance_tick().await });
    tokio::time::advance(Duration::from_secs(6)).await;
    handle.await.unwrap();
}

/// Scenario 3: publishes accepted while the transport is down land in the
/// outbox; once the transport comes back, a manual flush drains them in
/// ascending id order.
#[tokio::test]
async fn bus_degradation_queues_to_outbox_and_flushes_on_recovery() {
    let clock = FakeClock::new();
    let transport = Arc::new(InMemoryTransport::new());
    let outbox = Arc::new(InMemoryOutbox::new());
    let bus = MessageBus::new(transport.clone(), Some(outbox), clock);

    transport.set_down(true);
    for i in 0..10 {
        bus.publish("ghost:commands", format!("msg-{i}").into_bytes(), Priority::Normal, None, "t")
            .await
            .unwrap();
    }

    let diagnostics = bus.diagnostics().await;
    assert_eq!(diagnostics.pending_outbox_size, 10);

    transport.set_down(false);
    tokio::time::pause();
    let cancel = tokio_util::sync::CancellationToken::new();
    bus.spawn_outbox_flush(cancel.clone());
    tokio::time::advance(Duration::from_secs(31)).await;
    // Let the spawned flush task run to completion under the advanced clock.
    tokio::task::yield_now().await;

    let diagnostics = bus.diagnostics().await;
    assert_eq!(diagnostics.pending_outbox_size, 0, "all ten records should have flushed");
    cancel.cancel();
}

/// Scenario 4: a wildcard subscription catches up on the last message of
/// every currently-matching channel before any new publish arrives.
#[tokio::test]
async fn wildcard_subscription_catches_up_on_existing_channels() {
    let clock = FakeClock::new();
    let (bus, _transport) = in_memory_bus(clock);

    bus.publish("ghost:metrics:a", b"a-1".to_vec(), Priority::Normal, None, "metrics").await.unwrap();
    bus.publish("ghost:metrics:b", b"b-1".to_vec(), Priority::Normal, None, "metrics").await.unwrap();

    let mut sub = bus.subscribe("ghost:metrics:*").await.unwrap();
    let first = sub.receiver.recv().await.unwrap();
    let second = sub.receiver.recv().await.unwrap();
    let mut payloads = vec![first.payload, second.payload];
    payloads.sort();
    assert_eq!(payloads, vec![b"a-1".to_vec(), b"b-1".to_vec()]);
}

/// Scenario 5: a command targeting an unknown process fails fast with a
/// not-found error rather than timing out.
#[tokio::test]
async fn start_unknown_process_fails_fast_with_not_found() {
    let clock = FakeClock::new();
    let (bus, _transport) = in_memory_bus(clock.clone());
    let (supervisor, _store) = supervisor(clock.clone(), &bus);
    let connections = Arc::new(ConnectionTracker::new(30_000));
    let processor = Arc::new(CommandProcessor::new(supervisor, connections, Arc::clone(&bus), clock));

    let mut responses = bus.subscribe("ghost:responses").await.unwrap();
    let command = SystemCommand {
        command_id: "cmd-missing".into(),
        command_type: CommandType::Start,
        target_process_id: Some(ProcessId::from_string("does-not-exist")),
        parameters: Default::default(),
        data: None,
    };
    bus.publish("ghost:commands", command.encode(), Priority::Normal, None, "command").await.unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let run_handle = tokio::spawn(Arc::clone(&processor).run(cancel.clone()));

    let response = tokio::time::timeout(Duration::from_secs(1), responses.receiver.recv())
        .await
        .expect("response within 1s")
        .expect("response channel still open");
    let response = CommandResponse::decode(&response.payload).unwrap();
    assert!(!response.success);
    assert!(response.error.unwrap().to_lowercase().contains("not found"));

    cancel.cancel();
    let _ = run_handle.await;
}

/// Scenario 6: a connection that stops heartbeating is marked Unhealthy
/// after 2x the health-check interval, then Stopped after 5x.
#[tokio::test]
async fn heartbeat_eviction_marks_unhealthy_then_stopped() {
    let interval_ms = 30_000;
    let tracker = ConnectionTracker::new(interval_ms);
    let id = ProcessId::from_string("app-1");
    let metadata = ghost_core::AppMetadata {
        name: "app".into(),
        kind: "app".into(),
        version: "1.0".into(),
        environment: Default::default(),
        configuration: Default::default(),
    };
    tracker.register(id, metadata, 0, false);
    tracker.touch(&id, 0, None);

    let stopped = tracker.sweep(2 * interval_ms + 1);
    assert!(stopped.is_empty());
    assert_eq!(tracker.get(&id).unwrap().status, ghost_core::ConnectionStatus::Unhealthy);

    let stopped = tracker.sweep(5 * interval_ms + 1);
    assert_eq!(stopped, vec![id]);
    assert_eq!(tracker.get(&id).unwrap().status, ghost_core::ConnectionStatus::Stopped);
}
