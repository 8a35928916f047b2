// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`StateStoreAdapter`] reference implementation.
//!
//! Concrete DB drivers are external collaborators (see the adapter contract
//! docs); this implementation exists so the daemon and its tests have a
//! working adapter without a database dependency.

use std::collections::HashMap;

use async_trait::async_trait;
use ghost_core::{ProcessEvent, ProcessId, ProcessInfo, ProcessMetrics, ProcessStatus};
use parking_lot::Mutex;

use crate::adapter::StateStoreAdapter;
use crate::error::{StorageError, StorageResult};

#[derive(Default)]
struct Inner {
    processes: HashMap<ProcessId, ProcessInfo>,
    events: HashMap<ProcessId, Vec<ProcessEvent>>,
}

/// Single-process, mutex-guarded [`StateStoreAdapter`]. Not durable across restarts.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStoreAdapter for InMemoryStateStore {
    async fn upsert_process(&self, info: &ProcessInfo) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.processes.insert(*info.id(), info.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: &ProcessId,
        status: ProcessStatus,
        timestamp: u64,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .processes
            .get_mut(id)
            .ok_or_else(|| StorageError::NoSuchRow(id.to_string()))?;
        entry.status = status;
        entry.last_heartbeat = Some(timestamp);
        Ok(())
    }

    async fn append_event(&self, event: &ProcessEvent) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.events.entry(event.process_id).or_default().push(event.clone());
        Ok(())
    }

    async fn patch_latest_metrics(
        &self,
        id: &ProcessId,
        metrics: &ProcessMetrics,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .processes
            .get_mut(id)
            .ok_or_else(|| StorageError::NoSuchRow(id.to_string()))?;
        entry.last_metrics = Some(metrics.clone());
        Ok(())
    }

    async fn query_latest(&self, id: &ProcessId) -> StorageResult<Option<ProcessInfo>> {
        Ok(self.inner.lock().processes.get(id).cloned())
    }

    async fn query_active(&self) -> StorageResult<Vec<ProcessInfo>> {
        Ok(self
            .inner
            .lock()
            .processes
            .values()
            .filter(|p| p.status != ProcessStatus::Stopped)
            .cloned()
            .collect())
    }

    async fn query_events(
        &self,
        id: &ProcessId,
        since: Option<u64>,
    ) -> StorageResult<Vec<ProcessEvent>> {
        let inner = self.inner.lock();
        let events = inner.events.get(id).cloned().unwrap_or_default();
        Ok(match since {
            Some(ts) => events.into_iter().filter(|e| e.timestamp >= ts).collect(),
            None => events,
        })
    }
}

#[cfg(test)]
mod tests {
    use ghost_core::test_support::service_registration;
    use ghost_core::{EventType, ProcessEvent, ProcessInfo};

    use super::*;

    #[tokio::test]
    async fn upsert_then_query_latest_round_trips() {
        let store = InMemoryStateStore::new();
        let info = ProcessInfo::new(service_registration("proc-1", "/bin/sleep"));
        store.upsert_process(&info).await.unwrap();

        let fetched = store.query_latest(info.id()).await.unwrap().unwrap();
        assert_eq!(fetched.registration.id, info.registration.id);
    }

    #[tokio::test]
    async fn update_status_rejects_missing_row() {
        let store = InMemoryStateStore::new();
        let id = ProcessId::new();
        let err = store.update_status(&id, ProcessStatus::Running, 0).await.unwrap_err();
        assert!(matches!(err, StorageError::NoSuchRow(_)));
    }

    #[tokio::test]
    async fn query_active_excludes_stopped() {
        let store = InMemoryStateStore::new();
        let mut info = ProcessInfo::new(service_registration("proc-1", "/bin/sleep"));
        info.status = ProcessStatus::Stopped;
        store.upsert_process(&info).await.unwrap();
        assert!(store.query_active().await.unwrap().is_empty());

        info.status = ProcessStatus::Running;
        store.upsert_process(&info).await.unwrap();
        assert_eq!(store.query_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_events_filters_by_since() {
        let store = InMemoryStateStore::new();
        let id = ProcessId::new();
        store.append_event(&ProcessEvent::lifecycle(id, "starting", 10)).await.unwrap();
        store.append_event(&ProcessEvent::lifecycle(id, "running", 20)).await.unwrap();

        let all = store.query_events(&id, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let recent = store.query_events(&id, Some(15)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event_type, EventType::Lifecycle);
    }
}
