// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The State Store Adapter contract.
//!
//! Concrete database drivers (Postgres/SQLite/etc.) are out of scope here —
//! this module defines the trait every such driver must satisfy, plus an
//! in-memory reference implementation used by the daemon in tests and by
//! single-host deployments with no durability requirement.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use ghost_core::{ProcessEvent, ProcessId, ProcessInfo, ProcessMetrics, ProcessStatus};

use crate::error::StorageResult;

/// A unit of work run by [`StateStoreAdapter::with_transaction`]. Boxed so the
/// adapter trait stays object-safe — callers build one from an async block.
pub type TransactionBody<'a> =
    Box<dyn FnOnce(&'a dyn StateStoreAdapter) -> BoxFuture<'a, StorageResult<()>> + Send + 'a>;

/// Persistence contract for process registrations, lifecycle events, and metrics.
///
/// Implementations must make `update_status` conditional on the row already
/// existing (§4.E) and must retry transient backend errors themselves —
/// callers treat any `Err` as terminal for that call.
#[async_trait]
pub trait StateStoreAdapter: Send + Sync {
    /// Insert or fully replace the row for `info.id()`.
    async fn upsert_process(&self, info: &ProcessInfo) -> StorageResult<()>;

    /// Update `status`/`updated_at` for an existing row. Fails with
    /// [`crate::StorageError::NoSuchRow`] if the row was never upserted.
    async fn update_status(
        &self,
        id: &ProcessId,
        status: ProcessStatus,
        timestamp: u64,
    ) -> StorageResult<()>;

    /// Append a lifecycle/metrics/log/error event for `id`.
    async fn append_event(&self, event: &ProcessEvent) -> StorageResult<()>;

    /// Overwrite only `last_metrics` on an existing row, leaving status untouched.
    async fn patch_latest_metrics(
        &self,
        id: &ProcessId,
        metrics: &ProcessMetrics,
    ) -> StorageResult<()>;

    /// Fetch the current row for `id`, if any.
    async fn query_latest(&self, id: &ProcessId) -> StorageResult<Option<ProcessInfo>>;

    /// Fetch every row whose status is not `Stopped`.
    async fn query_active(&self) -> StorageResult<Vec<ProcessInfo>>;

    /// Fetch events for `id`, optionally only those at or after `since` (unix ms).
    async fn query_events(
        &self,
        id: &ProcessId,
        since: Option<u64>,
    ) -> StorageResult<Vec<ProcessEvent>>;

    /// Run `body` with exclusive access to this adapter's backing store.
    ///
    /// The in-memory adapter implements this by holding its single mutex for
    /// the duration of `body`; a SQL-backed adapter would wrap `body` in a
    /// real `BEGIN`/`COMMIT`. Either way, other callers see either all of
    /// `body`'s writes or none of them.
    async fn with_transaction<'a>(&'a self, body: TransactionBody<'a>) -> StorageResult<()> {
        body(self).await
    }
}
