// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-process metrics snapshot, reported by the app runtime hook.

use serde::{Deserialize, Serialize};

/// A point-in-time resource snapshot for a managed process.
///
/// Exposes absolute memory bytes rather than a percentage: a percentage
/// requires knowing total system memory, which isn't available here. Callers
/// who want a percentage should divide by total system memory themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub thread_count: u32,
    pub gc_collections: u64,
    pub gc_heap_bytes: u64,
    pub handle_count: u32,
    pub timestamp: u64,
}
