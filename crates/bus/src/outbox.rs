// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local-persistence fallback queue used while the remote transport is down (§4.B).

use std::collections::HashMap;

use async_trait::async_trait;
use ghost_core::Message;
use parking_lot::Mutex;

/// A durable (here: in-process) queue of [`Message`] records.
///
/// At-least-once redelivery after a crash, no cross-channel ordering
/// guarantee, monotonic order within a channel (messages are stored and
/// drained in `Id` order, and `Id` is monotonic per channel by construction).
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn store(&self, msg: Message);

    /// Up to `batch` unprocessed messages, oldest-first.
    async fn get_pending(&self, batch: usize) -> Vec<Message>;

    async fn mark_processed(&self, id: &str);

    async fn get_by_channel_pattern(&self, pattern: &crate::pattern::ChannelPattern) -> Vec<Message>;

    /// Remove records whose `expires_at` is before `now_ms`.
    async fn cleanup_expired(&self, now_ms: u64);
}

struct Record {
    message: Message,
    processed: bool,
}

/// In-process [`Outbox`]. Not durable across process restarts — a production
/// deployment would back this with an append-only file or embedded database;
/// this crate only defines the contract plus a working reference.
#[derive(Default)]
pub struct InMemoryOutbox {
    // Keyed by Id, but iteration order must stay insertion order (oldest first),
    // so keep a parallel Vec of ids alongside the map.
    records: Mutex<(Vec<String>, HashMap<String, Record>)>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self { records: Mutex::new((Vec::new(), HashMap::new())) }
    }
}

#[async_trait]
impl Outbox for InMemoryOutbox {
    async fn store(&self, msg: Message) {
        let mut guard = self.records.lock();
        let id = msg.id.as_str().to_string();
        if !guard.1.contains_key(&id) {
            guard.0.push(id.clone());
        }
        guard.1.insert(id, Record { message: msg, processed: false });
    }

    async fn get_pending(&self, batch: usize) -> Vec<Message> {
        let guard = self.records.lock();
        guard
            .0
            .iter()
            .filter_map(|id| guard.1.get(id))
            .filter(|r| !r.processed)
            .take(batch)
            .map(|r| r.message.clone())
            .collect()
    }

    async fn mark_processed(&self, id: &str) {
        if let Some(record) = self.records.lock().1.get_mut(id) {
            record.processed = true;
        }
    }

    async fn get_by_channel_pattern(&self, pattern: &crate::pattern::ChannelPattern) -> Vec<Message> {
        let guard = self.records.lock();
        guard
            .0
            .iter()
            .filter_map(|id| guard.1.get(id))
            .filter(|r| pattern.matches(&r.message.channel))
            .map(|r| r.message.clone())
            .collect()
    }

    async fn cleanup_expired(&self, now_ms: u64) {
        let mut guard = self.records.lock();
        let (ids, records) = &mut *guard;
        ids.retain(|id| match records.get(id) {
            Some(r) if r.message.expires_at < now_ms => {
                records.remove(id);
                false
            }
            _ => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use ghost_core::{MessageId, Priority};

    use super::*;

    fn msg(id: &str, channel: &str, expires_at: u64) -> Message {
        Message {
            id: MessageId(id.to_string()),
            channel: channel.to_string(),
            priority: Priority::Normal,
            created_at: 0,
            expires_at,
            type_tag: "t".into(),
            payload: vec![],
        }
    }

    #[tokio::test]
    async fn pending_returns_oldest_first_and_excludes_processed() {
        let outbox = InMemoryOutbox::new();
        outbox.store(msg("1", "ch", 1_000)).await;
        outbox.store(msg("2", "ch", 1_000)).await;
        outbox.mark_processed("1").await;

        let pending = outbox.get_pending(10).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id.as_str(), "2");
    }

    #[tokio::test]
    async fn cleanup_expired_removes_only_expired_records() {
        let outbox = InMemoryOutbox::new();
        outbox.store(msg("1", "ch", 500)).await;
        outbox.store(msg("2", "ch", 2_000)).await;

        outbox.cleanup_expired(1_000).await;
        let remaining = outbox.get_pending(10).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.as_str(), "2");
    }

    #[tokio::test]
    async fn get_by_channel_pattern_filters_by_match() {
        let outbox = InMemoryOutbox::new();
        outbox.store(msg("1", "ghost:metrics:a", 1_000)).await;
        outbox.store(msg("2", "ghost:commands", 1_000)).await;

        let matches = outbox
            .get_by_channel_pattern(&crate::pattern::ChannelPattern::new("ghost:metrics:*"))
            .await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id.as_str(), "1");
    }
}
