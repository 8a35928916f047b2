// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus envelope: [`Message`], [`MessageId`], and priority-based default TTLs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lexicographically orderable message id: `{unix_ms}:{counter}:{uuid}`.
///
/// The `unix_ms:counter` prefix sorts correctly as a plain string because the
/// millisecond component is zero-padded to a fixed width and the counter is a
/// monotonic per-bus atomic; the trailing uuid only disambiguates a crash/restart
/// during the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(unix_ms: u64, counter: u64, uuid: uuid::Uuid) -> Self {
        Self(format!("{unix_ms:020}:{counter:020}:{uuid}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery priority. Governs the default TTL applied when a publish omits one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

crate::simple_display! {
    Priority {
        Low => "low",
        Normal => "normal",
        High => "high",
        Critical => "critical",
    }
}

impl Priority {
    /// Default TTL per §3: Low 1h, Normal 6h, High 24h, Critical 7d.
    pub fn default_ttl(self) -> Duration {
        match self {
            Priority::Low => Duration::from_secs(60 * 60),
            Priority::Normal => Duration::from_secs(6 * 60 * 60),
            Priority::High => Duration::from_secs(24 * 60 * 60),
            Priority::Critical => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A bus envelope: channel, priority/expiry metadata, and an opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel: String,
    pub priority: Priority,
    pub created_at: u64,
    pub expires_at: u64,
    pub type_tag: String,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    /// Milliseconds remaining before expiry, saturating at zero.
    pub fn remaining_ttl_ms(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_orders_by_timestamp_then_counter() {
        let a = MessageId::new(1_000, 0, uuid::Uuid::nil());
        let b = MessageId::new(1_000, 1, uuid::Uuid::nil());
        let c = MessageId::new(1_001, 0, uuid::Uuid::nil());
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn priority_default_ttls_match_spec() {
        assert_eq!(Priority::Low.default_ttl(), Duration::from_secs(3600));
        assert_eq!(Priority::Critical.default_ttl(), Duration::from_secs(7 * 86400));
    }

    #[test]
    fn expiry_check_is_inclusive_of_now() {
        let msg = Message {
            id: MessageId::new(0, 0, uuid::Uuid::nil()),
            channel: "ghost:commands".into(),
            priority: Priority::Normal,
            created_at: 0,
            expires_at: 1_000,
            type_tag: "t".into(),
            payload: vec![],
        };
        assert!(!msg.is_expired(999));
        assert!(msg.is_expired(1_000));
    }
}
