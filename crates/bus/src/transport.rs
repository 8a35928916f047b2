// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The remote transport the circuit breaker gates and the bus publishes
//! through. [`RedisTransport`] is the production implementation; in-process
//! tests use [`InMemoryTransport`] so bus logic can be exercised without a
//! running Redis instance.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::{broadcast, mpsc};

use crate::error::{BusError, BusResult};

/// Minimal key/value + pub/sub surface the bus needs from its remote store.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> BusResult<()>;
    async fn get(&self, key: &str) -> BusResult<Option<Vec<u8>>>;
    async fn sadd(&self, key: &str, member: &str) -> BusResult<()>;
    async fn smembers(&self, key: &str) -> BusResult<Vec<String>>;
    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()>;
    /// Subscribe to notifications (message ids) published on `channel`.
    async fn subscribe(&self, channel: &str) -> BusResult<mpsc::UnboundedReceiver<String>>;
    /// Round-trip latency of a cheap liveness probe.
    async fn ping(&self) -> BusResult<Duration>;
}

/// Redis-backed [`Transport`] using a shared [`ConnectionManager`] for
/// commands and one dedicated pub/sub connection per subscription.
pub struct RedisTransport {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisTransport {
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = redis::Client::open(url).map_err(|e| BusError::Transport(e.to_string()))?;
        let manager =
            ConnectionManager::new(client.clone()).await.map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> BusResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> BusResult<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(|e| BusError::Transport(e.to_string()))
    }

    async fn sadd(&self, key: &str, member: &str) -> BusResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.sadd(key, member).await.map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> BusResult<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.smembers(key).await.map_err(|e| BusError::Transport(e.to_string()))
    }

    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()> {
        let mut conn = self.manager.clone();
        let _: () =
            conn.publish(channel, payload).await.map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> BusResult<mpsc::UnboundedReceiver<String>> {
        let mut pubsub =
            self.client.get_async_pubsub().await.map_err(|e| BusError::Transport(e.to_string()))?;
        pubsub.subscribe(channel).await.map_err(|e| BusError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if tx.send(payload).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn ping(&self) -> BusResult<Duration> {
        let start = std::time::Instant::now();
        let mut conn = self.manager.clone();
        let _: String =
            redis::cmd("PING").query_async(&mut conn).await.map_err(|e| BusError::Transport(e.to_string()))?;
        Ok(start.elapsed())
    }
}

#[derive(Default)]
struct InMemoryState {
    kv: HashMap<String, Vec<u8>>,
    sets: HashMap<String, HashSet<String>>,
}

/// In-process [`Transport`] fake for tests: no real network, deterministic,
/// backed by a broadcast channel fanning published ids out to subscribers.
pub struct InMemoryTransport {
    state: parking_lot::Mutex<InMemoryState>,
    tx: broadcast::Sender<(String, String)>,
    /// When set, every operation fails — used to exercise breaker/outbox paths.
    down: std::sync::atomic::AtomicBool,
    ping_latency: parking_lot::Mutex<Duration>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            state: parking_lot::Mutex::new(InMemoryState::default()),
            tx,
            down: std::sync::atomic::AtomicBool::new(false),
            ping_latency: parking_lot::Mutex::new(Duration::from_millis(0)),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_ping_latency(&self, latency: Duration) {
        *self.ping_latency.lock() = latency;
    }

    fn check_up(&self) -> BusResult<()> {
        if self.down.load(std::sync::atomic::Ordering::SeqCst) {
            Err(BusError::Transport("transport simulated down".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> BusResult<()> {
        self.check_up()?;
        self.state.lock().kv.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> BusResult<Option<Vec<u8>>> {
        self.check_up()?;
        Ok(self.state.lock().kv.get(key).cloned())
    }

    async fn sadd(&self, key: &str, member: &str) -> BusResult<()> {
        self.check_up()?;
        self.state.lock().sets.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> BusResult<Vec<String>> {
        self.check_up()?;
        Ok(self.state.lock().sets.get(key).cloned().unwrap_or_default().into_iter().collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> BusResult<()> {
        self.check_up()?;
        let _ = self.tx.send((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> BusResult<mpsc::UnboundedReceiver<String>> {
        self.check_up()?;
        let mut broadcast_rx = self.tx.subscribe();
        let channel = channel.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((ch, payload)) = broadcast_rx.recv().await {
                if ch == channel && tx.send(payload).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn ping(&self) -> BusResult<Duration> {
        self.check_up()?;
        Ok(*self.ping_latency.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_round_trips() {
        let t = InMemoryTransport::new();
        t.set_with_ttl("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(t.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn sadd_is_set_semantics_not_overwrite() {
        let t = InMemoryTransport::new();
        t.sadd("channels:active", "a").await.unwrap();
        t.sadd("channels:active", "b").await.unwrap();
        let mut members = t.smembers("channels:active").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn down_transport_fails_every_operation() {
        let t = InMemoryTransport::new();
        t.set_down(true);
        assert!(t.get("k").await.is_err());
        assert!(t.publish("ch", "1").await.is_err());
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_subscriber_only() {
        let t = InMemoryTransport::new();
        let mut rx = t.subscribe("ch-a").await.unwrap();
        t.publish("ch-b", "ignored").await.unwrap();
        t.publish("ch-a", "1").await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, "1");
    }
}
