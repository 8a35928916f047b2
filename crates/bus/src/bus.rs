// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic pub/sub with priority TTLs, pattern subscriptions, catch-up replay,
//! and fallback outbox flush (§4.C).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ghost_core::{Clock, Message, MessageId, Priority, SystemClock};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{BusError, BusResult};
use crate::outbox::Outbox;
use crate::pattern::ChannelPattern;
use crate::transport::Transport;

const ACTIVE_CHANNELS_KEY: &str = "channels:active";

fn message_key(channel: &str, id: &str) -> String {
    format!("message:{channel}:{id}")
}

fn last_key(channel: &str) -> String {
    format!("channel:{channel}:last")
}

/// `Disconnected` < `Degraded` < `Connected` is not an ordering invariant, just
/// the three states the connection monitor reports (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Degraded,
    Connected,
}

/// Read-only snapshot for operators/CLI `ping`.
#[derive(Debug, Clone)]
pub struct BusDiagnostics {
    pub connection_state: ConnectionState,
    pub breaker_state: crate::circuit_breaker::BreakerState,
    pub subscription_count: usize,
    pub pending_outbox_size: usize,
    pub last_message_at: HashMap<String, u64>,
}

struct LocalSubscription {
    id: u64,
    pattern: ChannelPattern,
    sender: mpsc::UnboundedSender<Message>,
}

/// A live subscription returned by [`MessageBus::subscribe`]. Dropping or
/// calling [`Subscription::cancel`] deregisters the writer and stops the
/// background readers feeding it.
pub struct Subscription {
    pub receiver: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Bidirectional topic bus: publishes go through the circuit breaker to the
/// remote transport, falling back to the outbox on denial or failure; local
/// subscriptions are always served directly regardless of transport health.
pub struct MessageBus<C: Clock = SystemClock> {
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker<C>>,
    outbox: Option<Arc<dyn Outbox>>,
    clock: C,
    counter: AtomicU64,
    subscription_seq: AtomicU64,
    local_subs: Mutex<Vec<LocalSubscription>>,
    connection_state: Mutex<ConnectionState>,
    last_message_at: Mutex<HashMap<String, u64>>,
}

impl<C: Clock + 'static> MessageBus<C> {
    pub fn new(transport: Arc<dyn Transport>, outbox: Option<Arc<dyn Outbox>>, clock: C) -> Arc<Self> {
        Arc::new(Self {
            transport,
            breaker: Arc::new(CircuitBreaker::new(clock.clone())),
            outbox,
            clock,
            counter: AtomicU64::new(0),
            subscription_seq: AtomicU64::new(0),
            local_subs: Mutex::new(Vec::new()),
            connection_state: Mutex::new(ConnectionState::Connected),
            last_message_at: Mutex::new(HashMap::new()),
        })
    }

    fn next_id(&self) -> MessageId {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        MessageId::new(self.clock.epoch_ms(), counter, uuid::Uuid::new_v4())
    }

    /// Publish `payload` on `channel`. Returns the assigned id whether the
    /// message went out over the transport or fell back to the outbox.
    pub async fn publish(
        &self,
        channel: &str,
        payload: Vec<u8>,
        priority: Priority,
        ttl: Option<Duration>,
        type_tag: &str,
    ) -> BusResult<MessageId> {
        let now = self.clock.epoch_ms();
        let ttl = ttl.unwrap_or_else(|| priority.default_ttl());
        let id = self.next_id();
        let msg = Message {
            id: id.clone(),
            channel: channel.to_string(),
            priority,
            created_at: now,
            expires_at: now + ttl.as_millis() as u64,
            type_tag: type_tag.to_string(),
            payload,
        };

        if self.breaker.allowed() {
            match self.publish_via_transport(&msg).await {
                Ok(()) => {
                    self.breaker.on_success();
                    self.last_message_at.lock().insert(channel.to_string(), now);
                    self.deliver_local(&msg);
                    return Ok(id);
                }
                Err(e) => {
                    warn!(error = %e, channel, "transport publish failed, falling back to outbox");
                    self.breaker.on_failure();
                }
            }
        }

        match &self.outbox {
            Some(outbox) => {
                outbox.store(msg.clone()).await;
                self.deliver_local(&msg);
                Ok(id)
            }
            None => {
                self.deliver_local(&msg);
                Err(BusError::TransportUnavailable)
            }
        }
    }

    async fn publish_via_transport(&self, msg: &Message) -> BusResult<()> {
        let bytes = ghost_wire::encode_message(msg);
        let ttl = Duration::from_millis(msg.expires_at.saturating_sub(msg.created_at));
        self.transport.set_with_ttl(&message_key(&msg.channel, msg.id.as_str()), bytes, ttl).await?;
        self.transport
            .set_with_ttl(&last_key(&msg.channel), msg.id.as_str().as_bytes().to_vec(), ttl)
            .await?;
        self.transport.sadd(ACTIVE_CHANNELS_KEY, &msg.channel).await?;
        self.transport.publish(&msg.channel, msg.id.as_str()).await?;
        Ok(())
    }

    fn deliver_local(&self, msg: &Message) {
        let subs = self.local_subs.lock();
        for sub in subs.iter() {
            if sub.pattern.matches(&msg.channel) {
                let _ = sub.sender.send(msg.clone());
            }
        }
    }

    /// Fetch `message:{channel}:{id}`, probing the transport then falling
    /// back to the outbox; returns `None` on a miss in both places.
    async fn fetch_message(&self, channel: &str, id: &str) -> Option<Message> {
        if self.breaker.allowed() {
            match self.transport.get(&message_key(channel, id)).await {
                Ok(Some(bytes)) => {
                    self.breaker.on_success();
                    return ghost_wire::decode_message(&bytes).ok();
                }
                Ok(None) => {
                    self.breaker.on_success();
                }
                Err(_) => self.breaker.on_failure(),
            }
        }
        let outbox = self.outbox.as_ref()?;
        let pattern = ChannelPattern::new(channel);
        outbox.get_by_channel_pattern(&pattern).await.into_iter().find(|m| m.id.as_str() == id)
    }

    /// Register a pattern subscription, catch up on each matching channel's
    /// last message, then stream new notifications as they arrive.
    pub async fn subscribe(self: &Arc<Self>, pattern: &str) -> BusResult<Subscription> {
        let pattern = ChannelPattern::new(pattern);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let sub_id = self.subscription_seq.fetch_add(1, Ordering::SeqCst);

        self.local_subs.lock().push(LocalSubscription { id: sub_id, pattern: pattern.clone(), sender: tx.clone() });
        self.spawn_local_sub_cleanup(sub_id, cancel.clone());

        let channels = self.matching_channels(&pattern).await;
        for channel in &channels {
            self.catch_up(channel, &tx).await;
            self.spawn_channel_reader(channel.clone(), tx.clone(), cancel.clone());
        }

        if !pattern.is_literal() {
            self.spawn_wildcard_watcher(pattern, channels, tx, cancel.clone());
        }

        Ok(Subscription { receiver: rx, cancel })
    }

    async fn matching_channels(&self, pattern: &ChannelPattern) -> Vec<String> {
        if pattern.is_literal() {
            return vec![pattern.as_str().to_string()];
        }
        self.transport
            .smembers(ACTIVE_CHANNELS_KEY)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|ch| pattern.matches(ch))
            .collect()
    }

    async fn catch_up(&self, channel: &str, tx: &mpsc::UnboundedSender<Message>) {
        let Ok(Some(last_id_bytes)) = self.transport.get(&last_key(channel)).await else { return };
        let Ok(last_id) = String::from_utf8(last_id_bytes) else { return };
        if let Some(msg) = self.fetch_message(channel, &last_id).await {
            let _ = tx.send(msg);
        }
    }

    /// Deregisters this subscription's writer from `local_subs` once its
    /// token is cancelled, so a cancelled or dropped `Subscription` doesn't
    /// keep receiving local deliveries forever.
    fn spawn_local_sub_cleanup(self: &Arc<Self>, sub_id: u64, cancel: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            cancel.cancelled().await;
            this.local_subs.lock().retain(|sub| sub.id != sub_id);
        });
    }

    fn spawn_channel_reader(
        self: &Arc<Self>,
        channel: String,
        tx: mpsc::UnboundedSender<Message>,
        cancel: CancellationToken,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut notifications = match this.transport.subscribe(&channel).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(error = %e, channel, "failed to subscribe to transport channel");
                    return;
                }
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(channel, "subscription cancelled");
                        return;
                    }
                    id = notifications.recv() => {
                        let Some(id) = id else { return };
                        if let Some(msg) = this.fetch_message(&channel, &id).await {
                            let _ = tx.send(msg);
                        }
                    }
                }
            }
        });
    }

    /// Every 2 s, re-scan the active-channels set for new channels this
    /// wildcard pattern matches and attach a reader to each (§4.C step 3).
    fn spawn_wildcard_watcher(
        self: &Arc<Self>,
        pattern: ChannelPattern,
        mut known: Vec<String>,
        tx: mpsc::UnboundedSender<Message>,
        cancel: CancellationToken,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                }
                let current = this.matching_channels(&pattern).await;
                for channel in current {
                    if !known.contains(&channel) {
                        known.push(channel.clone());
                        this.catch_up(&channel, &tx).await;
                        this.spawn_channel_reader(channel, tx.clone(), cancel.clone());
                    }
                }
            }
        });
    }

    /// Background task: every 30 s, replay outbox records once the remote is available.
    pub fn spawn_outbox_flush(self: &Arc<Self>, cancel: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                }
                this.flush_outbox_once().await;
            }
        });
    }

    /// Drain a batch of pending outbox records through the transport right
    /// now, skipping any already expired. Used both by the periodic
    /// background flush and by a final flush at shutdown.
    pub async fn flush_outbox_once(&self) {
        let Some(outbox) = &self.outbox else { return };
        if !self.breaker.allowed() {
            return;
        }
        let now = self.clock.epoch_ms();
        outbox.cleanup_expired(now).await;
        for msg in outbox.get_pending(100).await {
            let remaining = msg.expires_at.saturating_sub(now);
            if remaining == 0 {
                continue;
            }
            match self.publish_via_transport(&msg).await {
                Ok(()) => {
                    self.breaker.on_success();
                    outbox.mark_processed(msg.id.as_str()).await;
                }
                Err(e) => {
                    warn!(error = %e, "outbox flush publish failed, retrying next round");
                    self.breaker.on_failure();
                    break;
                }
            }
        }
    }

    /// Background task: every 30 s, ping the transport and update connection state.
    pub fn spawn_connection_monitor(self: &Arc<Self>, cancel: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                }
                this.check_connection_once().await;
            }
        });
    }

    async fn check_connection_once(&self) {
        let new_state = match self.transport.ping().await {
            Ok(latency) if latency > Duration::from_secs(1) => ConnectionState::Degraded,
            Ok(_) => ConnectionState::Connected,
            Err(_) => ConnectionState::Disconnected,
        };
        let mut state = self.connection_state.lock();
        if *state != new_state {
            debug!(?new_state, "bus connection state changed");
            *state = new_state;
        }
    }

    pub async fn diagnostics(&self) -> BusDiagnostics {
        let pending_outbox_size = match &self.outbox {
            Some(outbox) => outbox.get_pending(usize::MAX).await.len(),
            None => 0,
        };
        BusDiagnostics {
            connection_state: *self.connection_state.lock(),
            breaker_state: self.breaker.state(),
            subscription_count: self.local_subs.lock().len(),
            pending_outbox_size,
            last_message_at: self.last_message_at.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use ghost_core::FakeClock;

    use super::*;
    use crate::outbox::InMemoryOutbox;
    use crate::transport::InMemoryTransport;

    fn test_bus() -> (Arc<MessageBus<FakeClock>>, Arc<InMemoryTransport>, FakeClock) {
        let clock = FakeClock::new();
        let transport = Arc::new(InMemoryTransport::new());
        let outbox = Arc::new(InMemoryOutbox::new());
        let bus = MessageBus::new(transport.clone(), Some(outbox), clock.clone());
        (bus, transport, clock)
    }

    #[tokio::test]
    async fn publish_then_subscribe_literal_catches_up() {
        let (bus, _transport, _clock) = test_bus();
        bus.publish("ghost:commands", b"hello".to_vec(), Priority::Normal, None, "t").await.unwrap();

        let mut sub = bus.subscribe("ghost:commands").await.unwrap();
        let msg = sub.receiver.recv().await.unwrap();
        assert_eq!(msg.payload, b"hello");
    }

    #[tokio::test]
    async fn publish_falls_back_to_outbox_when_transport_down() {
        let (bus, transport, _clock) = test_bus();
        transport.set_down(true);

        bus.publish("ghost:commands", b"x".to_vec(), Priority::Normal, None, "t").await.unwrap();
        let diag = bus.diagnostics().await;
        assert_eq!(diag.pending_outbox_size, 1);
    }

    #[tokio::test]
    async fn publish_without_outbox_fails_when_breaker_denies() {
        let clock = FakeClock::new();
        let transport = Arc::new(InMemoryTransport::new());
        transport.set_down(true);
        let bus = MessageBus::new(transport, None, clock);

        let err = bus.publish("ghost:commands", vec![], Priority::Normal, None, "t").await.unwrap_err();
        assert!(matches!(err, BusError::TransportUnavailable));
    }

    #[tokio::test]
    async fn wildcard_subscription_matches_published_channel() {
        let (bus, _transport, _clock) = test_bus();
        bus.publish("ghost:metrics:svc-1", b"m".to_vec(), Priority::Normal, None, "t").await.unwrap();

        let mut sub = bus.subscribe("ghost:metrics:*").await.unwrap();
        let msg = sub.receiver.recv().await.unwrap();
        assert_eq!(msg.channel, "ghost:metrics:svc-1");
    }

    #[tokio::test]
    async fn connection_monitor_reports_degraded_above_one_second() {
        let (bus, transport, _clock) = test_bus();
        transport.set_ping_latency(Duration::from_millis(1_500));
        bus.check_connection_once().await;
        assert_eq!(bus.diagnostics().await.connection_state, ConnectionState::Degraded);
    }
}
