// src/realtime/router.rs

//! The Broadcast Router (C9): target selection, parallel fan-out, and
//! batch routing over a receiver registry (spec §4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, broadcast};
use tracing::debug;

use crate::config::RouterConfig;
use crate::error::{CoreError, CoreResult};
use crate::metrics::{
    ROUTER_DELIVERIES_BY_KIND_TOTAL, ROUTER_DELIVERIES_TOTAL, ROUTER_LATENCY_EMA_SECONDS,
    ROUTER_MESSAGES_PROCESSED_TOTAL, ROUTER_QUEUE_BACKLOG,
};
use crate::realtime::message::{AckRecord, AckStatus, RoutedMessage, TargetKind};
use crate::realtime::session::SessionRegistry;

/// A sink a single connection's inbound delivery path implements; how
/// bytes actually reach the client transport is outside this crate's
/// concern (spec's realtime transport is external).
#[async_trait]
pub trait ReceiverHandle: Send + Sync {
    async fn deliver(&self, message: &RoutedMessage) -> CoreResult<()>;
}

struct ReceiverRecord {
    handle: Arc<dyn ReceiverHandle>,
    registered_at: Instant,
    online: bool,
}

/// Outcome of routing a single message.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub message_id: String,
    pub delivered: usize,
    pub failed: usize,
    pub acks: Vec<AckRecord>,
}

#[derive(Default)]
struct StatsInner {
    processed: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    by_kind: DashMap<&'static str, AtomicU64>,
    latency_ema_secs: Mutex<f64>,
    queue_backlog: AtomicU64,
}

/// A statistics snapshot (spec §4.9: "Statistics").
#[derive(Debug, Clone, Default)]
pub struct RouterStatistics {
    pub processed: u64,
    pub success: u64,
    pub failure: u64,
    pub latency_ema_seconds: f64,
    pub by_kind: HashMap<String, u64>,
    pub queue_backlog: u64,
}

const LATENCY_EMA_ALPHA: f64 = 0.1;

/// Routes Routed Messages to the receivers selected by their target
/// descriptor, with bounded-concurrency fan-out.
pub struct BroadcastRouter {
    sessions: Arc<SessionRegistry>,
    receivers: DashMap<String, ReceiverRecord>,
    config: RouterConfig,
    stats: StatsInner,
}

impl BroadcastRouter {
    pub fn new(sessions: Arc<SessionRegistry>, config: RouterConfig) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            receivers: DashMap::new(),
            config,
            stats: StatsInner::default(),
        })
    }

    pub fn register_receiver(&self, connection_id: impl Into<String>, handle: Arc<dyn ReceiverHandle>) {
        self.receivers.insert(
            connection_id.into(),
            ReceiverRecord {
                handle,
                registered_at: Instant::now(),
                online: true,
            },
        );
    }

    /// Marks a receiver offline without removing its record immediately;
    /// the periodic cleanup task reaps it once it's both offline and
    /// past `receiver_max_age_seconds`.
    pub fn mark_offline(&self, connection_id: &str) {
        if let Some(mut record) = self.receivers.get_mut(connection_id) {
            record.online = false;
        }
    }

    fn select_targets(&self, message: &RoutedMessage) -> Vec<String> {
        let exclude: std::collections::HashSet<&str> = message.exclude_ids.iter().map(String::as_str).collect();
        let online_receiver = |id: &str| self.receivers.get(id).map(|r| r.online).unwrap_or(false);

        match message.target_kind {
            TargetKind::Unicast | TargetKind::Multicast => message
                .target_ids
                .iter()
                .filter(|id| online_receiver(id))
                .cloned()
                .collect(),
            TargetKind::Broadcast => self
                .receivers
                .iter()
                .filter(|entry| entry.value().online && !exclude.contains(entry.key().as_str()))
                .map(|entry| entry.key().clone())
                .collect(),
            TargetKind::Room | TargetKind::Area | TargetKind::Role => {
                let Some(scope_id) = message.target_ids.first() else {
                    return Vec::new();
                };
                let group_key = format!("{}:{}", message.target_kind.as_str(), scope_id);
                self.sessions
                    .sessions_in_group(&group_key)
                    .into_iter()
                    .filter(|session| session.online && online_receiver(&session.connection_id))
                    .filter(|session| !exclude.contains(session.connection_id.as_str()))
                    .map(|session| session.connection_id)
                    .collect()
            }
        }
    }

    /// Validates, selects targets, and delivers in parallel. Returns an
    /// error without counting toward delivery statistics if the message is
    /// malformed or past its deadline/hop budget.
    pub async fn route(&self, message: &RoutedMessage) -> CoreResult<RouteOutcome> {
        if let Some(reason) = message.validation_error() {
            return Err(CoreError::RouteInvalid(reason));
        }

        let targets = self.select_targets(message);
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_deliveries.max(1)));

        let results: Vec<(String, CoreResult<()>)> = stream::iter(targets.into_iter())
            .map(|connection_id| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let outcome = match self.receivers.get(&connection_id) {
                        Some(record) => record.handle.deliver(message).await,
                        None => Err(CoreError::RouteInvalid(format!("receiver {connection_id} not registered"))),
                    };
                    (connection_id, outcome)
                }
            })
            .buffer_unordered(self.config.max_concurrent_deliveries.max(1))
            .collect()
            .await;

        let mut delivered = 0usize;
        let mut failed = 0usize;
        let mut acks = Vec::new();
        for (connection_id, outcome) in results {
            match outcome {
                Ok(()) => {
                    delivered += 1;
                    ROUTER_DELIVERIES_TOTAL.with_label_values(&["success"]).inc();
                    if message.require_ack {
                        acks.push(AckRecord {
                            message_id: message.message_id.clone(),
                            receiver_id: connection_id,
                            ack_status: AckStatus::Delivered,
                            processed_at: Utc::now(),
                        });
                    }
                }
                Err(e) => {
                    failed += 1;
                    ROUTER_DELIVERIES_TOTAL.with_label_values(&["failure"]).inc();
                    debug!(connection_id, error = %e, "delivery failed");
                    if message.require_ack {
                        acks.push(AckRecord {
                            message_id: message.message_id.clone(),
                            receiver_id: connection_id,
                            ack_status: AckStatus::Failed,
                            processed_at: Utc::now(),
                        });
                    }
                }
            }
        }

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        self.stats.success.fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats.failure.fetch_add(failed as u64, Ordering::Relaxed);
        self.stats
            .by_kind
            .entry(message.target_kind.as_str())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        ROUTER_MESSAGES_PROCESSED_TOTAL.inc();
        ROUTER_DELIVERIES_BY_KIND_TOTAL
            .with_label_values(&[message.target_kind.as_str()])
            .inc();

        let sample = started.elapsed().as_secs_f64();
        let mut ema = self.stats.latency_ema_secs.lock();
        *ema = if *ema == 0.0 {
            sample
        } else {
            (1.0 - LATENCY_EMA_ALPHA) * *ema + LATENCY_EMA_ALPHA * sample
        };
        ROUTER_LATENCY_EMA_SECONDS.set(*ema);

        Ok(RouteOutcome {
            message_id: message.message_id.clone(),
            delivered,
            failed,
            acks,
        })
    }

    /// Groups `messages` by target kind, orders each group by descending
    /// priority, then routes the whole ordered sequence with bounded
    /// concurrency (spec §4.9: "Batch routing").
    pub async fn route_batch(&self, messages: Vec<RoutedMessage>) -> Vec<CoreResult<RouteOutcome>> {
        let mut grouped: HashMap<&'static str, Vec<RoutedMessage>> = HashMap::new();
        for message in messages {
            grouped.entry(message.target_kind.as_str()).or_default().push(message);
        }

        let mut ordered = Vec::new();
        for (_, mut group) in grouped {
            group.sort_by(|a, b| b.priority.cmp(&a.priority));
            ordered.extend(group);
        }

        self.stats.queue_backlog.store(ordered.len() as u64, Ordering::Relaxed);
        ROUTER_QUEUE_BACKLOG.set(ordered.len() as f64);

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_deliveries.max(1)));
        let results = stream::iter(ordered.into_iter())
            .map(|message| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    self.route(&message).await
                }
            })
            .buffer_unordered(self.config.max_concurrent_deliveries.max(1))
            .collect::<Vec<_>>()
            .await;

        self.stats.queue_backlog.store(0, Ordering::Relaxed);
        ROUTER_QUEUE_BACKLOG.set(0.0);
        results
    }

    pub fn statistics(&self) -> RouterStatistics {
        RouterStatistics {
            processed: self.stats.processed.load(Ordering::Relaxed),
            success: self.stats.success.load(Ordering::Relaxed),
            failure: self.stats.failure.load(Ordering::Relaxed),
            latency_ema_seconds: *self.stats.latency_ema_secs.lock(),
            by_kind: self
                .stats
                .by_kind
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
                .collect(),
            queue_backlog: self.stats.queue_backlog.load(Ordering::Relaxed),
        }
    }

    /// Removes receiver registrations that are offline and whose
    /// registration is older than `receiver_max_age_seconds`.
    pub fn cleanup_stale_receivers(&self) -> usize {
        let max_age = Duration::from_secs(self.config.receiver_max_age_seconds);
        let stale: Vec<String> = self
            .receivers
            .iter()
            .filter(|entry| !entry.value().online && entry.value().registered_at.elapsed() > max_age)
            .map(|entry| entry.key().clone())
            .collect();
        for connection_id in &stale {
            self.receivers.remove(connection_id);
        }
        stale.len()
    }

    pub async fn run_cleanup_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!("router cleanup task started");
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.cleanup_interval_seconds));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.cleanup_stale_receivers();
                    if removed > 0 {
                        debug!(removed, "router cleanup removed stale receivers");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("router cleanup task shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use super::*;
    use tokio::sync::mpsc;

    /// A receiver handle that forwards delivered messages onto an mpsc
    /// channel, for assertions in tests.
    pub struct ChannelReceiver {
        sender: mpsc::UnboundedSender<RoutedMessage>,
        fail: bool,
    }

    impl ChannelReceiver {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<RoutedMessage>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    sender: tx,
                    fail: false,
                }),
                rx,
            )
        }

        pub fn failing() -> Arc<Self> {
            let (tx, _rx) = mpsc::unbounded_channel();
            Arc::new(Self { sender: tx, fail: true })
        }
    }

    #[async_trait]
    impl ReceiverHandle for ChannelReceiver {
        async fn deliver(&self, message: &RoutedMessage) -> CoreResult<()> {
            if self.fail {
                return Err(CoreError::Internal("simulated delivery failure".into()));
            }
            self.sender
                .send(message.clone())
                .map_err(|_| CoreError::Internal("receiver channel closed".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::ChannelReceiver;
    use super::*;
    use crate::config::SessionConfig;
    use crate::realtime::session::GroupScope;
    use std::collections::HashMap as StdHashMap;

    fn router() -> (Arc<BroadcastRouter>, Arc<SessionRegistry>) {
        let sessions = SessionRegistry::new(SessionConfig {
            max_pool_size: 100,
            connection_timeout_seconds: 5,
            idle_timeout_seconds: 3600,
            cleanup_interval_seconds: 60,
        });
        let router = BroadcastRouter::new(
            sessions.clone(),
            RouterConfig {
                max_concurrent_deliveries: 10,
                receiver_max_age_seconds: 3600,
                cleanup_interval_seconds: 60,
            },
        );
        (router, sessions)
    }

    #[tokio::test]
    async fn unicast_delivers_only_to_target() {
        let (router, _sessions) = router();
        let (receiver_a, mut rx_a) = ChannelReceiver::new();
        let (receiver_b, mut rx_b) = ChannelReceiver::new();
        router.register_receiver("a", receiver_a);
        router.register_receiver("b", receiver_b);

        let message = RoutedMessage::new("m1", b"hello".to_vec(), TargetKind::Unicast)
            .with_targets(vec!["a".to_string()]);
        let outcome = router.route(&message).await.unwrap();

        assert_eq!(outcome.delivered, 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn room_broadcast_excludes_listed_ids() {
        let (router, sessions) = router();
        sessions.register("a", Some("p1".into()), StdHashMap::new()).unwrap();
        sessions.register("b", Some("p2".into()), StdHashMap::new()).unwrap();
        sessions.join_group("a", GroupScope::Room, "r1").unwrap();
        sessions.join_group("b", GroupScope::Room, "r1").unwrap();

        let (receiver_a, mut rx_a) = ChannelReceiver::new();
        let (receiver_b, mut rx_b) = ChannelReceiver::new();
        router.register_receiver("a", receiver_a);
        router.register_receiver("b", receiver_b);

        let message = RoutedMessage::new("m1", b"joined".to_vec(), TargetKind::Room)
            .with_targets(vec!["r1".to_string()])
            .with_exclusions(vec!["a".to_string()]);
        let outcome = router.route(&message).await.unwrap();

        assert_eq!(outcome.delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn message_past_hop_budget_is_rejected() {
        let (router, _sessions) = router();
        let mut message = RoutedMessage::new("m1", b"x".to_vec(), TargetKind::Broadcast);
        message.current_hops = message.max_hops;
        let result = router.route(&message).await;
        assert!(matches!(result, Err(CoreError::RouteInvalid(_))));
    }

    #[tokio::test]
    async fn failed_delivery_is_counted_and_acked_as_failed() {
        let (router, _sessions) = router();
        router.register_receiver("a", ChannelReceiver::failing());
        let message = RoutedMessage::new("m1", b"x".to_vec(), TargetKind::Unicast)
            .with_targets(vec!["a".to_string()])
            .with_require_ack(true);
        let outcome = router.route(&message).await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.acks[0].ack_status, AckStatus::Failed);
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_offline_receivers() {
        let (router, _sessions) = router();
        let (receiver, _rx) = ChannelReceiver::new();
        router.register_receiver("a", receiver);
        router.mark_offline("a");
        // Not yet past max age: nothing removed.
        assert_eq!(router.cleanup_stale_receivers(), 0);
    }
}
