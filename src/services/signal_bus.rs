//! Signal bus: per-task in-band control channels.
//!
//! Each subscribed task owns one buffered channel. Delivery is best-effort
//! to a live subscriber; signals without a subscriber (or overflowing the
//! buffer) are dropped and counted. Two transports implement the same
//! contract: a local in-process map, and a broker-backed variant that
//! degrades to local on broker failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{PublishOutcome, Signal, SignalConfig};
use crate::domain::ports::SignalBroker;

/// Receiving half of a task's signal channel, attached to the task context.
#[derive(Clone, Debug)]
pub struct SignalReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Signal>>>,
}

impl SignalReceiver {
    fn new(rx: mpsc::Receiver<Signal>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// Waits for the next signal; `None` once the channel is detached.
    pub async fn recv(&self) -> Option<Signal> {
        self.inner.lock().await.recv().await
    }

    /// Non-blocking poll for a pending signal.
    pub async fn try_recv(&self) -> Option<Signal> {
        self.inner.lock().await.try_recv().ok()
    }
}

/// Signal bus contract shared by both transports.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Creates the task's signal channel; fails if one already exists.
    async fn subscribe(&self, task_id: &str) -> EngineResult<SignalReceiver>;

    /// Detaches the task's channel; unknown ids are ignored.
    async fn unsubscribe(&self, task_id: &str);

    /// Best-effort delivery to the target task's channel.
    async fn publish(&self, signal: Signal) -> EngineResult<PublishOutcome>;

    /// Signals dropped for lack of a subscriber or buffer space.
    fn dropped_count(&self) -> u64;
}

/// Local in-process transport: a map from task id to buffered channel.
pub struct LocalSignalBus {
    buffer_depth: usize,
    channels: RwLock<HashMap<String, mpsc::Sender<Signal>>>,
    dropped: AtomicU64,
}

impl LocalSignalBus {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            buffer_depth: config.buffer_depth.max(1),
            channels: RwLock::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    fn record_drop(&self, signal: &Signal, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("signals_dropped_total", "reason" => reason.to_string()).increment(1);
        tracing::debug!(
            task_id = %signal.target_task_id,
            signal_id = %signal.id,
            reason,
            "signal dropped"
        );
    }
}

#[async_trait]
impl SignalBus for LocalSignalBus {
    async fn subscribe(&self, task_id: &str) -> EngineResult<SignalReceiver> {
        let mut channels = self.channels.write().await;
        if channels.contains_key(task_id) {
            return Err(EngineError::AlreadySubscribed(task_id.to_string()));
        }
        let (tx, rx) = mpsc::channel(self.buffer_depth);
        channels.insert(task_id.to_string(), tx);
        Ok(SignalReceiver::new(rx))
    }

    async fn unsubscribe(&self, task_id: &str) {
        self.channels.write().await.remove(task_id);
    }

    async fn publish(&self, signal: Signal) -> EngineResult<PublishOutcome> {
        let sender = {
            let channels = self.channels.read().await;
            channels.get(&signal.target_task_id).cloned()
        };
        let Some(sender) = sender else {
            self.record_drop(&signal, "no_subscriber");
            return Ok(PublishOutcome::NoSubscriber);
        };
        match sender.try_send(signal) {
            Ok(()) => Ok(PublishOutcome::Delivered),
            Err(mpsc::error::TrySendError::Full(signal)) => {
                self.record_drop(&signal, "buffer_full");
                Ok(PublishOutcome::Delivered)
            }
            Err(mpsc::error::TrySendError::Closed(signal)) => {
                self.record_drop(&signal, "no_subscriber");
                Ok(PublishOutcome::NoSubscriber)
            }
        }
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Broker-backed transport. Signals for locally subscribed tasks are
/// delivered in-process; everything else is published to the broker topic
/// `{channel_prefix}{task_id}`. Broker errors degrade to local delivery.
pub struct BrokerSignalBus {
    local: LocalSignalBus,
    broker: Arc<dyn SignalBroker>,
    channel_prefix: String,
    /// Forwarding loops for this node's subscriptions.
    forwarders: RwLock<HashMap<String, CancellationToken>>,
}

impl BrokerSignalBus {
    pub fn new(config: &SignalConfig, broker: Arc<dyn SignalBroker>) -> Self {
        Self {
            local: LocalSignalBus::new(config),
            broker,
            channel_prefix: config.channel_prefix.clone(),
            forwarders: RwLock::new(HashMap::new()),
        }
    }

    fn topic(&self, task_id: &str) -> String {
        format!("{}{}", self.channel_prefix, task_id)
    }
}

#[async_trait]
impl SignalBus for BrokerSignalBus {
    async fn subscribe(&self, task_id: &str) -> EngineResult<SignalReceiver> {
        let receiver = self.local.subscribe(task_id).await?;

        // Bridge broker deliveries for this task onto the local channel.
        match self.broker.subscribe(&self.topic(task_id)).await {
            Ok(mut broker_rx) => {
                let stop = CancellationToken::new();
                self.forwarders
                    .write()
                    .await
                    .insert(task_id.to_string(), stop.clone());

                let sender = {
                    let channels = self.local.channels.read().await;
                    channels.get(task_id).cloned()
                };
                if let Some(sender) = sender {
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                () = stop.cancelled() => break,
                                payload = broker_rx.recv() => {
                                    let Some(payload) = payload else { break };
                                    match serde_json::from_slice::<Signal>(&payload) {
                                        Ok(signal) => {
                                            let _ = sender.try_send(signal);
                                        }
                                        Err(err) => {
                                            tracing::warn!(error = %err, "undecodable broker signal");
                                        }
                                    }
                                }
                            }
                        }
                    });
                }
            }
            Err(err) => {
                tracing::warn!(
                    task_id,
                    error = %err,
                    "broker subscribe failed; signal delivery degrades to local"
                );
            }
        }

        Ok(receiver)
    }

    async fn unsubscribe(&self, task_id: &str) {
        if let Some(stop) = self.forwarders.write().await.remove(task_id) {
            stop.cancel();
        }
        if let Err(err) = self.broker.unsubscribe(&self.topic(task_id)).await {
            tracing::debug!(task_id, error = %err, "broker unsubscribe failed");
        }
        self.local.unsubscribe(task_id).await;
    }

    async fn publish(&self, signal: Signal) -> EngineResult<PublishOutcome> {
        // Local subscribers are served directly; ordering holds per task id.
        let locally_subscribed = {
            let channels = self.local.channels.read().await;
            channels.contains_key(&signal.target_task_id)
        };
        if locally_subscribed {
            return self.local.publish(signal).await;
        }

        let topic = self.topic(&signal.target_task_id);
        let payload = serde_json::to_vec(&signal)?;
        match self.broker.publish(&topic, payload).await {
            Ok(()) => Ok(PublishOutcome::Delivered),
            Err(err) => {
                tracing::warn!(
                    task_id = %signal.target_task_id,
                    error = %err,
                    "broker publish failed; degrading to local delivery"
                );
                self.local.publish(signal).await
            }
        }
    }

    fn dropped_count(&self) -> u64 {
        self.local.dropped_count()
    }
}

/// Builds the broker-backed bus when a broker is supplied and reachable;
/// falls back to the local transport otherwise.
pub async fn build_signal_bus(
    config: &SignalConfig,
    broker: Option<Arc<dyn SignalBroker>>,
) -> Arc<dyn SignalBus> {
    match broker {
        Some(broker) => {
            // Probe the broker once; unreachable brokers demote the bus.
            let probe = format!("{}healthcheck", config.channel_prefix);
            match broker.subscribe(&probe).await {
                Ok(_) => {
                    let _ = broker.unsubscribe(&probe).await;
                    Arc::new(BrokerSignalBus::new(config, broker))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "signal broker unreachable; using local bus");
                    Arc::new(LocalSignalBus::new(config))
                }
            }
        }
        None => Arc::new(LocalSignalBus::new(config)),
    }
}

/// In-process broker used by tests and single-node deployments.
#[derive(Default)]
pub struct InProcessBroker {
    topics: RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalBroker for InProcessBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> EngineResult<()> {
        let sender = {
            let topics = self.topics.read().await;
            topics.get(topic).cloned()
        };
        match sender {
            Some(sender) => sender
                .send(payload)
                .await
                .map_err(|_| EngineError::BrokerUnavailable("topic closed".into())),
            None => Ok(()),
        }
    }

    async fn subscribe(&self, topic: &str) -> EngineResult<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(64);
        self.topics.write().await.insert(topic.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &str) -> EngineResult<()> {
        self.topics.write().await.remove(topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{InterruptMode, SignalKind};

    fn config() -> SignalConfig {
        SignalConfig::default()
    }

    #[tokio::test]
    async fn test_local_subscribe_publish() {
        let bus = LocalSignalBus::new(&config());
        let rx = bus.subscribe("t1").await.unwrap();

        let outcome = bus
            .publish(Signal::steer("t1", serde_json::json!({"k": "v"})))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Delivered);

        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.kind, SignalKind::Steer);
    }

    #[tokio::test]
    async fn test_double_subscribe_fails() {
        let bus = LocalSignalBus::new(&config());
        bus.subscribe("t1").await.unwrap();
        let err = bus.subscribe("t1").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadySubscribed(_)));
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_drops() {
        let bus = LocalSignalBus::new(&config());
        let outcome = bus
            .publish(Signal::interrupt("ghost", InterruptMode::Graceful))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::NoSubscriber);
        assert_eq!(bus.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches() {
        let bus = LocalSignalBus::new(&config());
        let _rx = bus.subscribe("t1").await.unwrap();
        bus.unsubscribe("t1").await;
        let outcome = bus.publish(Signal::collect("t1")).await.unwrap();
        assert_eq!(outcome, PublishOutcome::NoSubscriber);
    }

    #[tokio::test]
    async fn test_buffer_overflow_counts_drop() {
        let mut cfg = config();
        cfg.buffer_depth = 1;
        let bus = LocalSignalBus::new(&cfg);
        let _rx = bus.subscribe("t1").await.unwrap();

        bus.publish(Signal::collect("t1")).await.unwrap();
        bus.publish(Signal::collect("t1")).await.unwrap();
        assert_eq!(bus.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_broker_bus_round_trip() {
        let broker: Arc<dyn SignalBroker> = Arc::new(InProcessBroker::new());
        let bus = build_signal_bus(&config(), Some(broker.clone())).await;

        let rx = bus.subscribe("remote-task").await.unwrap();

        // Publish through the broker path from "another node".
        let signal = Signal::steer("remote-task", serde_json::json!({"step": 2}));
        let payload = serde_json::to_vec(&signal).unwrap();
        broker
            .publish("cascade.signals.remote-task", payload)
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.target_task_id, "remote-task");
    }

    #[tokio::test]
    async fn test_broker_publish_reaches_local_subscriber() {
        let broker: Arc<dyn SignalBroker> = Arc::new(InProcessBroker::new());
        let bus = BrokerSignalBus::new(&config(), broker);
        let rx = bus.subscribe("t1").await.unwrap();

        let outcome = bus.publish(Signal::collect("t1")).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Delivered);
        assert!(rx.recv().await.is_some());
    }
}
