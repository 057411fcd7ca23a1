//! Broker engines.
//!
//! Both engines own a [`SubscriptionRegistry`] keyed by [`SubscriberRef`] and
//! implement the same [`Broker`] contract; they differ only in how registry
//! updates and fan-out are synchronized:
//!
//! - [`serialized::SerializedBroker`]: one control task consumes a single
//!   ordered intake queue of publishes and registry commands.
//! - [`shared_lock::SharedLockBroker`]: registry behind a reader/writer lock;
//!   publishers fan out on their own task under the read lock.

pub mod serialized;
pub mod shared_lock;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tf_core::{
    Enqueue, InstrumentId, Mode, PublishError, SubscriptionRequest, Tick,
    config::{EngineKind, OverflowPolicy, ServerConfig},
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{actor::SubscriberRef, registry::SubscriptionRegistry};

pub use serialized::SerializedBroker;
pub use shared_lock::SharedLockBroker;

pub(crate) type Registry = SubscriptionRegistry<SubscriberRef>;

/// Turns a tick into the message sent to a subscriber at a given mode.
pub type Projection = Arc<dyn Fn(&Tick, Mode) -> Bytes + Send + Sync>;

/// Every mode receives the payload unchanged.
pub fn identity_projection() -> Projection {
    Arc::new(|tick: &Tick, _mode: Mode| tick.payload.clone())
}

/// The contract every engine implements.
///
/// `subscribe` and `unsubscribe` never fail from the caller's point of view:
/// once the engine is shutting down they are silently dropped.
#[async_trait]
pub trait Broker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hand a batch to the engine. Fails with [`PublishError::TimedOut`] if
    /// the intake is not available within `timeout`; the batch is then
    /// dropped in its entirety.
    async fn publish(&self, timeout: Duration, ticks: Vec<Tick>) -> Result<(), PublishError>;

    /// Apply `request.mode` to every listed instrument for `subscriber`.
    async fn subscribe(&self, subscriber: SubscriberRef, request: SubscriptionRequest);

    /// Remove `subscriber` from every instrument.
    async fn unsubscribe(&self, subscriber: SubscriberRef);

    /// Snapshot of who currently receives `instrument`, ordered after every
    /// command submitted before it.
    async fn subscribers_of(&self, instrument: InstrumentId) -> Vec<(SubscriberRef, Mode)>;

    fn stats(&self) -> FanoutStats;
}

#[derive(Clone)]
pub struct EngineConfig {
    pub intake_capacity: usize,
    pub overflow: OverflowPolicy,
    pub projection: Projection,
}

impl EngineConfig {
    pub fn from_server(cfg: &ServerConfig) -> Self {
        Self {
            intake_capacity: cfg.intake_capacity(),
            overflow: cfg.effective_overflow(),
            projection: identity_projection(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_server(&ServerConfig::default())
    }
}

/// Build the configured engine. Must be called inside a tokio runtime.
pub fn create_broker(kind: EngineKind, config: EngineConfig, shutdown: &CancellationToken) -> Arc<dyn Broker> {
    match kind {
        EngineKind::Serialized => SerializedBroker::spawn(config, shutdown.clone()),
        EngineKind::SharedLock => SharedLockBroker::new(config, shutdown.clone()),
    }
}

/// Delivery counters since startup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutStats {
    /// Batches fanned out.
    pub batches: u64,
    pub delivered: u64,
    /// Messages dropped on a full outbound queue.
    pub dropped: u64,
    /// Messages skipped because the subscriber was closing.
    pub closed: u64,
}

/// Fan-out shared by both engines: project each tick per subscriber and put
/// it on that subscriber's queue according to the overflow policy.
pub(crate) struct Fanout {
    projection: Projection,
    overflow: OverflowPolicy,
    batches: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicU64,
}

impl Fanout {
    pub(crate) fn new(projection: Projection, overflow: OverflowPolicy) -> Self {
        Self {
            projection,
            overflow,
            batches: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    pub(crate) fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Deliver a batch, honoring the overflow policy. With
    /// [`OverflowPolicy::Block`] this waits on every full queue in turn.
    pub(crate) async fn deliver(&self, registry: &Registry, ticks: &[Tick]) {
        if self.overflow == OverflowPolicy::Drop {
            self.try_deliver(registry, ticks);
            return;
        }

        self.batches.fetch_add(1, Ordering::Relaxed);
        for tick in ticks {
            for (subscriber, mode) in registry.subscribers_of(tick.instrument) {
                let msg = (self.projection)(tick, mode);
                let outcome = subscriber.enqueue(msg).await;
                self.count(outcome);
            }
        }
    }

    /// Deliver a batch without ever waiting: full queues drop.
    pub(crate) fn try_deliver(&self, registry: &Registry, ticks: &[Tick]) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        for tick in ticks {
            for (subscriber, mode) in registry.subscribers_of(tick.instrument) {
                let msg = (self.projection)(tick, mode);
                let outcome = subscriber.try_enqueue(msg);
                if outcome == Enqueue::Full && subscriber.dropped() == 1 {
                    warn!("[client-{}] outbound queue full, dropping", subscriber.id());
                }
                self.count(outcome);
            }
        }
    }

    fn count(&self, outcome: Enqueue) {
        let counter = match outcome {
            Enqueue::Queued => &self.delivered,
            Enqueue::Full => &self.dropped,
            Enqueue::Closed => &self.closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> FanoutStats {
        FanoutStats {
            batches: self.batches.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}
