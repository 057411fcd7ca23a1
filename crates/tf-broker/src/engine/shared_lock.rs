//! Shared-lock engine: registry behind a reader/writer lock.
//!
//! Publishers take the read lock and fan out on their own task, so several
//! publishers proceed in parallel. Subscribe and unsubscribe take the write
//! lock and apply in place. Fan-out never waits on a subscriber queue: a full
//! queue drops the message for that subscriber only, so one slow reader
//! cannot hold the read lock and starve registry writers.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tf_core::{InstrumentId, Mode, PublishError, SubscriptionRequest, Tick, config::OverflowPolicy};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Broker, EngineConfig, Fanout, FanoutStats, Registry};
use crate::actor::SubscriberRef;

pub struct SharedLockBroker {
    registry: RwLock<Registry>,
    fanout: Fanout,
    shutdown: CancellationToken,
}

impl SharedLockBroker {
    pub fn new(config: EngineConfig, shutdown: CancellationToken) -> Arc<Self> {
        if config.overflow == OverflowPolicy::Block {
            warn!("[shared_lock] blocking overflow is not supported, dropping on full queues instead");
        }
        info!("[shared_lock] engine ready");
        Arc::new(Self {
            registry: RwLock::new(Registry::new()),
            fanout: Fanout::new(config.projection, OverflowPolicy::Drop),
            shutdown,
        })
    }
}

#[async_trait]
impl Broker for SharedLockBroker {
    fn name(&self) -> &'static str {
        "shared_lock"
    }

    async fn publish(&self, timeout: Duration, ticks: Vec<Tick>) -> Result<(), PublishError> {
        if self.shutdown.is_cancelled() {
            return Err(PublishError::Closed);
        }
        let registry = tokio::time::timeout(timeout, self.registry.read()).await.map_err(|_| PublishError::TimedOut)?;
        self.fanout.try_deliver(&registry, &ticks);
        Ok(())
    }

    async fn subscribe(&self, subscriber: SubscriberRef, request: SubscriptionRequest) {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => trace!("[shared_lock] shutting down, subscription dropped"),
            mut registry = self.registry.write() => {
                registry.apply(&subscriber, request.mode, &request.instruments);
            }
        }
    }

    async fn unsubscribe(&self, subscriber: SubscriberRef) {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => trace!("[shared_lock] shutting down, unsubscribe dropped"),
            mut registry = self.registry.write() => {
                let removed = registry.remove_everywhere(&subscriber);
                debug!("[shared_lock] removed client-{} from {removed} instruments", subscriber.id());
            }
        }
    }

    async fn subscribers_of(&self, instrument: InstrumentId) -> Vec<(SubscriberRef, Mode)> {
        let registry = self.registry.read().await;
        registry.subscribers_of(instrument).map(|(s, m)| (s.clone(), m)).collect()
    }

    fn stats(&self) -> FanoutStats {
        self.fanout.stats()
    }
}
