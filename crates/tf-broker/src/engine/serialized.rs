//! Serialized engine: one control task, one ordered intake.
//!
//! Publishes and registry commands share a single bounded queue, so every
//! command is applied in submission order relative to every batch. A batch
//! published after a subscribe is fanned out against a registry that already
//! contains it; a batch published after an unsubscribe never reaches it.
//!
//! The control task owns the registry outright; nothing else touches it.
//!
//! With [`OverflowPolicy::Block`] fan-out waits on a full subscriber queue,
//! and the whole loop waits with it. One slow reader therefore delays every
//! other subscriber and, once the intake fills, every publisher (which then
//! sees [`PublishError::TimedOut`]). The wait ends when that subscriber
//! drains or closes.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tf_core::{InstrumentId, Mode, PublishError, SubscriptionRequest, Tick, config::OverflowPolicy};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{Broker, EngineConfig, Fanout, FanoutStats, Registry};
use crate::actor::SubscriberRef;

enum Input {
    Publish(Vec<Tick>),
    Apply { subscriber: SubscriberRef, request: SubscriptionRequest },
    Remove { subscriber: SubscriberRef },
    Inspect { instrument: InstrumentId, reply: oneshot::Sender<Vec<(SubscriberRef, Mode)>> },
}

pub struct SerializedBroker {
    intake: mpsc::Sender<Input>,
    fanout: Arc<Fanout>,
    shutdown: CancellationToken,
}

impl SerializedBroker {
    /// Start the control task and return a handle to it.
    pub fn spawn(config: EngineConfig, shutdown: CancellationToken) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.intake_capacity.max(1));
        let fanout = Arc::new(Fanout::new(config.projection, config.overflow));

        tokio::spawn(control_loop(rx, fanout.clone(), shutdown.clone()));

        Arc::new(Self { intake: tx, fanout, shutdown })
    }

    /// Enqueue a registry command, waiting for room. Dropped on shutdown.
    async fn submit(&self, input: Input) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            res = self.intake.send(input) => res.is_ok(),
        }
    }
}

#[async_trait]
impl Broker for SerializedBroker {
    fn name(&self) -> &'static str {
        "serialized"
    }

    async fn publish(&self, timeout: Duration, ticks: Vec<Tick>) -> Result<(), PublishError> {
        if self.shutdown.is_cancelled() {
            return Err(PublishError::Closed);
        }
        match tokio::time::timeout(timeout, self.intake.send(Input::Publish(ticks))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(PublishError::Closed),
            Err(_) => Err(PublishError::TimedOut),
        }
    }

    async fn subscribe(&self, subscriber: SubscriberRef, request: SubscriptionRequest) {
        if !self.submit(Input::Apply { subscriber, request }).await {
            trace!("[serialized] shutting down, subscription dropped");
        }
    }

    async fn unsubscribe(&self, subscriber: SubscriberRef) {
        if !self.submit(Input::Remove { subscriber }).await {
            trace!("[serialized] shutting down, unsubscribe dropped");
        }
    }

    async fn subscribers_of(&self, instrument: InstrumentId) -> Vec<(SubscriberRef, Mode)> {
        let (reply, rx) = oneshot::channel();
        if !self.submit(Input::Inspect { instrument, reply }).await {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    fn stats(&self) -> FanoutStats {
        self.fanout.stats()
    }
}

async fn control_loop(mut intake: mpsc::Receiver<Input>, fanout: Arc<Fanout>, shutdown: CancellationToken) {
    let mut registry = Registry::new();
    let blocking = fanout.overflow() == OverflowPolicy::Block;
    info!("[serialized] control loop started (overflow: {})", fanout.overflow());

    loop {
        let input = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            input = intake.recv() => match input {
                Some(input) => input,
                None => break,
            },
        };

        match input {
            Input::Publish(ticks) if blocking => {
                // A stalled subscriber holds the loop here; shutdown still wins.
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = fanout.deliver(&registry, &ticks) => {}
                }
            }
            Input::Publish(ticks) => fanout.try_deliver(&registry, &ticks),
            Input::Apply { subscriber, request } => {
                registry.apply(&subscriber, request.mode, &request.instruments);
            }
            Input::Remove { subscriber } => {
                let removed = registry.remove_everywhere(&subscriber);
                debug!("[serialized] removed client-{} from {removed} instruments", subscriber.id());
            }
            Input::Inspect { instrument, reply } => {
                let subs = registry.subscribers_of(instrument).map(|(s, m)| (s.clone(), m)).collect();
                let _ = reply.send(subs);
            }
        }
    }

    intake.close();
    info!(
        "[serialized] control loop stopped ({} instruments, {} subscribers)",
        registry.instrument_count(),
        registry.subscriber_count()
    );
}
