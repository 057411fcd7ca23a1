//! Test doubles shared by the unit tests.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tf_core::{InstrumentId, Mode, PublishError, SubscriptionRequest, Tick, TransportError};
use tokio::sync::mpsc;

use crate::{
    actor::{Outbox, SubscriberRef},
    engine::{Broker, FanoutStats},
    transport::{Frame, FrameSink, FrameStream},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    Subscribe(u64, SubscriptionRequest),
    Unsubscribe(u64),
}

/// Broker that only records registry commands.
#[derive(Default)]
pub struct RecordingBroker {
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn subscribes(&self) -> usize {
        self.calls.lock().iter().filter(|c| matches!(c, RecordedCall::Subscribe(..))).count()
    }

    pub fn unsubscribes(&self) -> usize {
        self.calls.lock().iter().filter(|c| matches!(c, RecordedCall::Unsubscribe(_))).count()
    }

    /// Poll until `cond` holds or a second passes.
    pub async fn wait_for(&self, cond: impl Fn(&[RecordedCall]) -> bool) -> bool {
        for _ in 0..100 {
            if cond(&self.calls.lock()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn publish(&self, _timeout: Duration, _ticks: Vec<Tick>) -> Result<(), PublishError> {
        Ok(())
    }

    async fn subscribe(&self, subscriber: SubscriberRef, request: SubscriptionRequest) {
        self.calls.lock().push(RecordedCall::Subscribe(subscriber.id(), request));
    }

    async fn unsubscribe(&self, subscriber: SubscriberRef) {
        self.calls.lock().push(RecordedCall::Unsubscribe(subscriber.id()));
    }

    async fn subscribers_of(&self, _instrument: InstrumentId) -> Vec<(SubscriberRef, Mode)> {
        Vec::new()
    }

    fn stats(&self) -> FanoutStats {
        FanoutStats::default()
    }
}

/// Sink that forwards every written frame to a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Frame>,
    delay: Duration,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        Self::with_delay(Duration::ZERO)
    }

    /// Every write takes `delay`, like a slow socket.
    pub fn with_delay(delay: Duration) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, delay }, rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Sink whose writes never complete, like a peer that stopped reading and
/// let its TCP window fill.
pub struct StuckSink;

#[async_trait]
impl FrameSink for StuckSink {
    async fn send(&mut self, _frame: Frame) -> Result<(), TransportError> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        std::future::pending().await
    }
}

/// A frame stream fed by hand. Dropping the sender ends the stream.
pub fn frame_channel() -> (mpsc::UnboundedSender<Result<Frame, TransportError>>, FrameStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
    (tx, stream.boxed())
}

pub fn text(json: &str) -> Result<Frame, TransportError> {
    Ok(Frame::Text(json.to_string()))
}

/// Everything currently sitting in an outbox.
pub fn drain(outbox: &mut Outbox) -> Vec<Bytes> {
    let mut out = Vec::new();
    while let Ok(msg) = outbox.try_recv() {
        out.push(msg);
    }
    out
}
