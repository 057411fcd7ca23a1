//! Per-connection client actor.
//!
//! Each accepted connection gets one [`ClientActor`] holding:
//!
//! - a bounded outbound queue of encoded tick messages (the broker enqueues,
//!   the write duty drains),
//! - a cancellation token derived from the server's shutdown token,
//! - a liveness clock refreshed by every inbound frame.
//!
//! The actor moves `Open → Closing → Closed` exactly once. The first path to
//! notice the connection is gone (read failure, write failure, idle timeout,
//! shutdown) performs the close; every later attempt is a no-op. Closing
//! cancels the token, which unblocks anyone waiting to enqueue, and asks the
//! broker to remove the subscriber everywhere.
//!
//! Inbound handling lives in [`SubscriberRef::on_read`] so the dedicated and
//! multiplexed read strategies drive the same state machine.

use std::{
    fmt,
    hash::{Hash, Hasher},
    ops::{ControlFlow, Deref},
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tf_core::{
    Enqueue, SubscriptionRequest, TransportError,
    config::{ServerConfig, WriteMode},
};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use crate::{
    engine::Broker,
    io::ReadinessStrategy,
    transport::{BoxSink, Frame, FrameSink, FrameStream},
};

/// Per-connection settings, copied out of [`ServerConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ActorConfig {
    pub outbound_capacity: usize,
    pub write_mode: WriteMode,
    pub flush_interval: Duration,
    pub read_timeout: Duration,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
}

impl ActorConfig {
    pub fn from_server(cfg: &ServerConfig) -> Self {
        Self {
            outbound_capacity: cfg.outbound_capacity(),
            write_mode: cfg.write_mode(),
            flush_interval: cfg.flush_interval(),
            read_timeout: cfg.read_timeout(),
            ping_interval: cfg.ping_interval(),
            write_timeout: cfg.write_timeout(),
        }
    }
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self::from_server(&ServerConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActorState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ActorState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ActorState::Open,
            1 => ActorState::Closing,
            _ => ActorState::Closed,
        }
    }
}

/// A batched write is flushed early once it reaches this size.
const MAX_BATCH_BYTES: usize = 1 << 20;

/// Receiving end of an actor's outbound queue, owned by its write duty.
pub type Outbox = mpsc::Receiver<Bytes>;

pub struct ClientActor {
    id: u64,
    outbound: mpsc::Sender<Bytes>,
    state: AtomicU8,
    cancel: CancellationToken,
    last_seen: Mutex<Instant>,
    dropped: AtomicU64,
}

/// Shared handle to a [`ClientActor`].
///
/// Equality and hashing go by identity, so the handle can key the
/// subscription registry directly. The numeric id is only for logs.
#[derive(Clone)]
pub struct SubscriberRef(Arc<ClientActor>);

impl ClientActor {
    /// Create an open actor whose token is a child of `parent`.
    pub fn new(id: u64, outbound_capacity: usize, parent: &CancellationToken) -> (SubscriberRef, Outbox) {
        let (tx, rx) = mpsc::channel(outbound_capacity.max(1));
        let actor = ClientActor {
            id,
            outbound: tx,
            state: AtomicU8::new(ActorState::Open as u8),
            cancel: parent.child_token(),
            last_seen: Mutex::new(Instant::now()),
            dropped: AtomicU64::new(0),
        };
        (SubscriberRef(Arc::new(actor)), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ActorState {
        ActorState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ActorState::Open && !self.cancel.is_cancelled()
    }

    /// Queue a message without waiting. A full queue drops it and bumps the
    /// actor's drop counter.
    pub fn try_enqueue(&self, msg: Bytes) -> Enqueue {
        if !self.is_open() {
            return Enqueue::Closed;
        }
        match self.outbound.try_send(msg) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::Full
            }
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Queue a message, waiting for space. Returns [`Enqueue::Closed`] as soon
    /// as the actor starts closing, even if the wait has not finished.
    pub async fn enqueue(&self, msg: Bytes) -> Enqueue {
        if !self.is_open() {
            return Enqueue::Closed;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Enqueue::Closed,
            res = self.outbound.send(msg) => match res {
                Ok(()) => Enqueue::Queued,
                Err(_) => Enqueue::Closed,
            },
        }
    }

    /// Refresh the liveness clock.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Messages dropped because the outbound queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Resolves once the actor starts closing or the server shuts down.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    fn begin_close(&self) -> bool {
        self.state
            .compare_exchange(ActorState::Open as u8, ActorState::Closing as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish_close(&self) {
        self.state.store(ActorState::Closed as u8, Ordering::Release);
    }
}

impl SubscriberRef {
    /// Start closing. Only the first caller does anything: it cancels the
    /// actor and removes it from the broker. Returns whether this call did it.
    pub async fn close(&self, broker: &dyn Broker) -> bool {
        if !self.begin_close() {
            return false;
        }
        self.cancel.cancel();
        broker.unsubscribe(self.clone()).await;
        debug!("[client-{}] closing", self.id);
        true
    }

    /// Handle one read-side event. `None` is end of stream.
    ///
    /// Malformed requests are logged and skipped; the connection stays up.
    pub async fn on_read(&self, event: Option<Result<Frame, TransportError>>, broker: &dyn Broker) -> ControlFlow<()> {
        let frame = match event {
            None => {
                debug!("[client-{}] stream ended", self.id);
                return ControlFlow::Break(());
            }
            Some(Err(e)) => {
                if e.is_close() {
                    debug!("[client-{}] peer went away", self.id);
                } else {
                    warn!("[client-{}] read failed: {e}", self.id);
                }
                return ControlFlow::Break(());
            }
            Some(Ok(frame)) => frame,
        };

        self.touch();
        match frame {
            Frame::Text(text) => match SubscriptionRequest::decode(&text) {
                Ok(req) => {
                    debug!(client = self.id, mode = %req.mode, count = req.instruments.len(), "subscription request");
                    broker.subscribe(self.clone(), req).await;
                }
                Err(e) => warn!("[client-{}] ignoring request: {e}", self.id),
            },
            Frame::Ping(_) | Frame::Pong(_) => {}
            Frame::Binary(data) => warn!("[client-{}] unexpected binary frame ({} bytes)", self.id, data.len()),
            Frame::Close => {
                debug!("[client-{}] close frame received", self.id);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn ptr_eq(&self, other: &SubscriberRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for SubscriberRef {
    type Target = ClientActor;

    fn deref(&self) -> &ClientActor {
        &self.0
    }
}

impl PartialEq for SubscriberRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for SubscriberRef {}

impl Hash for SubscriberRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for SubscriberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}({:?})", self.id, self.state())
    }
}

/// Drive one connection from attach to teardown.
///
/// The read duty is handed to `io`; the write duty runs here next to a
/// liveness watchdog. Whichever stops first closes the actor, which stops the
/// rest. The watchdog does not share a task with any write, so a peer that
/// stops reading cannot keep the connection open past the read deadline.
pub async fn run_session(
    actor: SubscriberRef,
    outbox: Outbox,
    mut sink: BoxSink,
    reader: FrameStream,
    io: &dyn ReadinessStrategy,
    broker: Arc<dyn Broker>,
    config: &ActorConfig,
) {
    info!("[client-{}] connected", actor.id);

    if let Err(e) = io.attach(actor.clone(), reader, broker.clone()) {
        warn!("[client-{}] could not start read duty: {e}", actor.id);
        actor.close(&*broker).await;
    }

    tokio::select! {
        _ = write_duty(&actor, outbox, sink.as_mut(), config) => {}
        _ = watch_liveness(&actor, config.read_timeout) => {}
    }

    actor.close(&*broker).await;
    match tokio::time::timeout(config.write_timeout, sink.close()).await {
        Ok(Err(e)) if !e.is_close() => debug!("[client-{}] close handshake failed: {e}", actor.id),
        Ok(_) => {}
        Err(_) => debug!("[client-{}] close handshake timed out", actor.id),
    }
    actor.finish_close();

    info!("[client-{}] disconnected (dropped {} messages)", actor.id, actor.dropped());
}

/// Resolves once no inbound frame has arrived for `read_timeout`.
async fn watch_liveness(actor: &ClientActor, read_timeout: Duration) {
    loop {
        let idle = actor.idle_for();
        if idle >= read_timeout {
            warn!("[client-{}] no traffic for {idle:?}, closing", actor.id);
            return;
        }
        tokio::time::sleep(read_timeout - idle).await;
    }
}

/// Drain the outbox onto the transport until the actor closes or a write
/// fails or stalls. Also sends heartbeats.
async fn write_duty(actor: &ClientActor, mut outbox: Outbox, sink: &mut dyn FrameSink, config: &ActorConfig) {
    let batched = config.write_mode == WriteMode::Batched;
    let mut buf = BytesMut::new();

    let mut flush = tokio::time::interval(config.flush_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Timers go ahead of the outbox so a busy queue cannot starve them.
        let frame = tokio::select! {
            biased;
            _ = actor.cancelled() => break,
            _ = ping.tick() => Frame::Ping(Bytes::new()),
            _ = flush.tick(), if batched => {
                if buf.is_empty() {
                    continue;
                }
                Frame::Binary(buf.split().freeze())
            }
            msg = outbox.recv() => match msg {
                None => break,
                Some(msg) if batched => {
                    buf.extend_from_slice(&msg);
                    if buf.len() < MAX_BATCH_BYTES {
                        continue;
                    }
                    Frame::Binary(buf.split().freeze())
                }
                Some(msg) => Frame::Binary(msg),
            },
        };

        let written = tokio::select! {
            biased;
            _ = actor.cancelled() => break,
            res = tokio::time::timeout(config.write_timeout, sink.send(frame)) => res,
        };

        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if e.is_close() {
                    debug!("[client-{}] peer went away during write", actor.id);
                } else {
                    warn!("[client-{}] write failed: {e}", actor.id);
                }
                break;
            }
            Err(_) => {
                warn!("[client-{}] write stalled for {:?}, closing", actor.id, config.write_timeout);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tf_core::{InstrumentId, Mode, config::OverflowPolicy};

    use super::*;
    use crate::{
        engine::{
            SerializedBroker,
            test_support::{batch, config as engine_config},
        },
        io::ReadinessPool,
        testing::{ChannelSink, RecordedCall, RecordingBroker, StuckSink, drain, frame_channel},
    };

    fn quick_liveness() -> ActorConfig {
        ActorConfig {
            read_timeout: Duration::from_millis(80),
            ping_interval: Duration::from_millis(20),
            write_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let root = CancellationToken::new();
        let (actor, _outbox) = ClientActor::new(1, 2, &root);

        assert_eq!(actor.try_enqueue(Bytes::from_static(b"a")), Enqueue::Queued);
        assert_eq!(actor.try_enqueue(Bytes::from_static(b"b")), Enqueue::Queued);
        assert_eq!(actor.try_enqueue(Bytes::from_static(b"c")), Enqueue::Full);
        assert_eq!(actor.dropped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_enqueue_returns_when_actor_closes() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let (actor, _outbox) = ClientActor::new(1, 1, &root);
        assert_eq!(actor.enqueue(Bytes::from_static(b"a")).await, Enqueue::Queued);

        let waiter = {
            let actor = actor.clone();
            tokio::spawn(async move { actor.enqueue(Bytes::from_static(b"b")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        actor.close(&*broker).await;
        assert_eq!(waiter.await.unwrap(), Enqueue::Closed);
        assert_eq!(actor.try_enqueue(Bytes::from_static(b"c")), Enqueue::Closed);
    }

    #[tokio::test]
    async fn close_happens_once() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let (actor, _outbox) = ClientActor::new(1, 4, &root);

        assert!(actor.close(&*broker).await);
        assert!(!actor.close(&*broker).await);
        assert_eq!(broker.unsubscribes(), 1);
        assert_eq!(actor.state(), ActorState::Closing);
    }

    #[tokio::test]
    async fn shutdown_cancels_every_actor() {
        let root = CancellationToken::new();
        let (a, _oa) = ClientActor::new(1, 4, &root);
        let (b, _ob) = ClientActor::new(2, 4, &root);
        root.cancel();
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert_eq!(a.try_enqueue(Bytes::new()), Enqueue::Closed);
    }

    #[tokio::test]
    async fn handles_are_keyed_by_identity() {
        let root = CancellationToken::new();
        let (a, _oa) = ClientActor::new(5, 4, &root);
        let (b, _ob) = ClientActor::new(5, 4, &root);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn text_frames_become_subscriptions() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let (actor, _outbox) = ClientActor::new(1, 4, &root);

        let flow = actor.on_read(Some(Ok(Frame::Text(r#"{"m":2,"i":[7,9]}"#.into()))), &*broker).await;
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(broker.calls(), vec![RecordedCall::Subscribe(1, SubscriptionRequest::new(Mode::Quote, [7, 9]))]);
    }

    #[tokio::test]
    async fn malformed_request_keeps_connection_open() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let (actor, _outbox) = ClientActor::new(1, 4, &root);

        for text in ["{not json", r#"{"m":9,"i":[1]}"#, r#"{"m":1,"i":"x"}"#] {
            let flow = actor.on_read(Some(Ok(Frame::Text(text.into()))), &*broker).await;
            assert_eq!(flow, ControlFlow::Continue(()));
        }
        assert!(broker.calls().is_empty());
        assert!(actor.is_open());
    }

    #[tokio::test]
    async fn close_and_errors_stop_the_read_duty() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let (actor, _outbox) = ClientActor::new(1, 4, &root);

        assert!(actor.on_read(Some(Ok(Frame::Close)), &*broker).await.is_break());
        assert!(actor.on_read(None, &*broker).await.is_break());
        assert!(actor.on_read(Some(Err(TransportError::Io("reset".into()))), &*broker).await.is_break());
        assert!(actor.on_read(Some(Ok(Frame::Pong(Bytes::new()))), &*broker).await.is_continue());
        assert!(actor.on_read(Some(Ok(Frame::Binary(Bytes::new()))), &*broker).await.is_continue());
    }

    #[tokio::test]
    async fn immediate_mode_writes_one_message_per_item() {
        let root = CancellationToken::new();
        let (actor, outbox) = ClientActor::new(1, 8, &root);
        let (mut sink, mut written) = ChannelSink::new();

        actor.try_enqueue(Bytes::from_static(b"one"));
        actor.try_enqueue(Bytes::from_static(b"two"));

        let duty = {
            let actor = actor.clone();
            tokio::spawn(async move { write_duty(&actor, outbox, &mut sink, &ActorConfig::default()).await })
        };

        assert_eq!(written.recv().await, Some(Frame::Binary(Bytes::from_static(b"one"))));
        assert_eq!(written.recv().await, Some(Frame::Binary(Bytes::from_static(b"two"))));

        root.cancel();
        duty.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn batched_mode_coalesces_within_a_flush() {
        let root = CancellationToken::new();
        let (actor, outbox) = ClientActor::new(1, 8, &root);
        let (mut sink, mut written) = ChannelSink::new();
        let config =
            ActorConfig { write_mode: WriteMode::Batched, flush_interval: Duration::from_millis(50), ..Default::default() };

        let duty = {
            let actor = actor.clone();
            tokio::spawn(async move { write_duty(&actor, outbox, &mut sink, &config).await })
        };

        actor.try_enqueue(Bytes::from_static(b"ab"));
        actor.try_enqueue(Bytes::from_static(b"cd"));
        actor.try_enqueue(Bytes::from_static(b"ef"));

        let frame = tokio::time::timeout(Duration::from_secs(1), written.recv()).await.unwrap();
        assert_eq!(frame, Some(Frame::Binary(Bytes::from_static(b"abcdef"))));

        root.cancel();
        duty.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn batched_mode_flushes_early_when_the_buffer_is_large() {
        let root = CancellationToken::new();
        let (actor, outbox) = ClientActor::new(1, 8, &root);
        let (mut sink, mut written) = ChannelSink::new();
        let config =
            ActorConfig { write_mode: WriteMode::Batched, flush_interval: Duration::from_secs(3600), ..Default::default() };

        let duty = {
            let actor = actor.clone();
            tokio::spawn(async move { write_duty(&actor, outbox, &mut sink, &config).await })
        };
        actor.try_enqueue(Bytes::from(vec![0u8; MAX_BATCH_BYTES / 2]));
        actor.try_enqueue(Bytes::from(vec![1u8; MAX_BATCH_BYTES / 2]));

        let frame = tokio::time::timeout(Duration::from_secs(1), written.recv()).await.unwrap();
        match frame {
            Some(Frame::Binary(data)) => assert_eq!(data.len(), MAX_BATCH_BYTES),
            other => panic!("expected one full batch, got {other:?}"),
        }

        root.cancel();
        duty.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_go_out_while_the_queue_stays_busy() {
        let root = CancellationToken::new();
        let (actor, outbox) = ClientActor::new(1, 4096, &root);
        let (mut sink, mut written) = ChannelSink::with_delay(Duration::from_millis(1));
        let config = ActorConfig { ping_interval: Duration::from_millis(20), ..Default::default() };

        for _ in 0..4096 {
            actor.try_enqueue(Bytes::from_static(b"x"));
        }
        let duty = {
            let actor = actor.clone();
            tokio::spawn(async move { write_duty(&actor, outbox, &mut sink, &config).await })
        };

        tokio::time::sleep(Duration::from_millis(25)).await;
        let mut saw_ping = false;
        while let Ok(frame) = written.try_recv() {
            saw_ping |= frame == Frame::Ping(Bytes::new());
        }
        assert!(saw_ping);

        root.cancel();
        duty.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_is_closed_after_read_timeout() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let (actor, outbox) = ClientActor::new(1, 8, &root);
        let (sink, mut written) = ChannelSink::new();
        let (_frames_tx, frames) = frame_channel();
        let io = ReadinessPool::spawn(1, root.clone());

        let liveness = quick_liveness();
        let session = tokio::time::timeout(
            Duration::from_secs(2),
            run_session(actor.clone(), outbox, Box::new(sink), frames, &*io, broker.clone(), &liveness),
        );
        session.await.expect("idle client should be closed");

        assert_eq!(actor.state(), ActorState::Closed);
        assert_eq!(broker.unsubscribes(), 1);
        assert_eq!(written.recv().await, Some(Frame::Ping(Bytes::new())));
    }

    #[tokio::test(start_paused = true)]
    async fn read_deadline_closes_a_client_whose_writes_hang() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let (actor, outbox) = ClientActor::new(1, 8, &root);
        let (_frames_tx, frames) = frame_channel();
        let io = ReadinessPool::spawn(1, root.clone());
        let config = quick_liveness();
        actor.try_enqueue(Bytes::from_static(b"tick"));

        let started = Instant::now();
        let session = tokio::time::timeout(
            Duration::from_secs(5),
            run_session(actor.clone(), outbox, Box::new(StuckSink), frames, &*io, broker.clone(), &config),
        );
        session.await.expect("hung writer should be closed");

        // Read deadline plus the bounded close handshake; a write timeout
        // would have taken twice the write timeout.
        assert!(started.elapsed() < config.read_timeout + config.write_timeout + Duration::from_millis(100));
        assert_eq!(actor.state(), ActorState::Closed);
        assert_eq!(broker.unsubscribes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn write_timeout_closes_a_client_that_keeps_talking() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let (actor, outbox) = ClientActor::new(1, 8, &root);
        let (frames_tx, frames) = frame_channel();
        let io = ReadinessPool::spawn(1, root.clone());
        let config = ActorConfig { write_timeout: Duration::from_millis(200), ..Default::default() };
        actor.try_enqueue(Bytes::from_static(b"tick"));

        // Inbound pongs keep the read deadline fresh the whole time.
        let chatter = tokio::spawn(async move {
            loop {
                if frames_tx.send(Ok(Frame::Pong(Bytes::new()))).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let session = tokio::time::timeout(
            Duration::from_secs(5),
            run_session(actor.clone(), outbox, Box::new(StuckSink), frames, &*io, broker.clone(), &config),
        );
        session.await.expect("stalled write should close the client");
        assert_eq!(actor.state(), ActorState::Closed);
        assert_eq!(broker.unsubscribes(), 1);
        chatter.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_hung_write() {
        let root = CancellationToken::new();
        let (actor, outbox) = ClientActor::new(1, 8, &root);
        actor.try_enqueue(Bytes::from_static(b"tick"));

        let duty = {
            let actor = actor.clone();
            tokio::spawn(async move { write_duty(&actor, outbox, &mut StuckSink, &ActorConfig::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!duty.is_finished());

        root.cancel();
        tokio::time::timeout(Duration::from_secs(1), duty).await.expect("write duty should stop on cancel").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn hung_subscriber_stops_stalling_blocking_fanout() {
        let root = CancellationToken::new();
        let broker: Arc<dyn Broker> = SerializedBroker::spawn(engine_config(16, OverflowPolicy::Block), root.clone());
        let (stuck, outbox) = ClientActor::new(1, 1, &root);
        let (healthy, mut healthy_box) = ClientActor::new(2, 64, &root);
        let request = SubscriptionRequest::new(Mode::Ltp, [1]);
        broker.subscribe(stuck.clone(), request.clone()).await;
        broker.subscribe(healthy.clone(), request).await;

        let (_frames_tx, frames) = frame_channel();
        let io = ReadinessPool::spawn(1, root.clone());
        let session = {
            let (stuck, broker) = (stuck.clone(), broker.clone());
            tokio::spawn(async move {
                run_session(stuck, outbox, Box::new(StuckSink), frames, &*io, broker, &quick_liveness()).await
            })
        };

        broker.publish(Duration::from_secs(1), batch(&[1, 1, 1, 1])).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), session).await.expect("hung session should end").unwrap();
        assert_eq!(stuck.state(), ActorState::Closed);

        let subs = tokio::time::timeout(Duration::from_secs(1), broker.subscribers_of(InstrumentId(1)))
            .await
            .expect("control loop should be responsive");
        assert_eq!(subs.len(), 1);
        assert!(subs[0].0.ptr_eq(&healthy));

        broker.publish(Duration::from_secs(1), batch(&[1])).await.unwrap();
        broker.subscribers_of(InstrumentId(1)).await;
        assert_eq!(drain(&mut healthy_box).len(), 5);
    }
}
