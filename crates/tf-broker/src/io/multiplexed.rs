//! Shared readiness pollers with a bounded dispatcher pool.
//!
//! A fixed number of dispatcher tasks each watch a set of armed connections.
//! When one becomes readable its dispatcher does no reading itself: it parks
//! the (now buffered) stream in the actor's one-slot mailbox and wakes the
//! actor. The actor's read task drains every frame already available, then
//! hands the stream back to the same dispatcher to be armed again.
//!
//! Arming is one-shot, so a connection is never signalled twice for the same
//! data, and a burst of frames costs a single wakeup. The wake signal itself
//! is a [`Notify`], which holds at most one permit: repeated signals before
//! the actor runs coalesce and the notifier never waits on the actor.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures_util::{
    FutureExt, StreamExt,
    stream::{FuturesUnordered, Peekable},
};
use parking_lot::Mutex;
use tf_core::TfError;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ReadinessStrategy;
use crate::{actor::SubscriberRef, engine::Broker, transport::FrameStream};

type ArmedStream = Peekable<FrameStream>;

/// Where a dispatcher leaves a readable stream for its actor.
#[derive(Default)]
struct Mailbox {
    slot: Mutex<Option<ArmedStream>>,
    ready: Notify,
}

/// A connection waiting for its next readiness notification.
struct Arm {
    actor: SubscriberRef,
    mailbox: Arc<Mailbox>,
    stream: ArmedStream,
}

pub struct ReadinessPool {
    dispatchers: Vec<mpsc::UnboundedSender<Arm>>,
    next: AtomicUsize,
}

impl ReadinessPool {
    /// Start `dispatchers` dispatcher tasks (at least one).
    pub fn spawn(dispatchers: usize, shutdown: CancellationToken) -> Arc<Self> {
        let count = dispatchers.max(1);
        let senders = (0..count)
            .map(|idx| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(dispatch_loop(idx, rx, shutdown.clone()));
                tx
            })
            .collect();
        info!("[multiplexed] {count} dispatchers started");
        Arc::new(Self { dispatchers: senders, next: AtomicUsize::new(0) })
    }

    pub fn dispatcher_count(&self) -> usize {
        self.dispatchers.len()
    }
}

impl ReadinessStrategy for ReadinessPool {
    fn name(&self) -> &'static str {
        "multiplexed"
    }

    fn attach(&self, actor: SubscriberRef, reader: FrameStream, broker: Arc<dyn Broker>) -> Result<(), TfError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.dispatchers.len();
        let dispatcher = self.dispatchers[idx].clone();
        let mailbox = Arc::new(Mailbox::default());

        let arm = Arm { actor: actor.clone(), mailbox: mailbox.clone(), stream: reader.peekable() };
        dispatcher.send(arm).map_err(|_| TfError::Spawn(format!("dispatcher {idx} has stopped")))?;

        tokio::spawn(read_duty(actor, mailbox, dispatcher, broker));
        Ok(())
    }
}

/// Wait until the stream has something buffered, or the actor goes away.
async fn wait_readable(mut arm: Arm) -> Arm {
    tokio::select! {
        _ = Pin::new(&mut arm.stream).peek() => {}
        _ = arm.actor.cancelled() => {}
    }
    arm
}

async fn dispatch_loop(idx: usize, mut arms: mpsc::UnboundedReceiver<Arm>, shutdown: CancellationToken) {
    let mut waiting = FuturesUnordered::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            arm = arms.recv() => match arm {
                Some(arm) => waiting.push(wait_readable(arm)),
                None => break,
            },
            Some(arm) = waiting.next(), if !waiting.is_empty() => {
                // A closed actor's stream is dropped here, which releases the socket.
                if arm.actor.is_open() {
                    *arm.mailbox.slot.lock() = Some(arm.stream);
                    arm.mailbox.ready.notify_one();
                }
            }
        }
    }

    debug!("[multiplexed] dispatcher {idx} stopped ({} armed)", waiting.len());
}

async fn read_duty(
    actor: SubscriberRef,
    mailbox: Arc<Mailbox>,
    dispatcher: mpsc::UnboundedSender<Arm>,
    broker: Arc<dyn Broker>,
) {
    'duty: loop {
        tokio::select! {
            biased;
            _ = actor.cancelled() => break,
            _ = mailbox.ready.notified() => {}
        }

        let Some(mut stream) = mailbox.slot.lock().take() else {
            continue;
        };

        // Consume everything already buffered without waiting for more.
        while let Some(event) = stream.next().now_or_never() {
            if actor.on_read(event, &*broker).await.is_break() {
                break 'duty;
            }
        }

        let arm = Arm { actor: actor.clone(), mailbox: mailbox.clone(), stream };
        if dispatcher.send(arm).is_err() {
            debug!("[client-{}] dispatcher gone, stopping reads", actor.id());
            break;
        }
    }

    actor.close(&*broker).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tf_core::Mode;

    use super::*;
    use crate::{
        actor::{ActorState, ClientActor},
        testing::{RecordedCall, RecordingBroker, frame_channel, text},
    };

    #[tokio::test]
    async fn one_dispatcher_serves_many_connections() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let pool = ReadinessPool::spawn(1, root.clone());

        let mut senders = Vec::new();
        let mut actors = Vec::new();
        for id in 0..20 {
            let (actor, outbox) = ClientActor::new(id, 8, &root);
            let (tx, frames) = frame_channel();
            pool.attach(actor.clone(), frames, broker.clone()).unwrap();
            senders.push(tx);
            actors.push((actor, outbox));
        }
        for tx in &senders {
            tx.send(text(r#"{"m":1,"i":[1]}"#)).unwrap();
        }

        assert!(broker.wait_for(|calls| calls.len() == 20).await);
        assert!(actors.iter().all(|(a, _)| a.is_open()));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_processed_in_order_and_connection_rearms() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let pool = ReadinessPool::spawn(2, root.clone());
        let (actor, _outbox) = ClientActor::new(9, 8, &root);
        let (tx, frames) = frame_channel();
        pool.attach(actor.clone(), frames, broker.clone()).unwrap();

        for mode in [1, 2, 3] {
            tx.send(text(&format!(r#"{{"m":{mode},"i":[4]}}"#))).unwrap();
        }
        assert!(broker.wait_for(|calls| calls.len() == 3).await);

        // Later traffic still arrives after the first drain.
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(text(r#"{"m":0,"i":[4]}"#)).unwrap();
        assert!(broker.wait_for(|calls| calls.len() == 4).await);

        let modes: Vec<_> = broker
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Subscribe(_, req) => Some(req.mode),
                _ => None,
            })
            .collect();
        assert_eq!(modes, vec![Mode::Ltp, Mode::Quote, Mode::Full, Mode::None]);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_frame_closes_the_actor() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let pool = ReadinessPool::spawn(1, root.clone());
        let (actor, _outbox) = ClientActor::new(2, 8, &root);
        let (tx, frames) = frame_channel();
        pool.attach(actor.clone(), frames, broker.clone()).unwrap();

        tx.send(Ok(crate::transport::Frame::Close)).unwrap();
        assert!(broker.wait_for(|calls| calls.contains(&RecordedCall::Unsubscribe(2))).await);
        assert_eq!(actor.state(), ActorState::Closing);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_elsewhere_stops_the_read_duty() {
        let root = CancellationToken::new();
        let broker = RecordingBroker::new();
        let pool = ReadinessPool::spawn(1, root.clone());
        let (actor, _outbox) = ClientActor::new(6, 8, &root);
        let (tx, frames) = frame_channel();
        pool.attach(actor.clone(), frames, broker.clone()).unwrap();

        actor.close(&*broker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The dispatcher has dropped the stream, so the sender sees it closed.
        assert!(tx.send(text(r#"{"m":1,"i":[1]}"#)).is_err());
        assert_eq!(broker.subscribes(), 0);
        assert_eq!(broker.unsubscribes(), 1);
    }
}
