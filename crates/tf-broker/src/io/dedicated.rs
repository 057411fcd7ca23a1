//! One blocked OS thread per connection.
//!
//! Each connection's read duty runs on its own named thread, driving the
//! async stream with `Handle::block_on`. Simple, and it costs one thread
//! stack per connection. The runtime behind the handle must be multi-threaded
//! so its I/O driver keeps running while these threads block.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use futures_util::StreamExt;
use tf_core::TfError;
use tokio::runtime::Handle;
use tracing::debug;

use super::ReadinessStrategy;
use crate::{actor::SubscriberRef, engine::Broker, transport::FrameStream};

pub struct DedicatedThreads {
    runtime: Handle,
    live: Arc<AtomicUsize>,
}

impl DedicatedThreads {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime, live: Arc::new(AtomicUsize::new(0)) }
    }

    /// Use the runtime of the calling task. Panics outside a runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Reader threads still running.
    pub fn live_threads(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

impl ReadinessStrategy for DedicatedThreads {
    fn name(&self) -> &'static str {
        "dedicated"
    }

    fn attach(&self, actor: SubscriberRef, reader: FrameStream, broker: Arc<dyn Broker>) -> Result<(), TfError> {
        let runtime = self.runtime.clone();
        let live = self.live.clone();
        live.fetch_add(1, Ordering::Relaxed);

        let spawned = std::thread::Builder::new().name(format!("tf-read-{}", actor.id())).spawn({
            let live = live.clone();
            move || {
                runtime.block_on(read_duty(actor, reader, broker));
                live.fetch_sub(1, Ordering::Relaxed);
            }
        });

        spawned.map(|_| ()).map_err(|e| {
            live.fetch_sub(1, Ordering::Relaxed);
            TfError::Spawn(format!("reader thread: {e}"))
        })
    }
}

async fn read_duty(actor: SubscriberRef, mut reader: FrameStream, broker: Arc<dyn Broker>) {
    loop {
        let event = tokio::select! {
            biased;
            _ = actor.cancelled() => break,
            event = reader.next() => event,
        };
        if actor.on_read(event, &*broker).await.is_break() {
            break;
        }
    }
    actor.close(&*broker).await;
    debug!("[client-{}] reader thread exiting", actor.id());
}
