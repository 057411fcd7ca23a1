//! Read-readiness strategies.
//!
//! A strategy takes over the read half of a connection and feeds each event
//! to [`SubscriberRef::on_read`] until it asks to stop, the stream ends, or
//! the actor is cancelled; then it closes the actor. Whatever strategy is in
//! use, the actor sees the same sequence of events.
//!
//! - [`dedicated::DedicatedThreads`]: one named OS thread per connection,
//!   blocked on that connection's reads.
//! - [`multiplexed::ReadinessPool`]: a fixed pool of dispatcher tasks waits
//!   on many connections at once and signals the owning actor when one
//!   becomes readable. Each connection is armed for one notification at a
//!   time and re-armed after the actor has drained what was buffered.

pub mod dedicated;
pub mod multiplexed;

use std::sync::Arc;

use tf_core::{TfError, config::IoKind};
use tokio_util::sync::CancellationToken;

use crate::{actor::SubscriberRef, engine::Broker, transport::FrameStream};

pub use dedicated::DedicatedThreads;
pub use multiplexed::ReadinessPool;

pub trait ReadinessStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start the read duty for `actor`. Returns once it is running.
    fn attach(&self, actor: SubscriberRef, reader: FrameStream, broker: Arc<dyn Broker>) -> Result<(), TfError>;
}

/// Build the configured strategy. Must be called inside a tokio runtime.
pub fn create_strategy(kind: IoKind, dispatchers: usize, shutdown: &CancellationToken) -> Arc<dyn ReadinessStrategy> {
    match kind {
        IoKind::Dedicated => Arc::new(DedicatedThreads::current()),
        IoKind::Multiplexed => ReadinessPool::spawn(dispatchers, shutdown.clone()),
    }
}
