//! # tf-broker
//!
//! Real-time tick fan-out over WebSocket.
//!
//! ## Architecture
//!
//! A producer publishes batches of ticks to a [`Broker`]. The broker looks up
//! who is subscribed to each tick's instrument and puts a message on each
//! subscriber's bounded outbound queue. Every connection is a client actor
//! whose write duty drains that queue onto the socket; its read duty feeds
//! subscription requests back into the broker.
//!
//! Two axes are pluggable:
//!
//! - [`engine`]: how the subscription registry is synchronized (one
//!   serialized control loop, or a reader/writer lock)
//! - [`io`]: how read readiness reaches each actor (a thread per connection,
//!   or a small pool of dispatchers)
//!
//! ## Modules
//!
//! - [`registry`]: instrument → subscriber → mode map
//! - [`actor`]: per-connection state machine, queues and write duty
//! - [`transport`]: `Frame` sink/stream over tokio-tungstenite
//! - [`server`]: accept loop
//! - [`ticker`]: synthetic producer

pub mod actor;
pub mod engine;
pub mod io;
pub mod registry;
pub mod server;
pub mod ticker;
pub mod transport;

#[cfg(test)]
mod testing;

pub use actor::{ActorConfig, ClientActor, SubscriberRef};
pub use engine::{Broker, EngineConfig, FanoutStats, create_broker};
pub use io::{ReadinessStrategy, create_strategy};
pub use server::Server;
pub use ticker::{Ticker, TickerReport};
