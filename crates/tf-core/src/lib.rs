//! # tf-core
//!
//! Shared kernel for the tick fan-out broker, providing:
//!
//! - **Types** (`types`): instrument ids, ticks, subscription modes and requests
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): domain-specific errors via thiserror
//! - **Logging** (`logging`): tracing-based structured logging
//! - **Latency** (`latency`): windowed delivery-latency histogram for subscribers
//! - **Timestamps** (`stamp`): microsecond tick stamps carried in payloads
//! - **CPU affinity** (`cpu_affinity`): thread-to-core pinning for the producer
//! - **System tuning** (`sys`): open-file limit raising

pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod latency;
pub mod logging;
pub mod stamp;
pub mod sys;
pub mod types;

// Re-export types at crate root for convenience.
pub use error::{Enqueue, PublishError, TfError, TransportError};
pub use types::*;
