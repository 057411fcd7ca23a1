//! Core data model: instruments, ticks and subscription requests.
//!
//! Tick payloads are opaque [`bytes::Bytes`] so one batch can be shared across
//! every subscriber delivery without copying.

pub mod subscription;
pub mod tick;

pub use subscription::*;
pub use tick::*;
