//! Instruments and ticks.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Opaque 32-bit instrument key. No ordering is implied by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub i32);

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for InstrumentId {
    fn from(v: i32) -> Self {
        Self(v)
    }
}

/// One update for an instrument.
///
/// Immutable once built. Cloning is cheap: the payload is reference counted,
/// so every delivery of a tick points at the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub instrument: InstrumentId,
    pub payload: Bytes,
}

impl Tick {
    pub fn new(instrument: impl Into<InstrumentId>, payload: impl Into<Bytes>) -> Self {
        Self { instrument: instrument.into(), payload: payload.into() }
    }
}
