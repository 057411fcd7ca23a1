//! Subscription modes and the client request wire format.
//!
//! Clients send text frames of the form:
//!
//! ```json
//! { "m": 2, "i": [7, 9] }
//! ```
//!
//! where `m` is the [`Mode`] applied to every instrument listed in `i`.
//! Mode `0` unsubscribes the listed instruments.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::tick::InstrumentId;
use crate::error::TfError;

/// Requested level of detail, each level a superset of the previous one.
///
/// [`Mode::None`] is never stored against a live subscriber: receiving it is
/// an instruction to unsubscribe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Mode {
    #[default]
    None = 0,
    /// Last traded price only.
    Ltp = 1,
    /// LTP plus top-of-book quote.
    Quote = 2,
    /// Quote plus market depth.
    Full = 3,
}

impl Mode {
    /// Whether this mode means "subscribed".
    pub fn is_subscribed(self) -> bool {
        self != Mode::None
    }
}

impl TryFrom<u8> for Mode {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Mode::None),
            1 => Ok(Mode::Ltp),
            2 => Ok(Mode::Quote),
            3 => Ok(Mode::Full),
            other => Err(format!("unknown subscription mode {other}")),
        }
    }
}

impl From<Mode> for u8 {
    fn from(m: Mode) -> Self {
        m as u8
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::None => "none",
            Mode::Ltp => "ltp",
            Mode::Quote => "quote",
            Mode::Full => "full",
        };
        f.write_str(s)
    }
}

/// A client's request to set `mode` on every listed instrument.
///
/// Missing fields fall back to their zero values, so `{}` is a valid (empty)
/// unsubscribe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "m", default)]
    pub mode: Mode,
    #[serde(rename = "i", default)]
    pub instruments: Vec<InstrumentId>,
}

impl SubscriptionRequest {
    pub fn new(mode: Mode, instruments: impl IntoIterator<Item = i32>) -> Self {
        Self { mode, instruments: instruments.into_iter().map(InstrumentId).collect() }
    }

    /// Decode a request from a text frame.
    pub fn decode(text: &str) -> Result<Self, TfError> {
        serde_json::from_str(text).map_err(|e| TfError::MalformedRequest(e.to_string()))
    }

    /// Encode as the compact wire JSON.
    pub fn encode(&self) -> String {
        // A struct of integers always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}
