//! Microsecond timestamps carried inside tick payloads.
//!
//! The synthetic producer writes the production time as an 8-byte big-endian
//! integer; subscribers decode it to measure end-to-end delivery latency. When
//! the broker batches writes, one binary message holds several such stamps
//! back to back.

use std::time::{SystemTime, UNIX_EPOCH};

/// Size of one encoded stamp.
pub const STAMP_LEN: usize = 8;

/// Current wall-clock time in microseconds since the Unix epoch.
#[inline]
pub fn now_us() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or_default()
}

#[inline]
pub fn encode_ts(us: u64) -> [u8; STAMP_LEN] {
    us.to_be_bytes()
}

/// Decode the stamp at the start of `buf`, if there is one.
#[inline]
pub fn decode_ts(buf: &[u8]) -> Option<u64> {
    let head: [u8; STAMP_LEN] = buf.get(..STAMP_LEN)?.try_into().ok()?;
    Some(u64::from_be_bytes(head))
}

/// Decode every whole stamp in a (possibly batched) message. A trailing
/// partial stamp is ignored.
pub fn decode_all(buf: &[u8]) -> impl Iterator<Item = u64> + '_ {
    buf.chunks_exact(STAMP_LEN).filter_map(decode_ts)
}
