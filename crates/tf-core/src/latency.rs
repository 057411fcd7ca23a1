//! Delivery latency as seen by a subscriber.
//!
//! Every tick payload starts with the producer's stamp (see [`crate::stamp`]),
//! and a batched write packs several stamps into one binary message.
//! [`DeliveryLatency`] decodes each stamp of a received message and bins
//! `receive_time - stamp` into a fixed histogram. Reports are windowed: each
//! [`DeliveryLatency::finish_window`] summarizes what arrived since the last
//! one and starts over.
//!
//! Bins are 100µs wide up to 500ms, several default flush intervals. Slower
//! ticks land in the last bin; the window maximum stays exact.

use std::fmt;

use crate::stamp;

const BIN_US: u64 = 100;
const BINS: usize = 5_000;

/// Summary of one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowReport {
    /// Binary messages that carried at least one stamp.
    pub messages: u64,
    pub ticks: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p99_us: u64,
}

impl WindowReport {
    /// Above 1 when the broker batches writes.
    pub fn ticks_per_message(&self) -> f64 {
        if self.messages == 0 { 0.0 } else { self.ticks as f64 / self.messages as f64 }
    }
}

impl fmt::Display for WindowReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} msgs / {} ticks ({:.1} per msg), latency min={}µs p50={}µs p90={}µs p99={}µs max={}µs mean={:.0}µs",
            self.messages,
            self.ticks,
            self.ticks_per_message(),
            self.min_us,
            self.p50_us,
            self.p90_us,
            self.p99_us,
            self.max_us,
            self.mean_us,
        )
    }
}

/// Windowed histogram of tick delivery delay.
///
/// Shared by many connections behind one mutex in the load client.
pub struct DeliveryLatency {
    bins: Box<[u64]>,
    messages: u64,
    ticks: u64,
    sum_us: u64,
    min_us: u64,
    max_us: u64,
}

impl DeliveryLatency {
    pub fn new() -> Self {
        Self { bins: vec![0; BINS].into_boxed_slice(), messages: 0, ticks: 0, sum_us: 0, min_us: u64::MAX, max_us: 0 }
    }

    /// Record every stamp in one received message, measured against
    /// `now_us`. Returns how many stamps it held.
    pub fn record_message(&mut self, payload: &[u8], now_us: u64) -> usize {
        let mut stamps = 0;
        for sent_us in stamp::decode_all(payload) {
            // Clock skew between hosts can put a stamp in the future.
            self.record_tick(now_us.saturating_sub(sent_us));
            stamps += 1;
        }
        if stamps > 0 {
            self.messages += 1;
        }
        stamps
    }

    fn record_tick(&mut self, delay_us: u64) {
        self.ticks += 1;
        self.sum_us = self.sum_us.saturating_add(delay_us);
        self.min_us = self.min_us.min(delay_us);
        self.max_us = self.max_us.max(delay_us);
        let bin = ((delay_us / BIN_US) as usize).min(BINS - 1);
        self.bins[bin] += 1;
    }

    /// Ticks recorded in the current window.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Summarize the current window and start a new one. `None` if no tick
    /// arrived.
    pub fn finish_window(&mut self) -> Option<WindowReport> {
        let report = (self.ticks > 0).then(|| WindowReport {
            messages: self.messages,
            ticks: self.ticks,
            min_us: self.min_us,
            max_us: self.max_us,
            mean_us: self.sum_us as f64 / self.ticks as f64,
            p50_us: self.quantile(0.50),
            p90_us: self.quantile(0.90),
            p99_us: self.quantile(0.99),
        });

        self.bins.fill(0);
        self.messages = 0;
        self.ticks = 0;
        self.sum_us = 0;
        self.min_us = u64::MAX;
        self.max_us = 0;
        report
    }

    /// Lower edge of the bin holding quantile `q`, never above the max.
    fn quantile(&self, q: f64) -> u64 {
        let rank = ((self.ticks as f64 * q).ceil() as u64).max(1);
        let mut seen = 0u64;
        for (bin, &n) in self.bins.iter().enumerate() {
            seen += n;
            if seen >= rank {
                return (bin as u64 * BIN_US).min(self.max_us);
            }
        }
        self.max_us
    }
}

impl Default for DeliveryLatency {
    fn default() -> Self {
        Self::new()
    }
}
