//! Synthetic tick producer.
//!
//! Every `tick_rate` it builds a batch of a random number of ticks (below
//! `trade_count`) spread over `instruments` ids and publishes it with a short
//! deadline. Every tick in a batch carries the same payload: the production
//! time as an 8-byte stamp, which subscribers use to measure latency.
//!
//! A timed-out publish loses the whole batch. That is reported, not retried.

use std::{sync::Arc, thread::JoinHandle, time::Duration};

use bytes::Bytes;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tf_core::{InstrumentId, PublishError, TfError, Tick, config::TickerConfig, cpu_affinity, stamp};
use tokio::{runtime::Handle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Broker;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Totals over a ticker's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickerReport {
    pub batches: u64,
    pub timed_out: u64,
    pub ticks: u64,
}

pub struct Ticker {
    config: TickerConfig,
    broker: Arc<dyn Broker>,
    rng: StdRng,
}

impl Ticker {
    pub fn new(config: TickerConfig, broker: Arc<dyn Broker>) -> Self {
        Self { config, broker, rng: StdRng::from_entropy() }
    }

    /// Reproducible batches, for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run on a dedicated thread named `tf-ticker`, optionally pinned.
    pub fn spawn(self, runtime: Handle, shutdown: CancellationToken) -> Result<JoinHandle<TickerReport>, TfError> {
        std::thread::Builder::new()
            .name("tf-ticker".into())
            .spawn(move || {
                cpu_affinity::maybe_pin(self.config.cpu_core, "ticker");
                runtime.block_on(self.run(shutdown))
            })
            .map_err(|e| TfError::Spawn(format!("ticker thread: {e}")))
    }

    /// Publish until shutdown or until the broker closes.
    pub async fn run(mut self, shutdown: CancellationToken) -> TickerReport {
        let mut report = TickerReport::default();
        let mut window_ticks: u64 = 0;
        let timeout = self.config.publish_timeout();

        let mut ticks = tokio::time::interval(self.config.tick_rate());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut status = tokio::time::interval_at(tokio::time::Instant::now() + REPORT_INTERVAL, REPORT_INTERVAL);

        info!(
            "[ticker] started: {} instruments, every {:?}, up to {} ticks per batch",
            self.config.instruments(),
            self.config.tick_rate(),
            self.config.trade_count()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = status.tick() => {
                    info!(
                        "[ticker] {} ticks/s, {} batches, {} timed out",
                        window_ticks / REPORT_INTERVAL.as_secs(),
                        report.batches,
                        report.timed_out
                    );
                    window_ticks = 0;
                }
                _ = ticks.tick() => {
                    let batch = self.next_batch();
                    let n = batch.len() as u64;
                    match self.broker.publish(timeout, batch).await {
                        Ok(()) => {
                            report.batches += 1;
                            report.ticks += n;
                            window_ticks += n;
                        }
                        Err(PublishError::TimedOut) => {
                            report.timed_out += 1;
                            warn!("[ticker] publish timed out, {n} ticks lost");
                        }
                        Err(PublishError::Closed) => {
                            debug!("[ticker] broker closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("[ticker] stopped: {} batches, {} ticks, {} timed out", report.batches, report.ticks, report.timed_out);
        report
    }

    /// One batch stamped with the current time.
    pub fn next_batch(&mut self) -> Vec<Tick> {
        let payload = Bytes::copy_from_slice(&stamp::encode_ts(stamp::now_us()));
        let max = self.config.trade_count();
        let count = if max == 0 { 0 } else { self.rng.gen_range(0..max) };
        let instruments = self.config.instruments() as usize;

        (0..count).map(|i| Tick { instrument: InstrumentId((i % instruments) as i32), payload: payload.clone() }).collect()
    }
}
