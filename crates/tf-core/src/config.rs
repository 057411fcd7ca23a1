//! Configuration parsing for the broker.
//!
//! Settings come from an optional JSON file; every field is optional and the
//! accessor methods supply defaults. Command-line flags are layered on top by
//! the runner.
//!
//! # Example config
//!
//! ```json
//! {
//!   "log": { "level": "info", "format": "text" },
//!   "server": {
//!     "addr": "0.0.0.0:8080",
//!     "engine": "serialized",
//!     "io": "multiplexed",
//!     "dispatchers": 4,
//!     "write_mode": "batched",
//!     "flush_interval_ms": 100
//!   },
//!   "ticker": { "instruments": 100, "tick_rate_ms": 100, "trade_count": 5000 }
//! }
//! ```

use std::{fmt, str::FromStr, time::Duration};

use serde::Deserialize;

use crate::error::TfError;

/// Top-level application config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub log: Option<LogConfig>,
    pub server: Option<ServerConfig>,
    pub ticker: Option<TickerConfig>,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: Option<String>,
    pub format: Option<LogFormat>,
    /// Directory for daily-rotating log files.
    pub dir: Option<String>,
}

/// Console output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Which broker engine owns the subscription registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// One control routine, one ordered intake queue.
    #[default]
    Serialized,
    /// Reader/writer lock, fan-out on the publisher's thread.
    SharedLock,
}

/// How read-availability on a connection reaches its client actor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoKind {
    /// One blocked OS thread per connection.
    Dedicated,
    /// Shared pollers plus a bounded dispatcher pool.
    #[default]
    Multiplexed,
}

/// What fan-out does when a subscriber's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait for space. Under the serialized engine this stalls every subscriber.
    Block,
    /// Drop the message for that subscriber and count it.
    Drop,
}

/// How a client's write duty turns queued messages into transport writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// One binary message per queued item.
    #[default]
    Immediate,
    /// Concatenate queued items and flush on a fixed interval.
    Batched,
}

macro_rules! impl_from_str {
    ($ty:ty, $label:literal, { $($name:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = TfError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().replace('-', "_").as_str() {
                    $($name => Ok($variant),)+
                    other => Err(TfError::Config(format!(concat!("unknown ", $label, " '{}'"), other))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $(v if *v == $variant => $name,)+
                    _ => "?",
                };
                f.write_str(name)
            }
        }
    };
}

impl_from_str!(LogFormat, "log format", { "text" => LogFormat::Text, "json" => LogFormat::Json });
impl_from_str!(EngineKind, "engine", {
    "serialized" => EngineKind::Serialized,
    "shared_lock" => EngineKind::SharedLock,
});
impl_from_str!(IoKind, "io strategy", { "dedicated" => IoKind::Dedicated, "multiplexed" => IoKind::Multiplexed });
impl_from_str!(OverflowPolicy, "overflow policy", { "block" => OverflowPolicy::Block, "drop" => OverflowPolicy::Drop });
impl_from_str!(WriteMode, "write mode", { "immediate" => WriteMode::Immediate, "batched" => WriteMode::Batched });

/// Broker server settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default `0.0.0.0:8080`).
    pub addr: Option<String>,
    pub engine: Option<EngineKind>,
    pub io: Option<IoKind>,
    /// Dispatcher routines for the multiplexed strategy (default 4).
    pub dispatchers: Option<usize>,
    /// Full-queue policy; defaults depend on the engine.
    pub overflow: Option<OverflowPolicy>,
    pub write_mode: Option<WriteMode>,
    /// Flush period for batched writes (default 100ms).
    pub flush_interval_ms: Option<u64>,
    /// Per-client outbound queue capacity (default 10_000).
    pub outbound_capacity: Option<usize>,
    /// Serialized engine intake queue capacity (default 200_000).
    pub intake_capacity: Option<usize>,
    /// Close a client after this long without any inbound frame (default 60s).
    pub read_timeout_sec: Option<u64>,
    /// Heartbeat ping period (default 20s).
    pub ping_interval_sec: Option<u64>,
    /// Close a client whose socket accepts no write for this long (default 10s).
    pub write_timeout_sec: Option<u64>,
    /// Raise the open-file soft limit at startup (default true).
    pub raise_fd_limit: Option<bool>,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        self.addr.clone().unwrap_or_else(|| "0.0.0.0:8080".to_string())
    }

    pub fn engine(&self) -> EngineKind {
        self.engine.unwrap_or_default()
    }

    pub fn io(&self) -> IoKind {
        self.io.unwrap_or_default()
    }

    pub fn dispatchers(&self) -> usize {
        self.dispatchers.unwrap_or(4)
    }

    /// Returns the effective overflow policy. The serialized engine keeps the
    /// blocking behaviour unless told otherwise; the shared-lock engine drops.
    pub fn effective_overflow(&self) -> OverflowPolicy {
        self.overflow.unwrap_or(match self.engine() {
            EngineKind::Serialized => OverflowPolicy::Block,
            EngineKind::SharedLock => OverflowPolicy::Drop,
        })
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode.unwrap_or_default()
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.unwrap_or(100))
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity.unwrap_or(10_000)
    }

    pub fn intake_capacity(&self) -> usize {
        self.intake_capacity.unwrap_or(200_000)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_sec.unwrap_or(60))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_sec.unwrap_or(20))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_sec.unwrap_or(10))
    }

    pub fn raise_fd_limit(&self) -> bool {
        self.raise_fd_limit.unwrap_or(true)
    }

    /// Reject settings the broker cannot run with.
    pub fn validate(&self) -> Result<(), TfError> {
        if self.outbound_capacity() == 0 {
            return Err(TfError::Config("outbound_capacity must be > 0".into()));
        }
        if self.intake_capacity() == 0 {
            return Err(TfError::Config("intake_capacity must be > 0".into()));
        }
        if self.dispatchers() == 0 {
            return Err(TfError::Config("dispatchers must be > 0".into()));
        }
        if self.flush_interval().is_zero() {
            return Err(TfError::Config("flush_interval_ms must be > 0".into()));
        }
        if self.write_timeout().is_zero() {
            return Err(TfError::Config("write_timeout_sec must be > 0".into()));
        }
        if self.ping_interval().is_zero() || self.ping_interval() >= self.read_timeout() {
            return Err(TfError::Config(format!(
                "ping interval ({:?}) must be non-zero and shorter than read timeout ({:?})",
                self.ping_interval(),
                self.read_timeout()
            )));
        }
        Ok(())
    }
}

/// Synthetic tick producer settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickerConfig {
    /// Number of distinct instrument ids to draw from (default 100).
    pub instruments: Option<u32>,
    /// Period between batches (default 100ms).
    pub tick_rate_ms: Option<u64>,
    /// Upper bound on ticks per batch (default 5000).
    pub trade_count: Option<usize>,
    /// Publish deadline per batch (default 5ms).
    pub publish_timeout_ms: Option<u64>,
    /// Pin the producer thread to this core.
    pub cpu_core: Option<usize>,
}

impl TickerConfig {
    /// Clamped to the positive `i32` range instrument ids live in.
    pub fn instruments(&self) -> u32 {
        self.instruments.unwrap_or(100).clamp(1, i32::MAX as u32)
    }

    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms.unwrap_or(100).max(1))
    }

    pub fn trade_count(&self) -> usize {
        self.trade_count.unwrap_or(5000)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms.unwrap_or(5))
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
