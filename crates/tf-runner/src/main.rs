//! # tf-runner
//!
//! Entry point for the tick fan-out broker.
//!
//! `serve` starts the WebSocket broker together with the synthetic ticker.
//! `client` opens many subscriber connections against a running broker and
//! reports end-to-end latency.
//!
//! # Usage
//!
//! ```bash
//! tf-runner serve --config broker.json --engine shared-lock --io dedicated
//! tf-runner client --addr ws://127.0.0.1:8080 --count 1000
//! ```

mod client;

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tf_broker::{Server, Ticker};
use tf_core::config::{
    AppConfig, EngineKind, IoKind, LogFormat, OverflowPolicy, ServerConfig, TickerConfig, WriteMode, load_config,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Real-time tick fan-out broker.
#[derive(Parser)]
#[command(name = "tf-runner", about = "Real-time tick fan-out broker")]
struct Cli {
    /// Configuration file path (JSON). Flags override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Console log format (text, json).
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Optional log directory for file output.
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker and the synthetic ticker.
    Serve(ServeArgs),
    /// Run a fleet of subscriber connections and report latency.
    Client(client::ClientArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Listen address.
    #[arg(short, long)]
    addr: Option<String>,

    /// Broker engine (serialized, shared-lock).
    #[arg(short, long)]
    engine: Option<EngineKind>,

    /// Read strategy (dedicated, multiplexed).
    #[arg(long)]
    io: Option<IoKind>,

    /// Dispatcher tasks for the multiplexed strategy.
    #[arg(long)]
    dispatchers: Option<usize>,

    /// Full-queue policy (block, drop).
    #[arg(long)]
    overflow: Option<OverflowPolicy>,

    /// Write mode (immediate, batched).
    #[arg(short, long)]
    write_mode: Option<WriteMode>,

    /// Flush period for batched writes, in milliseconds.
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Per-client outbound queue capacity.
    #[arg(long)]
    outbound_capacity: Option<usize>,

    /// Number of instruments the ticker draws from.
    #[arg(short, long)]
    instruments: Option<u32>,

    /// Ticker period in milliseconds.
    #[arg(short, long)]
    tick_rate_ms: Option<u64>,

    /// Upper bound on ticks per batch.
    #[arg(long)]
    trade_count: Option<usize>,

    /// Publish deadline in milliseconds.
    #[arg(long)]
    publish_timeout_ms: Option<u64>,
}

impl ServeArgs {
    fn apply(self, server: &mut ServerConfig, ticker: &mut TickerConfig) {
        server.addr = self.addr.or(server.addr.take());
        server.engine = self.engine.or(server.engine);
        server.io = self.io.or(server.io);
        server.dispatchers = self.dispatchers.or(server.dispatchers);
        server.overflow = self.overflow.or(server.overflow);
        server.write_mode = self.write_mode.or(server.write_mode);
        server.flush_interval_ms = self.flush_interval_ms.or(server.flush_interval_ms);
        server.outbound_capacity = self.outbound_capacity.or(server.outbound_capacity);
        ticker.instruments = self.instruments.or(ticker.instruments);
        ticker.tick_rate_ms = self.tick_rate_ms.or(ticker.tick_rate_ms);
        ticker.trade_count = self.trade_count.or(ticker.trade_count);
        ticker.publish_timeout_ms = self.publish_timeout_ms.or(ticker.publish_timeout_ms);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (all sections optional)
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };

    // 2. Initialize logging; flags win over the file
    let log = config.log.clone().unwrap_or_default();
    let level = cli.log_level.or(log.level).unwrap_or_else(|| "info".to_string());
    let format = cli.log_format.or(log.format).unwrap_or_default();
    let log_dir = cli.log_dir.or(log.dir);
    let prefix = match cli.command {
        Command::Serve(_) => "tf-serve",
        Command::Client(_) => "tf-client",
    };
    tf_core::logging::init_logging(&level, format, log_dir.as_deref(), prefix);

    // 3. Wire Ctrl+C to the root cancellation token
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    match cli.command {
        Command::Serve(args) => serve(config, args, shutdown).await,
        Command::Client(args) => client::run(args, shutdown).await,
    }
}

async fn serve(config: AppConfig, args: ServeArgs, shutdown: CancellationToken) -> Result<()> {
    let mut server_cfg = config.server.unwrap_or_default();
    let mut ticker_cfg = config.ticker.unwrap_or_default();
    args.apply(&mut server_cfg, &mut ticker_cfg);
    server_cfg.validate()?;

    info!(
        "tf-runner starting: engine={}, io={}, overflow={}, write_mode={}",
        server_cfg.engine(),
        server_cfg.io(),
        server_cfg.effective_overflow(),
        server_cfg.write_mode()
    );

    if server_cfg.raise_fd_limit() {
        match tf_core::sys::raise_fd_limit() {
            Ok(limit) => info!("open-file limit is {limit}"),
            Err(e) => warn!("could not raise open-file limit: {e}"),
        }
    }

    let server = Server::from_config(&server_cfg, &shutdown)?;
    let listener = TcpListener::bind(server_cfg.addr()).await?;

    let ticker = Ticker::new(ticker_cfg, server.broker()).spawn(tokio::runtime::Handle::current(), shutdown.clone())?;
    let mut serving = tokio::spawn(server.serve(listener));

    tokio::select! {
        res = &mut serving => {
            // The accept loop only returns early on error.
            shutdown.cancel();
            res??;
        }
        _ = shutdown.cancelled() => {
            serving.await??;
        }
    }

    let report = tokio::task::spawn_blocking(move || ticker.join())
        .await?
        .map_err(|_| anyhow!("ticker thread panicked"))?;
    info!("ticker published {} ticks in {} batches ({} timed out)", report.ticks, report.batches, report.timed_out);

    info!("tf-runner stopped");
    Ok(())
}
