//! Load-test subscriber fleet.
//!
//! Opens `count` WebSocket connections, subscribes each to a few random
//! instruments and decodes every stamp it receives. Latency samples from all
//! connections feed one shared histogram, reported once per interval.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, bail};
use clap::Args;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tf_core::{Mode, SubscriptionRequest, latency::DeliveryLatency, stamp};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

const PICKS_PER_CLIENT: usize = 3;

#[derive(Args)]
pub struct ClientArgs {
    /// Broker URL.
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    addr: String,

    /// Number of connections to open.
    #[arg(short = 'n', long, default_value_t = 100)]
    count: usize,

    /// Instruments to pick subscriptions from.
    #[arg(short, long, default_value_t = 100)]
    instruments: i32,

    /// Subscription mode (1 = ltp, 2 = quote, 3 = full).
    #[arg(short, long, default_value_t = 1)]
    mode: u8,

    /// Latency report period in milliseconds.
    #[arg(long, default_value_t = 1000)]
    report_ms: u64,
}

pub async fn run(args: ClientArgs, shutdown: CancellationToken) -> Result<()> {
    let url = Url::parse(&args.addr)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        bail!("expected a ws:// or wss:// address, got {url}");
    }
    if args.instruments <= 0 {
        bail!("--instruments must be positive");
    }
    let mode = Mode::try_from(args.mode).map_err(anyhow::Error::msg)?;

    let latency = Arc::new(Mutex::new(DeliveryLatency::new()));
    let mut clients = JoinSet::new();
    for id in 0..args.count {
        clients.spawn(run_client(id, url.clone(), mode, args.instruments, latency.clone(), shutdown.clone()));
    }
    info!("[client] {} connections to {url}", args.count);

    let mut report = tokio::time::interval(Duration::from_millis(args.report_ms.max(1)));
    report.tick().await;
    let mut failed = 0usize;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = report.tick() => {
                match latency.lock().finish_window() {
                    Some(report) => info!("[client] {report}"),
                    None => info!("[client] no ticks received"),
                }
            }
            done = clients.join_next() => match done {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    failed += 1;
                    warn!("[client] connection failed: {e}");
                }
                Some(Err(e)) => {
                    failed += 1;
                    warn!("[client] connection task panicked: {e}");
                }
                None => break,
            },
        }
    }

    while clients.join_next().await.is_some() {}
    if let Some(report) = latency.lock().finish_window() {
        info!("[client] final window: {report}");
    }
    info!("[client] finished, {failed} of {} connections failed", args.count);
    Ok(())
}

async fn run_client(
    id: usize,
    url: Url,
    mode: Mode,
    instruments: i32,
    latency: Arc<Mutex<DeliveryLatency>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws.split();

    let picks: Vec<i32> = {
        let mut rng = rand::thread_rng();
        (0..PICKS_PER_CLIENT).map(|_| rng.gen_range(0..instruments)).collect()
    };
    let request = SubscriptionRequest::new(mode, picks);
    debug!("[client-{id}] subscribing {}", request.encode());
    write.send(Message::Text(request.encode().into())).await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    latency.lock().record_message(&data, stamp::now_us());
                }
                // Pongs to server pings are queued by tungstenite and go out
                // with the next read or write.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!("[client-{id}] closed by server");
                    break;
                }
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
    Ok(())
}
