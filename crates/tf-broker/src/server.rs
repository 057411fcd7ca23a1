//! WebSocket server: accept loop and per-connection sessions.
//!
//! Every accepted TCP connection is upgraded to a WebSocket, wrapped in a
//! client actor, handed to the read strategy and then served by the actor's
//! write duty until it closes. Sessions are tracked in a `JoinSet` so
//! shutdown can wait for them to finish their close handshakes.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tf_core::{TfError, config::ServerConfig};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    actor::{ActorConfig, ClientActor, run_session},
    engine::{Broker, EngineConfig, create_broker},
    io::{ReadinessStrategy, create_strategy},
    transport::split_websocket,
};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Server {
    broker: Arc<dyn Broker>,
    io: Arc<dyn ReadinessStrategy>,
    actor_config: ActorConfig,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(
        broker: Arc<dyn Broker>,
        io: Arc<dyn ReadinessStrategy>,
        actor_config: ActorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self { broker, io, actor_config, shutdown }
    }

    /// Validate `cfg` and build the configured engine and read strategy.
    pub fn from_config(cfg: &ServerConfig, shutdown: &CancellationToken) -> Result<Self, TfError> {
        cfg.validate()?;
        let broker = create_broker(cfg.engine(), EngineConfig::from_server(cfg), shutdown);
        let io = create_strategy(cfg.io(), cfg.dispatchers(), shutdown);
        Ok(Self::new(broker, io, ActorConfig::from_server(cfg), shutdown.clone()))
    }

    /// Publisher-side handle to the engine.
    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    /// Accept connections until shutdown, then wait briefly for open
    /// sessions to close.
    pub async fn serve(self, listener: TcpListener) -> Result<(), TfError> {
        let local = listener.local_addr()?;
        info!("listening on ws://{local} (engine: {}, io: {})", self.broker.name(), self.io.name());

        let mut sessions = JoinSet::new();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(res) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = res {
                        warn!("session task failed: {e}");
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        sessions.spawn(handle_connection(
                            next_id,
                            stream,
                            peer,
                            self.broker.clone(),
                            self.io.clone(),
                            self.actor_config,
                            self.shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        // Typically EMFILE; back off instead of spinning.
                        warn!("accept failed: {e}");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        info!("shutting down, {} sessions open", sessions.len());
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("{} sessions did not close in time", sessions.len());
            sessions.abort_all();
        }
        Ok(())
    }
}

async fn handle_connection(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    broker: Arc<dyn Broker>,
    io: Arc<dyn ReadinessStrategy>,
    config: ActorConfig,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("[client-{id}] set_nodelay failed: {e}");
    }

    let ws = match tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("[client-{id}] websocket upgrade from {peer} failed: {e}");
            return;
        }
        Err(_) => {
            warn!("[client-{id}] websocket upgrade from {peer} timed out");
            return;
        }
    };
    debug!("[client-{id}] upgraded connection from {peer}");

    let (sink, reader) = split_websocket(ws);
    let (actor, outbox) = ClientActor::new(id, config.outbound_capacity, &shutdown);
    run_session(actor, outbox, sink, reader, &*io, broker, &config).await;
}
