mod broadcast;
mod feed;

use broadcast::{ClientContext, ServerMessage, serve, spawn_forwarder};
use feed::{FeedStatus, spawn_feed};
use pairflow::{
    config::EngineConfig,
    engine::{EngineHandle, PairEngine},
    error::{ConfigError, EngineError, SinkError},
    sink::{JsonlSink, NullSink},
};
use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::PathBuf,
};
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{broadcast as channel, watch},
};
use tracing::{error, info, warn};

const DEFAULT_FEED_URL: &str = "ws://127.0.0.1:8765/ws";
const DEFAULT_WS_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 9001));
const DEFAULT_BROADCAST_BUFFER: usize = 10_000;

#[derive(Debug, Error)]
enum ServerError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("sink: {0}")]
    Sink(#[from] SinkError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Server-level settings, read from `PAIRFLOW_*` environment variables.
#[derive(Debug)]
struct ServerConfig {
    feed_url: String,
    ws_addr: SocketAddr,
    jsonl_dir: Option<PathBuf>,
    broadcast_buffer: usize,
}

impl ServerConfig {
    fn from_env() -> Self {
        let feed_url =
            std::env::var("PAIRFLOW_FEED_URL").unwrap_or_else(|_| DEFAULT_FEED_URL.to_string());

        let ws_addr = std::env::var("PAIRFLOW_WS_ADDR")
            .ok()
            .and_then(|addr| {
                addr.parse::<SocketAddr>()
                    .inspect_err(|_| warn!(%addr, "invalid PAIRFLOW_WS_ADDR, using default"))
                    .ok()
            })
            .unwrap_or(DEFAULT_WS_ADDR);

        let jsonl_dir = std::env::var("PAIRFLOW_JSONL_DIR").ok().map(PathBuf::from);

        let broadcast_buffer = std::env::var("PAIRFLOW_BROADCAST_BUFFER")
            .ok()
            .and_then(|size| size.parse::<usize>().ok())
            .filter(|&size| size > 0)
            .unwrap_or(DEFAULT_BROADCAST_BUFFER);

        Self {
            feed_url,
            ws_addr,
            jsonl_dir,
            broadcast_buffer,
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(error) = run().await {
        error!(%error, "pairflow-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ServerError> {
    let server = ServerConfig::from_env();
    let config = EngineConfig::from_env()?;
    info!(?server, "starting pairflow-server");

    let source = config.analytics_source;
    let engine = spawn_engine(config, &server)?;

    let (tx, _) = channel::channel::<ServerMessage>(server.broadcast_buffer);
    let forwarder = spawn_forwarder(&engine, tx.clone());

    let listener = TcpListener::bind(server.ws_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: server.ws_addr,
            source,
        })?;
    info!("websocket server listening on ws://{}", server.ws_addr);

    let (status_tx, status_rx) = watch::channel(FeedStatus::Disconnected);
    let context = ClientContext {
        tx,
        query: engine.query(),
        source,
        feed_status: status_rx,
    };
    let server_task = tokio::spawn(serve(listener, context));
    let feed_task = spawn_feed(server.feed_url, engine.router(), status_tx);

    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");

    feed_task.abort();
    engine.shutdown().await;
    if let Err(error) = forwarder.await {
        error!(%error, "result forwarder panicked");
    }
    server_task.abort();

    Ok(())
}

fn spawn_engine(config: EngineConfig, server: &ServerConfig) -> Result<EngineHandle, ServerError> {
    let engine = match &server.jsonl_dir {
        Some(dir) => PairEngine::spawn(config, JsonlSink::new(dir)?)?,
        None => {
            info!("PAIRFLOW_JSONL_DIR not set, bars and records will not be persisted");
            PairEngine::spawn(config, NullSink)?
        }
    };
    Ok(engine)
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
