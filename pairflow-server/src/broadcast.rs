//! Re-broadcasts analytics records and alerts to WebSocket clients.

use crate::feed::FeedStatus;
use chrono::Utc;
use futures::{SinkExt, StreamExt, stream};
use pairflow::{
    engine::EngineHandle,
    query::QueryHandle,
    record::{AlertEvent, AnalyticsRecord},
    types::AnalyticsSource,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Message pushed to every connected client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Record(AnalyticsRecord),
    Alert(AlertEvent),
}

/// Shared by every client connection.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub tx: broadcast::Sender<ServerMessage>,
    pub query: QueryHandle,
    pub source: AnalyticsSource,
    pub feed_status: watch::Receiver<FeedStatus>,
}

/// Merge the engine's record and alert channels into `tx`.
///
/// Finishes once the engine shuts down.
pub fn spawn_forwarder(engine: &EngineHandle, tx: broadcast::Sender<ServerMessage>) -> JoinHandle<()> {
    let records = BroadcastStream::new(engine.subscribe_records())
        .map(|record| record.map(ServerMessage::Record));
    let alerts = BroadcastStream::new(engine.subscribe_alerts())
        .map(|alert| alert.map(ServerMessage::Alert));

    tokio::spawn(async move {
        let mut merged = stream::select(records, alerts);

        while let Some(message) = merged.next().await {
            match message {
                Ok(message) => {
                    // No connected clients is fine
                    let _ = tx.send(message);
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "result forwarder lagged behind the engine");
                }
            }
        }

        debug!("result forwarder stopped");
    })
}

/// Accept clients on `listener` forever.
pub async fn serve(listener: TcpListener, context: ClientContext) {
    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!(%peer_addr, "new websocket connection");
        tokio::spawn(handle_client(stream, peer_addr, context.clone()));
    }
}

fn welcome(context: &ClientContext) -> serde_json::Value {
    let feed = *context.feed_status.borrow();
    serde_json::json!({
        "type": "welcome",
        "message": "Connected to pairflow analytics",
        "pair": context.query.pair(),
        "source": context.source,
        "feed": feed,
        "timestamp": Utc::now()
    })
}

async fn handle_client(stream: TcpStream, peer_addr: SocketAddr, context: ClientContext) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            error!(%peer_addr, %error, "websocket handshake failed");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut rx = context.tx.subscribe();

    let mut greeting = vec![welcome(&context)];
    // Late joiners get the current state straight away
    if let Some(record) = context
        .query
        .latest_record(context.query.pair(), context.source)
        .and_then(|record| serde_json::to_value(ServerMessage::Record(record)).ok())
    {
        greeting.push(record);
    }
    for message in greeting {
        if ws_sender
            .send(Message::Text(message.to_string().into()))
            .await
            .is_err()
        {
            return;
        }
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let Ok(json) = serde_json::to_string(&message) else {
                        continue;
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Slow client: skip ahead, keep the connection
                    warn!(%peer_addr, skipped, "client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!(%peer_addr, "broadcast channel closed");
                    break;
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => debug!(%peer_addr, "received ping"),
                Ok(Message::Text(text)) => debug!(%peer_addr, text = text.as_str(), "ignoring client text"),
                Err(error) => {
                    error!(%peer_addr, %error, "websocket error");
                    break;
                }
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(%peer_addr, "websocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairflow::{
        error::AnalyticsError,
        record::AlertKind,
        types::{Pair, Symbol},
    };

    fn pair() -> Pair {
        Pair::new(Symbol::new("ES"), Symbol::new("NQ"))
    }

    #[test]
    fn test_server_message_is_tagged() {
        let record = AnalyticsRecord::all_absent(
            1_000,
            pair(),
            AnalyticsSource::Ticks,
            AnalyticsError::InsufficientSamples {
                required: 2,
                available: 0,
            },
        );
        let json = serde_json::to_value(ServerMessage::Record(record)).unwrap();
        assert_eq!(json["type"], "record");
        assert_eq!(json["timestamp"], 1_000);
        assert_eq!(json["source"], "ticks");

        let alert = AlertEvent {
            timestamp: 2_000,
            pair: pair(),
            source: AnalyticsSource::Ticks,
            kind: AlertKind::ZScore,
            message: "NQ/ES [ticks] spread z-score 2.50 beyond ±2.00".to_string(),
            metric_value: 2.5,
            threshold: 2.0,
        };
        let json = serde_json::to_value(ServerMessage::Alert(alert)).unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["kind"], "z_score");
        assert_eq!(json["metric_value"], 2.5);
    }
}
