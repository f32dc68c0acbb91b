//! WebSocket tick feed client.
//!
//! Speaks the bridge message shape: `tick` and `tick_backfill` carry prices, `welcome`
//! and `status` are informational. Timestamps are epoch milliseconds.

use futures::{StreamExt, future, stream};
use pairflow::{engine::TickRouter, types::Tick};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Delay between connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FeedMessage {
    Tick {
        symbol: String,
        ts: i64,
        px: f64,
        #[serde(default)]
        sz: f64,
    },
    TickBackfill {
        symbol: String,
        ticks: Vec<BackfillTick>,
    },
    Welcome {
        #[serde(default)]
        message: Option<String>,
    },
    Status {
        #[serde(default)]
        connected: Option<bool>,
    },
}

#[derive(Debug, Deserialize)]
struct BackfillTick {
    ts: i64,
    px: f64,
    #[serde(default)]
    sz: f64,
}

fn tick(symbol: &str, ts: i64, px: f64, sz: f64) -> Tick {
    let tick = Tick::new(symbol, ts, px);
    if sz > 0.0 { tick.with_volume(sz) } else { tick }
}

impl FeedMessage {
    fn into_ticks(self) -> Vec<Tick> {
        match self {
            FeedMessage::Tick { symbol, ts, px, sz } => vec![tick(&symbol, ts, px, sz)],
            FeedMessage::TickBackfill { symbol, ticks } => {
                debug!(%symbol, count = ticks.len(), "received tick backfill");
                ticks
                    .into_iter()
                    .map(|backfill| tick(&symbol, backfill.ts, backfill.px, backfill.sz))
                    .collect()
            }
            FeedMessage::Welcome { message } => {
                debug!(?message, "received feed welcome");
                Vec::new()
            }
            FeedMessage::Status { connected } => {
                debug!(?connected, "received feed status");
                Vec::new()
            }
        }
    }
}

/// Decode one text frame into zero or more ticks. Unparseable frames yield nothing.
fn decode(text: &str) -> Vec<Tick> {
    match serde_json::from_str::<FeedMessage>(text) {
        Ok(message) => message.into_ticks(),
        Err(error) => {
            let frame: String = text.chars().take(100).collect();
            debug!(%error, %frame, "failed to parse feed message");
            Vec::new()
        }
    }
}

/// Connect to `url` and forward every tick into the engine, reconnecting forever.
///
/// Abort the returned task to stop the feed.
pub fn spawn_feed(
    url: String,
    router: TickRouter,
    status_tx: watch::Sender<FeedStatus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(%url, "starting tick feed");

        loop {
            let _ = status_tx.send(FeedStatus::Reconnecting);

            match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!(%url, "connected to tick feed");
                    let _ = status_tx.send(FeedStatus::Connected);

                    let (_, read) = ws_stream.split();
                    let ticks = read
                        .scan((), |_, frame| {
                            future::ready(match frame {
                                Ok(Message::Text(text)) => Some(decode(&text)),
                                Ok(Message::Close(_)) => {
                                    warn!("tick feed closed the connection");
                                    None
                                }
                                Err(error) => {
                                    error!(%error, "tick feed error");
                                    None
                                }
                                // Heartbeats are answered by tungstenite
                                Ok(_) => Some(Vec::new()),
                            })
                        })
                        .flat_map(stream::iter);

                    let forwarded = router.forward(ticks).await;
                    info!(forwarded, "tick feed disconnected");
                    let _ = status_tx.send(FeedStatus::Disconnected);
                }
                Err(error) => {
                    error!(%url, %error, "failed to connect to tick feed");
                    let _ = status_tx.send(FeedStatus::Disconnected);
                }
            }

            debug!(delay = ?RECONNECT_DELAY, "waiting before reconnecting to tick feed");
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        struct TestCase {
            input: &'static str,
            expected: Vec<Tick>,
        }

        let tests = vec![
            TestCase {
                // TC0: single tick with size
                input: r#"{"type":"tick","symbol":"ES","ts":1000,"px":5000.25,"sz":2}"#,
                expected: vec![Tick::new("ES", 1_000, 5_000.25).with_volume(2.0)],
            },
            TestCase {
                // TC1: missing size means no volume
                input: r#"{"type":"tick","symbol":"NQ","ts":1000,"px":17500.5}"#,
                expected: vec![Tick::new("NQ", 1_000, 17_500.5)],
            },
            TestCase {
                // TC2: backfill expands in order
                input: r#"{"type":"tick_backfill","symbol":"ES","ticks":[{"ts":1,"px":10.0},{"ts":2,"px":11.0,"sz":3}]}"#,
                expected: vec![
                    Tick::new("ES", 1, 10.0),
                    Tick::new("ES", 2, 11.0).with_volume(3.0),
                ],
            },
            TestCase {
                // TC3: informational messages carry no ticks
                input: r#"{"type":"welcome","message":"hello"}"#,
                expected: vec![],
            },
            TestCase {
                // TC4: status without fields
                input: r#"{"type":"status"}"#,
                expected: vec![],
            },
            TestCase {
                // TC5: unknown type is ignored
                input: r#"{"type":"quote","symbol":"ES"}"#,
                expected: vec![],
            },
            TestCase {
                // TC6: garbage is ignored
                input: "not json",
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(decode(test.input), test.expected, "TC{} failed", index);
        }
    }
}
