//! Comment change feed: an in-process broadcast bus plus the two transports
//! that expose it to remote subscribers (WebSocket and NDJSON).

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Body,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::header,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use super::models::{CommentChange, FeedEnvelope};

/// Keepalive timing for WebSocket subscribers.
#[derive(Debug, Clone, Copy)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

/// Broadcast bus for comment changes across all retros.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<FeedEnvelope>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a change. Returns silently even if nobody is listening.
    pub fn publish(&self, retro_id: &str, change: CommentChange) {
        tracing::debug!(retro_id, kind = change.kind(), comment_id = change.comment_id(), "publishing change");
        let _ = self.tx.send(FeedEnvelope {
            retro_id: retro_id.to_string(),
            change,
        });
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribe to changes for one retro. The returned receiver yields only
    /// that retro's changes, in publish order; it is released when dropped.
    pub fn subscribe(&self, retro_id: &str) -> RetroReceiver {
        RetroReceiver {
            retro_id: retro_id.to_string(),
            rx: self.tx.subscribe(),
        }
    }
}

/// A retro-filtered view of the broadcast bus.
pub struct RetroReceiver {
    retro_id: String,
    rx: broadcast::Receiver<FeedEnvelope>,
}

impl RetroReceiver {
    pub fn retro_id(&self) -> &str {
        &self.retro_id
    }

    /// Next change for this retro, or `None` once the bus is closed or this
    /// receiver has lagged. A lagged receiver has lost changes, so it ends
    /// rather than resuming with a gap.
    pub async fn recv(&mut self) -> Option<CommentChange> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.retro_id == self.retro_id => return Some(envelope.change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(retro_id = %self.retro_id, skipped, "feed receiver lagged, closing");
                    return None;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Forward this retro's changes into an mpsc channel until either side closes.
    pub async fn forward(mut self, tx: mpsc::Sender<CommentChange>) {
        while let Some(change) = self.recv().await {
            if tx.send(change).await.is_err() {
                break;
            }
        }
    }

    fn into_stream(self) -> impl futures_util::Stream<Item = Result<String, Infallible>> + Send {
        let retro_id = self.retro_id;
        let lag_retro_id = retro_id.clone();
        let envelopes = tokio_stream::StreamExt::take_while(BroadcastStream::new(self.rx), move |msg| match msg {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(retro_id = %lag_retro_id, "change stream {}, closing", e);
                false
            }
        });
        tokio_stream::StreamExt::filter_map(envelopes, move |msg| match msg {
            Ok(envelope) if envelope.retro_id == retro_id => {
                match serde_json::to_string(&envelope.change) {
                    Ok(mut line) => {
                        line.push('\n');
                        Some(Ok(line))
                    }
                    Err(e) => {
                        tracing::error!("Failed to serialize change: {}", e);
                        None
                    }
                }
            }
            _ => None,
        })
    }
}

// ── NDJSON transport ─────────────────────────────────────────────────

/// Stream one JSON-encoded `CommentChange` per line for as long as the client
/// keeps the response open.
pub fn ndjson_response(receiver: RetroReceiver) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(receiver.into_stream()))
        .map(IntoResponse::into_response)
        .unwrap_or_else(|e| {
            tracing::error!("Failed to build change stream response: {}", e);
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

// ── WebSocket transport ──────────────────────────────────────────────

pub fn ws_upgrade(ws: WebSocketUpgrade, receiver: RetroReceiver, keepalive: Keepalive) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, receiver, keepalive))
}

async fn handle_socket(socket: WebSocket, receiver: RetroReceiver, keepalive: Keepalive) {
    let retro_id = receiver.retro_id().to_string();
    tracing::info!(retro_id = %retro_id, "websocket subscriber connected");
    let (sender, incoming) = socket.split();
    run_socket_loop(sender, incoming, receiver, keepalive).await;
    tracing::info!(retro_id = %retro_id, "websocket subscriber disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines feed forwarding, client message receiving, and periodic ping/pong
/// health checking into a single select loop. If no Pong arrives within the
/// pong timeout after a Ping, the connection is considered dead.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut incoming: SplitStream<WebSocket>,
    mut receiver: RetroReceiver,
    keepalive: Keepalive,
) {
    let mut ping_interval = tokio::time::interval(keepalive.ping_interval);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > keepalive.pong_timeout {
                    tracing::debug!(retro_id = %receiver.retro_id(), "pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            change = receiver.recv() => {
                let Some(change) = change else { break };
                match serde_json::to_string(&change) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to serialize change: {}", e),
                }
            }

            msg = incoming.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
