use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use precast_common::{ChangeEvent, FeedFrame};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::{SharedState, validate_topic};
use crate::errors::{ChannelError, ServerError};
use crate::hub::ChangeHub;

/// Ping cadence and dead-peer cutoff for WebSocket subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// How often to send WebSocket Ping frames.
    pub ping_interval: Duration,
    /// How long to wait for a Pong before considering the connection dead.
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

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(topic): Path<String>,
    State(state): State<SharedState>,
) -> Result<Response, ServerError> {
    validate_topic(&topic)?;
    let rx = state.hub.subscribe_topic(&topic).map_err(|e| match e {
        ChannelError::Closed => ServerError::HubClosed,
        other => ServerError::Other(other.into()),
    })?;
    let keepalive = state.keepalive;
    let hub = state.hub.clone();
    tracing::debug!(topic = %topic, "websocket subscriber connecting");
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, hub, topic, rx, keepalive))
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    hub: ChangeHub,
    topic: String,
    rx: broadcast::Receiver<ChangeEvent>,
    keepalive: Keepalive,
) {
    let (mut sender, receiver) = socket.split();
    let hello = FeedFrame::Subscribed {
        topic: topic.clone(),
    };
    if send_frame(&mut sender, &hello).await.is_ok() {
        tracing::info!(topic = %topic, "websocket subscriber attached");
        run_socket_loop(sender, receiver, rx, keepalive).await;
        tracing::info!(topic = %topic, "websocket subscriber detached");
    } else {
        drop(rx);
    }
    hub.release(&topic);
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines change forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within `pong_timeout` after a Ping is sent, the connection is
/// considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<ChangeEvent>,
    keepalive: Keepalive,
) {
    let mut ping_interval = tokio::time::interval(keepalive.ping_interval);
    // The first tick completes immediately; consume it so the first real
    // ping fires after ping_interval has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > keepalive.pong_timeout {
                    tracing::debug!("pong timeout, dropping subscriber");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Change forwarding ───────────────────────────────────
            result = rx.recv() => {
                let frame = match result {
                    Ok(event) => FeedFrame::Change(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        FeedFrame::Lagged { skipped }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let bye = FeedFrame::Error { message: "hub closed".to_string() };
                        let _ = send_frame(&mut sender, &bye).await;
                        break;
                    }
                };
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }

            // ── Client messages (pong, close, etc.) ─────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Subscribers have nothing to say besides pongs.
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

async fn send_frame(
    sender: &mut SplitSink<WebSocket, Message>,
    frame: &FeedFrame,
) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize feed frame");
            Ok(())
        }
    }
}
