//! Channel over a remote change-feed server's `/ws/{topic}` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use precast_common::{ChangeEvent, ChannelStatus, FeedFrame, StatusEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use crate::errors::ChannelError;
use crate::subscription::{Channel, StatusSink};

/// Upper bound on the close handshake during unsubscribe.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Build the WebSocket URL for `topic` from an http(s) or ws(s) base URL.
pub fn ws_url(base_url: &str, topic: &str) -> Result<String, ChannelError> {
    let base = base_url.trim().trim_end_matches('/');
    let converted = if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(ChannelError::InvalidUrl {
            url: base_url.to_string(),
            message: "expected http://, https://, ws:// or wss://".to_string(),
        });
    };

    let host = converted.split("://").nth(1).unwrap_or("");
    if host.is_empty() || host.contains(['?', '#']) {
        return Err(ChannelError::InvalidUrl {
            url: base_url.to_string(),
            message: "missing host or unexpected query/fragment".to_string(),
        });
    }

    Ok(format!("{}/ws/{}", converted, topic))
}

/// Channel that subscribes to one topic on a remote change-feed server.
///
/// Each subscribe attempt opens a fresh WebSocket. Statuses:
/// - `SUBSCRIBED` once the server's `Subscribed` frame arrives
/// - `TIMED_OUT` if connect plus acknowledgement exceed the timeout
/// - `CHANNEL_ERROR` on connect failure, server close, read error, lag
pub struct WsChannel {
    url: String,
    topic: String,
    changes: mpsc::UnboundedSender<ChangeEvent>,
    subscribe_timeout: Duration,
    reader: Option<Reader>,
}

struct Reader {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl WsChannel {
    pub fn new(
        base_url: &str,
        topic: impl Into<String>,
        changes: mpsc::UnboundedSender<ChangeEvent>,
        subscribe_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let topic = topic.into();
        let url = ws_url(base_url, &topic)?;
        Ok(Self {
            url,
            topic,
            changes,
            subscribe_timeout,
            reader: None,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Channel for WsChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn subscribe(&mut self, statuses: StatusSink) {
        if let Some(old) = self.reader.take() {
            old.stop.cancel();
        }
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_reader(
            self.url.clone(),
            statuses,
            self.changes.clone(),
            self.subscribe_timeout,
            stop.clone(),
        ));
        self.reader = Some(Reader { stop, task });
    }

    async fn unsubscribe(&mut self) -> Result<(), ChannelError> {
        if let Some(reader) = self.reader.take() {
            reader.stop.cancel();
            reader.task.await.map_err(ChannelError::TaskFailed)?;
        }
        Ok(())
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.stop.cancel();
        }
    }
}

fn report(statuses: &StatusSink, status: ChannelStatus, error: Option<String>) {
    let event = match error {
        Some(e) => StatusEvent::with_error(status, e),
        None => StatusEvent::new(status),
    };
    let _ = statuses.send(event);
}

async fn run_reader(
    url: String,
    statuses: StatusSink,
    changes: mpsc::UnboundedSender<ChangeEvent>,
    subscribe_timeout: Duration,
    stop: CancellationToken,
) {
    let ack_deadline = tokio::time::sleep(subscribe_timeout);
    tokio::pin!(ack_deadline);

    let connected = tokio::select! {
        _ = stop.cancelled() => return,
        _ = &mut ack_deadline => {
            report(&statuses, ChannelStatus::TimedOut, Some(format!("connect to {} timed out", url)));
            return;
        }
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let mut ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let err = ChannelError::Connect {
                url: url.clone(),
                message: e.to_string(),
            };
            report(&statuses, ChannelStatus::ChannelError, Some(err.to_string()));
            return;
        }
    };
    tracing::debug!(url = %url, "websocket connected");

    let mut acked = false;
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                close_quietly(&mut ws).await;
                break;
            }

            _ = &mut ack_deadline, if !acked => {
                report(&statuses, ChannelStatus::TimedOut, Some("no subscribe acknowledgement".to_string()));
                close_quietly(&mut ws).await;
                break;
            }

            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<FeedFrame>(text.as_str()) {
                    Ok(FeedFrame::Subscribed { .. }) => {
                        acked = true;
                        report(&statuses, ChannelStatus::Subscribed, None);
                    }
                    Ok(FeedFrame::Change(event)) => {
                        let _ = changes.send(event);
                    }
                    Ok(FeedFrame::Lagged { skipped }) => {
                        // Events were lost; a fresh subscription lets consumers resync.
                        report(
                            &statuses,
                            ChannelStatus::ChannelError,
                            Some(format!("subscriber lagged, {} events lost", skipped)),
                        );
                        close_quietly(&mut ws).await;
                        break;
                    }
                    Ok(FeedFrame::Error { message }) => {
                        report(&statuses, ChannelStatus::ChannelError, Some(message));
                        close_quietly(&mut ws).await;
                        break;
                    }
                    Err(e) => {
                        let err = ChannelError::Protocol(format!("malformed feed frame: {}", e));
                        tracing::warn!(url = %url, error = %err, "frame ignored");
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws.send(Message::Pong(data)).await {
                        let err = ChannelError::Send(e.to_string());
                        report(&statuses, ChannelStatus::ChannelError, Some(err.to_string()));
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    report(&statuses, ChannelStatus::ChannelError, Some("server closed the connection".to_string()));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    report(&statuses, ChannelStatus::ChannelError, Some(e.to_string()));
                    break;
                }
            },
        }
    }
}

async fn close_quietly(ws: &mut WsStream) {
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
}
