use async_trait::async_trait;
use precast_common::{ChangeEvent, ChannelStatus, StatusEvent};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ChangeHub;
use crate::errors::ChannelError;
use crate::subscription::{Channel, StatusSink};

/// Channel over an in-process [`ChangeHub`] topic.
pub struct HubChannel {
    hub: ChangeHub,
    topic: String,
    changes: mpsc::UnboundedSender<ChangeEvent>,
    forwarder: Option<Forwarder>,
}

struct Forwarder {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl HubChannel {
    pub(super) fn new(
        hub: ChangeHub,
        topic: String,
        changes: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Self {
        Self {
            hub,
            topic,
            changes,
            forwarder: None,
        }
    }
}

#[async_trait]
impl Channel for HubChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn subscribe(&mut self, statuses: StatusSink) {
        if let Some(old) = self.forwarder.take() {
            old.stop.cancel();
        }

        match self.hub.subscribe_topic(&self.topic) {
            Ok(rx) => {
                let stop = CancellationToken::new();
                let task = tokio::spawn(forward(
                    self.hub.clone(),
                    self.topic.clone(),
                    rx,
                    statuses,
                    self.changes.clone(),
                    stop.clone(),
                ));
                self.forwarder = Some(Forwarder { stop, task });
            }
            Err(e) => {
                let _ = statuses.send(StatusEvent::with_error(
                    ChannelStatus::ChannelError,
                    e.to_string(),
                ));
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), ChannelError> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.stop.cancel();
            forwarder.task.await.map_err(ChannelError::TaskFailed)?;
        }
        Ok(())
    }
}

impl Drop for HubChannel {
    fn drop(&mut self) {
        if let Some(forwarder) = &self.forwarder {
            forwarder.stop.cancel();
        }
    }
}

async fn forward(
    hub: ChangeHub,
    topic: String,
    mut rx: broadcast::Receiver<ChangeEvent>,
    statuses: StatusSink,
    changes: mpsc::UnboundedSender<ChangeEvent>,
    stop: CancellationToken,
) {
    let _ = statuses.send(StatusEvent::new(ChannelStatus::Subscribed));

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => {
                    if changes.send(event).is_err() {
                        // Consumer is gone; nothing left to feed.
                        let _ = statuses.send(StatusEvent::new(ChannelStatus::Closed));
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    let _ = statuses.send(StatusEvent::with_error(
                        ChannelStatus::ChannelError,
                        format!("subscriber lagged, {} events lost", skipped),
                    ));
                    break;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    let _ = statuses.send(StatusEvent::with_error(
                        ChannelStatus::ChannelError,
                        "hub closed",
                    ));
                    break;
                }
            },
        }
    }

    drop(rx);
    hub.release(&topic);
}
