use async_trait::async_trait;
use precast_common::StatusEvent;
use tokio::sync::mpsc;

use crate::errors::ChannelError;

/// Where a channel delivers the statuses of one subscribe attempt.
pub type StatusSink = mpsc::UnboundedSender<StatusEvent>;

/// A handle to one named server-side event stream.
///
/// Real implementations: `HubChannel` (in-process) and `WsChannel`
/// (remote change-feed server). The reconnecting driver owns the channel
/// exclusively and never has two attempts outstanding at once.
#[async_trait]
pub trait Channel: Send + 'static {
    /// Topic this channel is bound to, for logging.
    fn topic(&self) -> &str;

    /// Begin a subscribe attempt. Returns immediately; statuses for the
    /// attempt are delivered asynchronously into `statuses`.
    fn subscribe(&mut self, statuses: StatusSink);

    /// Tear the current attempt down. Resolves once teardown has finished.
    /// Calling it with no attempt in flight is a no-op.
    async fn unsubscribe(&mut self) -> Result<(), ChannelError>;
}
