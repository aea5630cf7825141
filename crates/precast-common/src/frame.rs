//! Frames the change-feed server sends to WebSocket subscribers.

use serde::{Deserialize, Serialize};

use crate::change::ChangeEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedFrame {
    /// The subscription to `topic` is live. Always the first frame.
    Subscribed { topic: String },
    /// One change on the subscribed topic.
    Change(ChangeEvent),
    /// The subscriber fell behind and `skipped` events were dropped.
    Lagged { skipped: u64 },
    /// The server is ending the subscription.
    Error { message: String },
}
