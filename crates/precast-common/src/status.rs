//! Raw status vocabulary reported by a real-time channel.
//!
//! Channels report their lifecycle as plain strings. Two of them
//! (`CHANNEL_ERROR`, `TIMED_OUT`) mean the transport dropped and the
//! subscription should be retried; everything else is informational.

use serde::{Deserialize, Serialize};

/// A status reported by a channel for one subscribe attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelStatus {
    /// The server acknowledged the subscription.
    Subscribed,
    /// The transport failed (network drop, server rejection).
    ChannelError,
    /// The server did not acknowledge in time.
    TimedOut,
    /// The channel was closed cleanly.
    Closed,
    /// Any status this crate does not interpret.
    Other(String),
}

impl ChannelStatus {
    /// Wire representation of the status.
    pub fn as_str(&self) -> &str {
        match self {
            ChannelStatus::Subscribed => "SUBSCRIBED",
            ChannelStatus::ChannelError => "CHANNEL_ERROR",
            ChannelStatus::TimedOut => "TIMED_OUT",
            ChannelStatus::Closed => "CLOSED",
            ChannelStatus::Other(s) => s.as_str(),
        }
    }

    /// True for the statuses that trigger a reconnect.
    pub fn is_transient_failure(&self) -> bool {
        matches!(self, ChannelStatus::ChannelError | ChannelStatus::TimedOut)
    }
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ChannelStatus {
    fn from(s: &str) -> Self {
        match s {
            "SUBSCRIBED" => ChannelStatus::Subscribed,
            "CHANNEL_ERROR" => ChannelStatus::ChannelError,
            "TIMED_OUT" => ChannelStatus::TimedOut,
            "CLOSED" => ChannelStatus::Closed,
            other => ChannelStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for ChannelStatus {
    fn from(s: String) -> Self {
        ChannelStatus::from(s.as_str())
    }
}

impl From<ChannelStatus> for String {
    fn from(status: ChannelStatus) -> Self {
        status.as_str().to_string()
    }
}

/// One status delivery, optionally carrying the transport's error text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: ChannelStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusEvent {
    pub fn new(status: ChannelStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn with_error(status: ChannelStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }
}

impl From<ChannelStatus> for StatusEvent {
    fn from(status: ChannelStatus) -> Self {
        StatusEvent::new(status)
    }
}
