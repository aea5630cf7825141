//! Typed error hierarchy for precast-live.
//!
//! Two top-level enums cover the two library surfaces:
//! - `ChannelError`: transport failures inside a channel implementation
//! - `ServerError`: change-feed server request failures

use precast_common::ChangeError;
use thiserror::Error;

/// Errors from a channel transport (hub or WebSocket).
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid channel URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Channel closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel task failed: {0}")]
    TaskFailed(#[source] tokio::task::JoinError),
}

/// Errors from the change-feed server's HTTP surface.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid topic '{0}': must be 1-128 chars of [A-Za-z0-9_:=.-]")]
    InvalidTopic(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Change hub is closed")]
    HubClosed,

    #[error(transparent)]
    Change(#[from] ChangeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
