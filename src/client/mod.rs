//! Clients of a remote change-feed server.

mod ws_channel;

pub use ws_channel::{WsChannel, ws_url};
