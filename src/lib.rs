pub mod client;
pub mod config;
pub mod consumers;
pub mod errors;
pub mod hub;
pub mod logging;
pub mod server;
pub mod subscription;

pub use precast_common::{ChangeEvent, ChangeKind, ChannelStatus, FeedFrame, RecordKey, StatusEvent};
