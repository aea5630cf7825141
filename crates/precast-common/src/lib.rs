//! Types shared between the precast-live server, its channels and consumers.

pub mod change;
pub mod frame;
pub mod status;

pub use change::{ChangeError, ChangeEvent, ChangeKind, RecordKey};
pub use frame::FeedFrame;
pub use status::{ChannelStatus, StatusEvent};
