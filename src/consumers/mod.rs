//! Consumers that turn a stream of change events into live state.

mod live_list;
mod unread;

pub use live_list::{Applied, LiveList, LiveListFilter, LiveListHandle, Record, spawn_live_list};
pub use unread::{CountSource, UnreadCounterHandle, spawn_unread_counter};
