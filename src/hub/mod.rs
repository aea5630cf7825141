//! In-process change hub: one broadcast fan-out per topic.
//!
//! Producers [`ChangeHub::publish`] change events; subscribers attach to a
//! topic either directly ([`ChangeHub::subscribe_topic`], used by the
//! WebSocket server) or through a [`HubChannel`] driven by a reconnecting
//! subscription.

mod channel;

pub use channel::HubChannel;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use precast_common::ChangeEvent;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::errors::ChannelError;

/// Default per-topic broadcast buffer.
pub const DEFAULT_CAPACITY: usize = 256;

/// Topic name plus its live subscriber count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    pub topic: String,
    pub subscribers: usize,
}

struct HubInner {
    topics: RwLock<HashMap<String, broadcast::Sender<ChangeEvent>>>,
    capacity: usize,
    closed: AtomicBool,
}

/// Cheaply cloneable handle to a shared hub.
#[derive(Clone)]
pub struct ChangeHub {
    inner: Arc<HubInner>,
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChangeHub {
    /// `capacity` is the per-topic buffer; a subscriber further behind
    /// than this loses events and is told so.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Deliver `event` to every subscriber of `event.topic`. Returns how
    /// many subscribers received it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        if self.is_closed() {
            return 0;
        }
        let topic = event.topic.clone();
        let delivered = {
            let topics = self.inner.topics.read().unwrap_or_else(|e| e.into_inner());
            match topics.get(&topic) {
                Some(tx) => tx.send(event).unwrap_or(0),
                None => return 0,
            }
        };
        if delivered == 0 {
            self.release(&topic);
        }
        tracing::trace!(topic = %topic, delivered, "change published");
        delivered
    }

    /// Attach a raw receiver to `topic`, creating the topic on first use.
    pub fn subscribe_topic(&self, topic: &str) -> Result<broadcast::Receiver<ChangeEvent>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let mut topics = self.inner.topics.write().unwrap_or_else(|e| e.into_inner());
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0);
        Ok(tx.subscribe())
    }

    /// Channel bound to `topic` whose change events are forwarded into
    /// `changes`.
    pub fn channel(
        &self,
        topic: impl Into<String>,
        changes: mpsc::UnboundedSender<ChangeEvent>,
    ) -> HubChannel {
        HubChannel::new(self.clone(), topic.into(), changes)
    }

    /// Topics that currently have at least one subscriber, sorted by name.
    pub fn topics(&self) -> Vec<TopicInfo> {
        let topics = self.inner.topics.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<TopicInfo> = topics
            .iter()
            .filter(|(_, tx)| tx.receiver_count() > 0)
            .map(|(topic, tx)| TopicInfo {
                topic: topic.clone(),
                subscribers: tx.receiver_count(),
            })
            .collect();
        list.sort_by(|a, b| a.topic.cmp(&b.topic));
        list
    }

    /// Close the hub. Every live subscriber observes the closure and no
    /// new subscriptions are accepted.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner
            .topics
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        tracing::info!("change hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Forget `topic` once its last subscriber has gone. Call after dropping
    /// a receiver from [`Self::subscribe_topic`].
    pub fn release(&self, topic: &str) {
        let mut topics = self.inner.topics.write().unwrap_or_else(|e| e.into_inner());
        if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
            topics.remove(topic);
        }
    }

    #[cfg(test)]
    pub(crate) fn topic_entries(&self) -> usize {
        self.inner.topics.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use precast_common::ChangeKind;
    use serde_json::json;

    fn event(topic: &str, id: i64) -> ChangeEvent {
        ChangeEvent::new(topic, "elements", ChangeKind::Insert, json!({"id": id})).unwrap()
    }

    #[tokio::test]
    async fn test_publish_reaches_all_topic_subscribers() {
        let hub = ChangeHub::new(16);
        let mut a = hub.subscribe_topic("elements").unwrap();
        let mut b = hub.subscribe_topic("elements").unwrap();
        let mut other = hub.subscribe_topic("messages").unwrap();

        assert_eq!(hub.publish(event("elements", 1)), 2);
        assert_eq!(a.recv().await.unwrap().key().unwrap().as_str(), "1");
        assert_eq!(b.recv().await.unwrap().key().unwrap().as_str(), "1");
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_delivers_nothing() {
        let hub = ChangeHub::default();
        assert_eq!(hub.publish(event("elements", 1)), 0);
        assert!(hub.topics().is_empty());
    }

    #[test]
    fn test_topics_lists_live_subscribers() {
        let hub = ChangeHub::new(4);
        let _a = hub.subscribe_topic("messages").unwrap();
        let _b = hub.subscribe_topic("elements").unwrap();
        let _c = hub.subscribe_topic("elements").unwrap();
        let dropped = hub.subscribe_topic("deliveries").unwrap();
        drop(dropped);

        let topics = hub.topics();
        assert_eq!(
            topics,
            vec![
                TopicInfo {
                    topic: "elements".into(),
                    subscribers: 2
                },
                TopicInfo {
                    topic: "messages".into(),
                    subscribers: 1
                },
            ]
        );
    }

    #[test]
    fn test_publish_prunes_abandoned_topic() {
        let hub = ChangeHub::new(4);
        drop(hub.subscribe_topic("elements").unwrap());
        assert_eq!(hub.publish(event("elements", 1)), 0);
        assert_eq!(hub.topic_entries(), 0);
    }

    #[test]
    fn test_release_forgets_topics_after_subscribers_leave() {
        let hub = ChangeHub::new(4);
        for n in 0..1000 {
            let topic = format!("elements:project_id={}", n);
            drop(hub.subscribe_topic(&topic).unwrap());
            hub.release(&topic);
        }
        assert_eq!(hub.topic_entries(), 0);

        // A topic with a remaining subscriber is kept.
        let _live = hub.subscribe_topic("messages").unwrap();
        drop(hub.subscribe_topic("messages").unwrap());
        hub.release("messages");
        assert_eq!(hub.topic_entries(), 1);
    }

    #[tokio::test]
    async fn test_close_ends_subscribers_and_rejects_new_ones() {
        let hub = ChangeHub::new(4);
        let mut rx = hub.subscribe_topic("elements").unwrap();
        hub.close();

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(matches!(
            hub.subscribe_topic("elements"),
            Err(ChannelError::Closed)
        ));
        assert_eq!(hub.publish(event("elements", 1)), 0);
    }
}
