//! Unread-message counter refreshed on change notifications.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use precast_common::ChangeEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Where the authoritative unread count comes from.
#[async_trait]
pub trait CountSource: Send + Sync + 'static {
    async fn fetch_unread_count(&self, user_id: &str) -> Result<u64>;
}

/// Latest unread count, `None` until the first fetch succeeds.
pub struct UnreadCounterHandle {
    count: watch::Receiver<Option<u64>>,
    task: Option<JoinHandle<()>>,
}

impl UnreadCounterHandle {
    pub fn current(&self) -> Option<u64> {
        *self.count.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Option<u64>> {
        self.count.clone()
    }

    /// Resolves once the notification stream has ended.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for UnreadCounterHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Fetch the count for `user_id` now, then again after every notification.
///
/// Notifications that queue up while a fetch is in flight are coalesced
/// into a single refetch. A failed fetch keeps the previous count.
pub fn spawn_unread_counter<S: CountSource>(
    source: Arc<S>,
    user_id: impl Into<String>,
    mut notifications: mpsc::UnboundedReceiver<ChangeEvent>,
) -> UnreadCounterHandle {
    let user_id = user_id.into();
    let (count_tx, count_rx) = watch::channel(None);

    let task = tokio::spawn(async move {
        refresh(source.as_ref(), &user_id, &count_tx).await;
        while notifications.recv().await.is_some() {
            while notifications.try_recv().is_ok() {}
            refresh(source.as_ref(), &user_id, &count_tx).await;
        }
        tracing::debug!(user_id = %user_id, "unread counter stopped");
    });

    UnreadCounterHandle {
        count: count_rx,
        task: Some(task),
    }
}

async fn refresh<S: CountSource>(source: &S, user_id: &str, count: &watch::Sender<Option<u64>>) {
    match source.fetch_unread_count(user_id).await {
        Ok(n) => {
            count.send_replace(Some(n));
        }
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "failed to fetch unread count");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use precast_common::ChangeKind;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns scripted results in order, then repeats the last one.
    struct ScriptedSource {
        results: Mutex<Vec<Result<u64, String>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<u64, String>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CountSource for ScriptedSource {
        async fn fetch_unread_count(&self, user_id: &str) -> Result<u64> {
            self.calls.lock().unwrap().push(user_id.to_string());
            let mut results = self.results.lock().unwrap();
            let next = if results.len() > 1 {
                results.remove(0)
            } else {
                results[0].clone()
            };
            next.map_err(anyhow::Error::msg)
        }
    }

    fn notification() -> ChangeEvent {
        ChangeEvent::new("messages", "messages", ChangeKind::Insert, json!({"id": 1})).unwrap()
    }

    #[tokio::test]
    async fn test_fetches_at_start() {
        let source = ScriptedSource::new(vec![Ok(3)]);
        let (_tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_unread_counter(source.clone(), "u-1", rx);

        let mut count = handle.watch();
        count.wait_for(|c| *c == Some(3)).await.unwrap();
        assert_eq!(handle.current(), Some(3));
        assert_eq!(source.calls.lock().unwrap()[0], "u-1");
    }

    #[tokio::test]
    async fn test_refetches_on_notification() {
        let source = ScriptedSource::new(vec![Ok(0), Ok(1)]);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_unread_counter(source.clone(), "u-1", rx);
        let mut count = handle.watch();
        count.wait_for(|c| *c == Some(0)).await.unwrap();

        tx.send(notification()).unwrap();
        count.wait_for(|c| *c == Some(1)).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_count() {
        let source = ScriptedSource::new(vec![Ok(5), Err("db down".to_string())]);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_unread_counter(source.clone(), "u-1", rx);
        let mut count = handle.watch();
        count.wait_for(|c| *c == Some(5)).await.unwrap();

        tx.send(notification()).unwrap();
        drop(tx);
        handle.join().await;
        assert_eq!(*count.borrow(), Some(5));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_initial_failure_leaves_count_unknown() {
        let source = ScriptedSource::new(vec![Err("unreachable".to_string())]);
        let (tx, rx) = mpsc::unbounded_channel::<ChangeEvent>();
        drop(tx);
        let handle = spawn_unread_counter(source.clone(), "u-1", rx);
        let count = handle.watch();
        handle.join().await;
        assert_eq!(*count.borrow(), None);
        assert_eq!(source.calls(), 1);
    }
}
