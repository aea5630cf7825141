//! In-memory collection kept current by change events.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use precast_common::{ChangeEvent, ChangeKind, RecordKey};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub type Record = Map<String, Value>;

/// Which events a list cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveListFilter {
    /// Only events for this table
    pub table: Option<String>,
    /// Only rows whose `project_id` equals this
    pub project_id: Option<String>,
}

impl LiveListFilter {
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    fn in_scope(&self, event: &ChangeEvent) -> bool {
        match &self.project_id {
            Some(want) => event.project_id().as_deref() == Some(want.as_str()),
            None => true,
        }
    }
}

/// What [`LiveList::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    Removed,
    Ignored,
}

/// Records keyed by id, merged from insert/update/delete events.
#[derive(Debug, Clone, Default)]
pub struct LiveList {
    filter: LiveListFilter,
    records: BTreeMap<RecordKey, Record>,
}

impl LiveList {
    pub fn new(filter: LiveListFilter) -> Self {
        Self {
            filter,
            records: BTreeMap::new(),
        }
    }

    /// Seed with the rows of an initial fetch. Rows without an id are skipped.
    pub fn with_records(filter: LiveListFilter, initial: impl IntoIterator<Item = Record>) -> Self {
        let records = initial
            .into_iter()
            .filter_map(|r| RecordKey::from_record(&r).map(|k| (k, r)))
            .collect();
        Self { filter, records }
    }

    pub fn apply(&mut self, event: &ChangeEvent) -> Applied {
        if let Some(table) = &self.filter.table
            && table != &event.table
        {
            return Applied::Ignored;
        }
        let Some(key) = event.key() else {
            tracing::debug!(table = %event.table, kind = %event.kind, "change without id ignored");
            return Applied::Ignored;
        };

        match event.kind {
            ChangeKind::Delete => match self.records.remove(&key) {
                Some(_) => Applied::Removed,
                None => Applied::Ignored,
            },
            ChangeKind::Insert | ChangeKind::Update => {
                if !self.filter.in_scope(event) {
                    // An update can move a row out of scope.
                    return match self.records.remove(&key) {
                        Some(_) => Applied::Removed,
                        None => Applied::Ignored,
                    };
                }
                match self.records.insert(key, event.record.clone()) {
                    Some(_) => Applied::Updated,
                    None => Applied::Inserted,
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(&RecordKey(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in key order.
    pub fn records(&self) -> impl Iterator<Item = (&RecordKey, &Record)> {
        self.records.iter()
    }

    pub fn filter(&self) -> &LiveListFilter {
        &self.filter
    }
}

/// A [`LiveList`] fed by a background task.
pub struct LiveListHandle {
    list: Arc<RwLock<LiveList>>,
    version: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl LiveListHandle {
    /// Copy of the current records in key order.
    pub fn snapshot(&self) -> Vec<Record> {
        self.list
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .records()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.list.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        self.list
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Bumped every time an event changes the list.
    pub fn watch_version(&self) -> watch::Receiver<u64> {
        self.version.clone()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for LiveListHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Apply every event from `changes` to `list` until the sender side closes.
pub fn spawn_live_list(mut changes: mpsc::UnboundedReceiver<ChangeEvent>, list: LiveList) -> LiveListHandle {
    let list = Arc::new(RwLock::new(list));
    let (version_tx, version_rx) = watch::channel(0u64);

    let shared = list.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = changes.recv().await {
            let applied = shared
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .apply(&event);
            if applied != Applied::Ignored {
                version_tx.send_modify(|v| *v += 1);
            }
            tracing::trace!(id = %event.id, ?applied, "live list change");
        }
    });

    LiveListHandle {
        list,
        version: version_rx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(kind: ChangeKind, record: Value) -> ChangeEvent {
        ChangeEvent::new("elements", "elements", kind, record).unwrap()
    }

    fn delete(old: Value) -> ChangeEvent {
        ChangeEvent::new("elements", "elements", ChangeKind::Delete, json!({}))
            .unwrap()
            .with_old_record(old)
            .unwrap()
    }

    #[test]
    fn test_insert_update_delete_merge_by_id() {
        let mut list = LiveList::default();
        assert_eq!(
            list.apply(&change(ChangeKind::Insert, json!({"id": 1, "mark": "W-1"}))),
            Applied::Inserted
        );
        assert_eq!(
            list.apply(&change(ChangeKind::Insert, json!({"id": 2, "mark": "W-2"}))),
            Applied::Inserted
        );
        assert_eq!(
            list.apply(&change(ChangeKind::Update, json!({"id": 1, "mark": "W-1b"}))),
            Applied::Updated
        );
        assert_eq!(list.get("1").unwrap()["mark"], "W-1b");

        assert_eq!(list.apply(&delete(json!({"id": 2}))), Applied::Removed);
        assert_eq!(list.len(), 1);
        assert!(list.get("2").is_none());
    }

    #[test]
    fn test_update_of_unknown_row_inserts_it() {
        let mut list = LiveList::default();
        assert_eq!(
            list.apply(&change(ChangeKind::Update, json!({"id": "e-9"}))),
            Applied::Inserted
        );
        assert!(list.get("e-9").is_some());
    }

    #[test]
    fn test_delete_of_unknown_row_is_ignored() {
        let mut list = LiveList::default();
        assert_eq!(list.apply(&delete(json!({"id": 3}))), Applied::Ignored);
    }

    #[test]
    fn test_events_without_id_are_ignored() {
        let mut list = LiveList::default();
        assert_eq!(
            list.apply(&change(ChangeKind::Insert, json!({"mark": "W-1"}))),
            Applied::Ignored
        );
        assert!(list.is_empty());
    }

    #[test]
    fn test_table_filter() {
        let mut list = LiveList::new(LiveListFilter::default().table("elements"));
        let other = ChangeEvent::new("elements", "deliveries", ChangeKind::Insert, json!({"id": 1}))
            .unwrap();
        assert_eq!(list.apply(&other), Applied::Ignored);
        assert_eq!(
            list.apply(&change(ChangeKind::Insert, json!({"id": 1}))),
            Applied::Inserted
        );
    }

    #[test]
    fn test_project_scope_and_move_out() {
        let mut list = LiveList::new(LiveListFilter::default().project("7"));
        assert_eq!(
            list.apply(&change(ChangeKind::Insert, json!({"id": 1, "project_id": 7}))),
            Applied::Inserted
        );
        assert_eq!(
            list.apply(&change(ChangeKind::Insert, json!({"id": 2, "project_id": 8}))),
            Applied::Ignored
        );
        // Reassigned to another project: drops out of this list.
        assert_eq!(
            list.apply(&change(ChangeKind::Update, json!({"id": 1, "project_id": 8}))),
            Applied::Removed
        );
        assert!(list.is_empty());
    }

    #[test]
    fn test_seeded_records_are_keyed() {
        let initial = vec![
            json!({"id": 1, "mark": "A"}).as_object().unwrap().clone(),
            json!({"mark": "no id"}).as_object().unwrap().clone(),
            json!({"id": 3, "mark": "C"}).as_object().unwrap().clone(),
        ];
        let list = LiveList::with_records(LiveListFilter::default(), initial);
        assert_eq!(list.len(), 2);
        let keys: Vec<_> = list.records().map(|(k, _)| k.as_str().to_string()).collect();
        assert_eq!(keys, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_spawned_list_applies_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_live_list(rx, LiveList::default());
        let mut version = handle.watch_version();

        tx.send(change(ChangeKind::Insert, json!({"id": 1}))).unwrap();
        tx.send(change(ChangeKind::Insert, json!({"mark": "ignored"}))).unwrap();
        tx.send(change(ChangeKind::Insert, json!({"id": 2}))).unwrap();

        version.wait_for(|v| *v >= 2).await.unwrap();
        assert_eq!(handle.len(), 2);
        assert_eq!(handle.snapshot().len(), 2);
        assert!(handle.get("2").is_some());
    }
}
