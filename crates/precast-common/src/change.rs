//! Row-level change notifications carried over a channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Kind of row change, matching the backend's `eventType` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = ChangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(ChangeKind::Insert),
            "update" => Ok(ChangeKind::Update),
            "delete" => Ok(ChangeKind::Delete),
            _ => Err(ChangeError::InvalidKind(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChangeError {
    #[error("Invalid change kind '{0}'. Valid values: insert, update, delete")]
    InvalidKind(String),

    #[error("Record must be a JSON object, got {0}")]
    RecordNotObject(&'static str),
}

/// Identifier of a record, normalized to a string so numeric and UUID
/// primary keys compare the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(pub String);

impl RecordKey {
    /// Read the `id` field of a record. Strings and integers are accepted.
    pub fn from_record(record: &Map<String, Value>) -> Option<Self> {
        match record.get("id")? {
            Value::String(s) if !s.is_empty() => Some(RecordKey(s.clone())),
            Value::Number(n) => Some(RecordKey(n.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A change to one row, published on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub topic: String,
    pub table: String,
    pub kind: ChangeKind,
    /// New row image. For deletes this is usually empty.
    #[serde(default)]
    pub record: Map<String, Value>,
    /// Previous row image, when the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<Map<String, Value>>,
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event from a JSON record, stamping a fresh id and the
    /// current time.
    pub fn new(
        topic: impl Into<String>,
        table: impl Into<String>,
        kind: ChangeKind,
        record: Value,
    ) -> Result<Self, ChangeError> {
        Ok(Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            table: table.into(),
            kind,
            record: into_object(record)?,
            old_record: None,
            committed_at: Utc::now(),
        })
    }

    pub fn with_old_record(mut self, old_record: Value) -> Result<Self, ChangeError> {
        self.old_record = Some(into_object(old_record)?);
        Ok(self)
    }

    /// Key of the affected row. Deletes prefer the old row image.
    pub fn key(&self) -> Option<RecordKey> {
        match self.kind {
            ChangeKind::Delete => self
                .old_record
                .as_ref()
                .and_then(RecordKey::from_record)
                .or_else(|| RecordKey::from_record(&self.record)),
            _ => RecordKey::from_record(&self.record),
        }
    }

    /// `project_id` of the affected row, read the same way as [`Self::key`].
    pub fn project_id(&self) -> Option<String> {
        let read = |row: &Map<String, Value>| match row.get("project_id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        match self.kind {
            ChangeKind::Delete => self
                .old_record
                .as_ref()
                .and_then(read)
                .or_else(|| read(&self.record)),
            _ => read(&self.record),
        }
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>, ChangeError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Err(ChangeError::RecordNotObject("null")),
        Value::Bool(_) => Err(ChangeError::RecordNotObject("a boolean")),
        Value::Number(_) => Err(ChangeError::RecordNotObject("a number")),
        Value::String(_) => Err(ChangeError::RecordNotObject("a string")),
        Value::Array(_) => Err(ChangeError::RecordNotObject("an array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_kind_parse_is_case_insensitive() {
        assert_eq!("insert".parse::<ChangeKind>(), Ok(ChangeKind::Insert));
        assert_eq!("UPDATE".parse::<ChangeKind>(), Ok(ChangeKind::Update));
        assert_eq!("Delete".parse::<ChangeKind>(), Ok(ChangeKind::Delete));
        assert!(matches!(
            "upsert".parse::<ChangeKind>(),
            Err(ChangeError::InvalidKind(_))
        ));
    }

    #[test]
    fn test_record_key_accepts_strings_and_numbers() {
        let ev = ChangeEvent::new("elements", "elements", ChangeKind::Insert, json!({"id": 7}))
            .unwrap();
        assert_eq!(ev.key(), Some(RecordKey("7".to_string())));

        let ev = ChangeEvent::new(
            "elements",
            "elements",
            ChangeKind::Insert,
            json!({"id": "a1b2"}),
        )
        .unwrap();
        assert_eq!(ev.key().unwrap().as_str(), "a1b2");
    }

    #[test]
    fn test_record_without_id_has_no_key() {
        let ev = ChangeEvent::new("t", "elements", ChangeKind::Update, json!({"name": "W-12"}))
            .unwrap();
        assert_eq!(ev.key(), None);

        let ev = ChangeEvent::new("t", "elements", ChangeKind::Update, json!({"id": ""})).unwrap();
        assert_eq!(ev.key(), None);
    }

    #[test]
    fn test_delete_key_prefers_old_record() {
        let ev = ChangeEvent::new("t", "elements", ChangeKind::Delete, json!({}))
            .unwrap()
            .with_old_record(json!({"id": 42, "project_id": 3}))
            .unwrap();
        assert_eq!(ev.key(), Some(RecordKey("42".to_string())));
        assert_eq!(ev.project_id().as_deref(), Some("3"));
    }

    #[test]
    fn test_non_object_record_is_rejected() {
        let err = ChangeEvent::new("t", "elements", ChangeKind::Insert, json!([1, 2])).unwrap_err();
        assert_eq!(err, ChangeError::RecordNotObject("an array"));
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_change_event_wire_format() {
        let ev = ChangeEvent::new(
            "elements:project=3",
            "elements",
            ChangeKind::Insert,
            json!({"id": 1, "project_id": 3}),
        )
        .unwrap();
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["kind"], "INSERT");
        assert_eq!(value["topic"], "elements:project=3");
        assert!(value.get("old_record").is_none());

        let parsed: ChangeEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, ev);
    }
}
