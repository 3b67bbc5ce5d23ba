//! Change events delivered by the change feed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// A single row as a JSON object.
pub type Record = Map<String, Value>;

/// Types of changes that can occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    /// A new row was inserted.
    Insert,
    /// An existing row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Insert => write!(f, "INSERT"),
            ChangeType::Update => write!(f, "UPDATE"),
            ChangeType::Delete => write!(f, "DELETE"),
        }
    }
}

/// The kind of change a subscription listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    /// Every change type.
    #[default]
    #[serde(rename = "*")]
    Any,
}

impl EventKind {
    /// Check whether a change of the given type is covered by this kind.
    pub fn matches(&self, change_type: ChangeType) -> bool {
        match self {
            EventKind::Any => true,
            EventKind::Insert => change_type == ChangeType::Insert,
            EventKind::Update => change_type == ChangeType::Update,
            EventKind::Delete => change_type == ChangeType::Delete,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Insert => write!(f, "INSERT"),
            EventKind::Update => write!(f, "UPDATE"),
            EventKind::Delete => write!(f, "DELETE"),
            EventKind::Any => write!(f, "*"),
        }
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(EventKind::Insert),
            "update" => Ok(EventKind::Update),
            "delete" => Ok(EventKind::Delete),
            "any" | "*" => Ok(EventKind::Any),
            _ => Err(Error::UnknownEventKind(s.to_string())),
        }
    }
}

impl From<ChangeType> for EventKind {
    fn from(change_type: ChangeType) -> Self {
        match change_type {
            ChangeType::Insert => EventKind::Insert,
            ChangeType::Update => EventKind::Update,
            ChangeType::Delete => EventKind::Delete,
        }
    }
}

/// A change notification produced by the change feed.
///
/// The subscription layer passes events through untouched; only the
/// in-process feed looks inside them to evaluate filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Namespace (schema) of the changed collection.
    pub schema: String,
    /// Name of the changed collection.
    pub table: String,
    /// The type of change.
    #[serde(rename = "eventType")]
    pub change_type: ChangeType,
    /// When the change was committed, if the feed reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<DateTime<Utc>>,
    /// Row contents after the change (empty for deletes).
    #[serde(default)]
    pub new: Record,
    /// Row contents before the change (empty for inserts).
    #[serde(default)]
    pub old: Record,
}

impl ChangeEvent {
    /// Create an insert event in the default namespace.
    pub fn insert(table: impl Into<String>, new: Record) -> Self {
        Self::new(table, ChangeType::Insert, new, Record::new())
    }

    /// Create an update event in the default namespace.
    pub fn update(table: impl Into<String>, old: Record, new: Record) -> Self {
        Self::new(table, ChangeType::Update, new, old)
    }

    /// Create a delete event in the default namespace.
    pub fn delete(table: impl Into<String>, old: Record) -> Self {
        Self::new(table, ChangeType::Delete, Record::new(), old)
    }

    fn new(table: impl Into<String>, change_type: ChangeType, new: Record, old: Record) -> Self {
        Self {
            schema: crate::DEFAULT_NAMESPACE.to_string(),
            table: table.into(),
            change_type,
            commit_timestamp: None,
            new,
            old,
        }
    }

    /// Set the namespace.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Set the commit timestamp.
    pub fn with_commit_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.commit_timestamp = Some(timestamp);
        self
    }

    /// The row a filter is evaluated against: `old` for deletes, `new` otherwise.
    pub fn record(&self) -> &Record {
        match self.change_type {
            ChangeType::Delete => &self.old,
            ChangeType::Insert | ChangeType::Update => &self.new,
        }
    }

    /// Decode an event from a JSON document.
    pub fn from_json(input: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(input)?)
    }

    /// Encode the event as a JSON document.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Build a [`Record`] from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty record.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}
