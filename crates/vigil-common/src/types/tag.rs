//! Tags: named, timestamped, versioned process variables
//!
//! A tag is owned by exactly one node at a time. Updates arrive from driver
//! adapters; the bus bumps the version counter on every accepted update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tag identifier, e.g. `"FIC101.PV"` or `"VALVE_7.SP"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(String);

impl TagId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TagId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TagId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Process value carried by a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl TagValue {
    /// Numeric view of the value, where one exists.
    ///
    /// Booleans map to 0.0/1.0 the way PLC discrete points usually do.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            TagValue::Integer(i) => Some(*i as f64),
            TagValue::Float(f) => Some(*f),
            TagValue::Text(_) => None,
        }
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

/// OPC-style quality of a tag reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagQuality {
    Good,
    Uncertain,
    Bad,
}

impl fmt::Display for TagQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TagQuality::Good => "Good",
            TagQuality::Uncertain => "Uncertain",
            TagQuality::Bad => "Bad",
        };
        f.write_str(s)
    }
}

/// Current state of a tag as held by the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub value: TagValue,
    pub quality: TagQuality,
    /// Source timestamp of the last accepted update
    pub timestamp: DateTime<Utc>,
    /// Bumped on every accepted update
    pub version: u64,
}

/// Update pushed by a driver adapter into the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagUpdate {
    pub tag_id: TagId,
    pub value: TagValue,
    pub quality: TagQuality,
    pub timestamp: DateTime<Utc>,
}

impl TagUpdate {
    pub fn new(tag_id: impl Into<TagId>, value: impl Into<TagValue>, quality: TagQuality) -> Self {
        Self {
            tag_id: tag_id.into(),
            value: value.into(),
            quality,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Consistent point-in-time view over a set of tags
///
/// Snapshots are plain copies; simulation and estimation operate on them
/// without touching bus state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagSnapshot {
    tags: HashMap<TagId, Tag>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl TagSnapshot {
    pub fn new(tags: HashMap<TagId, Tag>) -> Self {
        Self {
            tags,
            taken_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, id: &TagId) -> Option<&Tag> {
        self.tags.get(id)
    }

    pub fn value_f64(&self, id: &TagId) -> Option<f64> {
        self.tags.get(id).and_then(|t| t.value.as_f64())
    }

    pub fn quality(&self, id: &TagId) -> Option<TagQuality> {
        self.tags.get(id).map(|t| t.quality)
    }

    /// Versions of every tag in the snapshot, recorded into proposals so the
    /// validator can detect staleness later.
    pub fn versions(&self) -> std::collections::BTreeMap<TagId, u64> {
        self.tags
            .iter()
            .map(|(id, tag)| (id.clone(), tag.version))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TagId, &Tag)> {
        self.tags.iter()
    }
}
