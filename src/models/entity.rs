//! Entity data structure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Open metadata attached to an entity.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A scalar metadata value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Borrow the value as text, if it is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(v) => write!(f, "{v}"),
            MetadataValue::Integer(v) => write!(f, "{v}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// A ranked record collected from the search service.
///
/// `id` is the natural key: observing the same `id` again updates the stored
/// record instead of adding a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Stable, globally unique identifier
    pub id: String,

    /// Human-readable name (e.g. `owner/repo`)
    pub display_name: String,

    /// Rank score (e.g. stargazer count)
    pub rank_score: i64,

    /// Additional attributes such as creation and update timestamps
    #[serde(default)]
    pub metadata: Metadata,
}

impl Entity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, rank_score: i64) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            rank_score,
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insertion.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Apply an incoming observation of the same entity.
    ///
    /// Scalar fields take the incoming values. Metadata is merged: incoming
    /// keys overwrite, keys missing from `incoming` are kept.
    pub fn merge_from(&mut self, incoming: Entity) {
        debug_assert_eq!(self.id, incoming.id);
        self.display_name = incoming.display_name;
        self.rank_score = incoming.rank_score;
        self.metadata.extend(incoming.metadata);
    }

    /// Collapse repeated ids within a batch, keeping first-seen order.
    pub fn coalesce(batch: &[Entity]) -> Vec<Entity> {
        let mut positions: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::with_capacity(batch.len());
        let mut out: Vec<Entity> = Vec::with_capacity(batch.len());

        for entity in batch {
            match positions.get(entity.id.as_str()) {
                Some(&idx) => out[idx].merge_from(entity.clone()),
                None => {
                    positions.insert(entity.id.as_str(), out.len());
                    out.push(entity.clone());
                }
            }
        }
        out
    }
}
