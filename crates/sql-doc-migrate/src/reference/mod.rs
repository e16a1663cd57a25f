//! Reference index: maps a source row's primary key to the identifier the sink
//! assigned to its document.
//!
//! The index has two states. [`ReferenceIndex`] accepts inserts (from several
//! table workers at once if needed) while documents are loaded. Once loading
//! is done it is frozen into a [`FrozenReferenceIndex`], which only supports
//! lookups, so resolution can never observe a half-built index.

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::core::{DocumentId, Value};
use crate::error::{MigrateError, Result};

/// A primary key value normalized for lookups.
///
/// Source keys and foreign keys may arrive with different representations
/// (an integer key and a `"42"` string foreign key, say), so integral values
/// are folded into [`OriginKey::Int`]. Text only folds when written in
/// canonical form; `"007"` keeps its own identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OriginKey {
    /// Integer key (covers every integer width and canonical integral text).
    Int(i64),
    /// UUID key.
    Uuid(Uuid),
    /// Any other textual key.
    String(String),
}

impl OriginKey {
    /// Normalize a value into a key, or `None` if it cannot identify a row.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(OriginKey::Int(*v)),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64().map(OriginKey::Int),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(OriginKey::Int(*f as i64)),
            Value::Uuid(u) => Some(OriginKey::Uuid(*u)),
            Value::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else if let Some(v) = canonical_integer(s) {
                    Some(OriginKey::Int(v))
                } else if let Ok(u) = Uuid::parse_str(s) {
                    Some(OriginKey::Uuid(u))
                } else {
                    Some(OriginKey::String(s.to_string()))
                }
            }
            _ => None,
        }
    }
}

/// Integer value of `s` if it is written in canonical form, so `"7"` folds
/// but `"007"` and `"+7"` stay distinct string keys.
fn canonical_integer(s: &str) -> Option<i64> {
    let v = s.parse::<i64>().ok()?;
    (v.to_string() == s).then_some(v)
}

impl From<i64> for OriginKey {
    fn from(v: i64) -> Self {
        OriginKey::Int(v)
    }
}

impl From<&str> for OriginKey {
    fn from(v: &str) -> Self {
        OriginKey::String(v.to_string())
    }
}

type Entries = HashMap<String, HashMap<OriginKey, DocumentId>>;

/// Index under construction.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    entries: RwLock<Entries>,
}

impl ReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the identifier assigned to a row of `collection`.
    ///
    /// A repeated origin key replaces the previous entry and returns it.
    pub fn insert(
        &self,
        collection: &str,
        origin: OriginKey,
        assigned: DocumentId,
    ) -> Result<Option<DocumentId>> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| MigrateError::Index("reference index lock poisoned".into()))?;
        let previous = entries
            .entry(collection.to_string())
            .or_default()
            .insert(origin.clone(), assigned);
        if previous.is_some() {
            warn!(
                "{}: origin identifier {:?} seen more than once, keeping the latest document",
                collection, origin
            );
        }
        Ok(previous)
    }

    /// Stop accepting inserts and switch to lookups.
    pub fn freeze(self) -> Result<FrozenReferenceIndex> {
        let entries = self
            .entries
            .into_inner()
            .map_err(|_| MigrateError::Index("reference index lock poisoned".into()))?;
        Ok(FrozenReferenceIndex { entries })
    }
}

/// Read-only index used while resolving references.
#[derive(Debug, Default, Clone)]
pub struct FrozenReferenceIndex {
    entries: Entries,
}

impl FrozenReferenceIndex {
    /// Identifier assigned to the row of `collection` whose key was `origin`.
    pub fn lookup(&self, collection: &str, origin: &OriginKey) -> Option<&DocumentId> {
        self.entries.get(collection)?.get(origin)
    }

    /// Look up a raw foreign key value.
    pub fn resolve(&self, collection: &str, value: &Value) -> Option<&DocumentId> {
        self.lookup(collection, &OriginKey::from_value(value)?)
    }

    /// Number of rows recorded for a collection.
    pub fn collection_len(&self, collection: &str) -> usize {
        self.entries.get(collection).map_or(0, HashMap::len)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
