// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Category, record and payload types.
//!
//! A [`Payload`] is the unit of read/write with every source: an ordered list
//! of [`Record`]s with unique ids. Shape validation happens here, once, at the
//! fetch boundary. Anything that is not an array of objects carrying a usable
//! `id` is rejected as malformed.
//!
//! # Example
//!
//! ```
//! use catalog_sync::{Payload, RecordId};
//! use serde_json::json;
//!
//! let payload = Payload::from_value(json!([
//!     {"id": 7, "title": "Raid Night"},
//!     {"id": "bonus", "title": "Bonus Round"},
//! ])).unwrap();
//!
//! assert_eq!(payload.len(), 2);
//! assert_eq!(payload.records()[0].id(), &RecordId::Int(7));
//!
//! // Not an array: malformed, not "empty"
//! assert!(Payload::from_value(json!({"id": 1})).is_err());
//! // Empty array: valid
//! assert!(Payload::from_value(json!([])).unwrap().is_empty());
//! ```

use std::collections::HashSet;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field names consulted, in order, for a record's modification timestamp
/// (epoch millis).
pub const TIMESTAMP_FIELDS: [&str; 3] = ["ts", "updatedAt", "updated_at"];

/// Why a JSON document is not a valid payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("expected a JSON array, got {0}")]
    NotAnArray(&'static str),
    #[error("element {index} is not a JSON object")]
    NotAnObject { index: usize },
    #[error("element {index} has no usable `id` field")]
    MissingId { index: usize },
    #[error("duplicate record id {0}")]
    DuplicateId(RecordId),
    #[error("invalid JSON: {0}")]
    Json(String),
}

/// Rejected category name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid category name {0:?}: use ASCII letters, digits, '-', '_' or '.'")]
pub struct InvalidCategory(pub String);

/// Key of a logical dataset (e.g. a catalog slice).
///
/// Category names end up in URLs and storage keys, so only a conservative
/// character set is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidCategory> {
        let name = name.into();
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(name))
        } else {
            Err(InvalidCategory(name))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Category {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Category {
    type Error = InvalidCategory;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Category {
    type Error = InvalidCategory;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.0
    }
}

/// Record identity. `1` and `"1"` are distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Str(String),
}

impl RecordId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) if !s.is_empty() => Some(Self::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

/// One entry of a payload: a JSON object with an `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    id: RecordId,
    fields: Map<String, Value>,
}

impl Record {
    /// Wrap a JSON object, or `None` if it has no usable `id`.
    #[must_use]
    pub fn from_object(fields: Map<String, Value>) -> Option<Self> {
        let id = fields.get("id").and_then(RecordId::from_value)?;
        Some(Self { id, fields })
    }

    pub fn from_value(value: Value) -> Result<Self, ShapeError> {
        match value {
            Value::Object(fields) => {
                Self::from_object(fields).ok_or(ShapeError::MissingId { index: 0 })
            }
            _ => Err(ShapeError::NotAnObject { index: 0 }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Modification time carried by the record itself, if any.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        TIMESTAMP_FIELDS
            .iter()
            .find_map(|name| self.fields.get(*name).and_then(Value::as_i64))
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Map::deserialize(deserializer)?;
        Record::from_object(fields).ok_or_else(|| D::Error::custom("record has no usable `id` field"))
    }
}

/// Ordered records of one category. Ids are unique.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Payload {
    records: Vec<Record>,
}

impl Payload {
    /// Build a payload, rejecting duplicate ids.
    pub fn new(records: Vec<Record>) -> Result<Self, ShapeError> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.id()) {
                return Err(ShapeError::DuplicateId(record.id().clone()));
            }
        }
        Ok(Self { records })
    }

    /// Caller guarantees the ids are unique.
    pub(crate) fn from_unique(records: Vec<Record>) -> Self {
        debug_assert!(Payload::new(records.clone()).is_ok());
        Self { records }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate an arbitrary JSON document as a payload.
    pub fn from_value(value: Value) -> Result<Self, ShapeError> {
        let elements = match value {
            Value::Array(elements) => elements,
            other => return Err(ShapeError::NotAnArray(json_kind(&other))),
        };

        let mut records = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            let Value::Object(fields) = element else {
                return Err(ShapeError::NotAnObject { index });
            };
            let record = Record::from_object(fields).ok_or(ShapeError::MissingId { index })?;
            records.push(record);
        }
        Self::new(records)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ShapeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ShapeError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.records.iter().map(Record::id)
    }

    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(self.records.iter().map(|r| Value::Object(r.fields.clone())).collect())
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<Record>::deserialize(deserializer)?;
        Payload::new(records).map_err(D::Error::custom)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
