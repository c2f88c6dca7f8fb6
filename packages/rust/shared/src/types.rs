//! Document model shared by the processor, batch runner, and CLI.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SenseIndexError};

/// Namespace prefix of every field derived by SenseIndex.
pub const FIELD_NAMESPACE: &str = "springsense";

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    values: Vec<String>,
}

/// An ordered mapping from field name to an ordered sequence of values.
///
/// Fields keep their first-insertion order and values keep append order.
/// Values can only be appended, never removed or replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` under `name`, creating the field if needed.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values_mut(name.into()).push(value.into());
    }

    /// Values of `name`, creating an empty field at the end if needed.
    fn values_mut(&mut self, name: String) -> &mut Vec<String> {
        let index = match self.fields.iter().position(|f| f.name == name) {
            Some(index) => index,
            None => {
                self.fields.push(Field {
                    name,
                    values: Vec::new(),
                });
                self.fields.len() - 1
            }
        };
        &mut self.fields[index].values
    }

    /// Field names in insertion order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Values of `name`, or `None` if the document has no such field.
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.values.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse one JSON-lines record.
    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| SenseIndexError::parse(format!("invalid document: {e}")))
    }

    /// Apply pending appends in order.
    pub fn apply(&mut self, appends: impl IntoIterator<Item = FieldAppend>) {
        for append in appends {
            self.add(append.field, append.value);
        }
    }
}

// ---------------------------------------------------------------------------
// FieldAppend
// ---------------------------------------------------------------------------

/// A pending append of one value under one field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAppend {
    pub field: String,
    pub value: String,
}

impl FieldAppend {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde: `{"title": ["a", "b"], "url": "http://..."}` with key order kept
// ---------------------------------------------------------------------------

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(&field.name, &field.values)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of field names to a string or an array of strings")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Document, A::Error> {
        let mut doc = Document::new();
        while let Some((name, value)) = access.next_entry::<String, OneOrMany>()? {
            match value {
                OneOrMany::One(v) => doc.add(name, v),
                // `"field": []` still declares the field.
                OneOrMany::Many(vs) => doc.values_mut(name).extend(vs),
            }
        }
        Ok(doc)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(DocumentVisitor)
    }
}
