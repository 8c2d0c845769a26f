//! One ingested event and its JSONEachRow encoding

use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The value of a single field in a [`Row`]
///
/// JSON `null` and arrays are not representable and fail to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Object(Row),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<Row> for FieldValue {
    fn from(row: Row) -> Self {
        Self::Object(row)
    }
}

/// An ordered mapping of field name to [`FieldValue`]
///
/// Fields keep the order in which they were inserted, and that is the order in which they are
/// written out in a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(IndexMap<String, FieldValue>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(IndexMap::with_capacity(capacity))
    }

    /// Set `field` to `value`, replacing any existing value in place
    pub fn insert(
        &mut self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        self.0.insert(field.into(), value.into())
    }

    /// Set `field` to `value` only if the field is not present yet
    ///
    /// Returns `true` if the value was inserted.
    pub fn insert_if_absent(
        &mut self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> bool {
        match self.0.entry(field.into()) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(v) => {
                v.insert(value.into());
                true
            }
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Encode `rows` as a JSONEachRow payload: one compact JSON object per row, each followed by a
/// newline, in the order given.
pub fn encode_json_each_row(rows: &[Row]) -> Result<Bytes, serde_json::Error> {
    let mut buf = Vec::with_capacity(rows.len() * 64);
    for row in rows {
        serde_json::to_writer(&mut buf, row)?;
        buf.push(b'\n');
    }
    Ok(buf.into())
}
