//! Typed row records shipped to Kinesis

use crate::schema::Schema;
use eyre::{Result, bail};
use serde::Serialize;
use std::collections::BTreeMap;

/// Column marking the change type of a record
pub const DELTA_TYPE_FIELD: &str = "deltatype";

/// Delta type for a created (inserted) row
pub const DELTA_TYPE_CREATE: &str = "1";

/// Column whose value becomes the partition key
pub const ID_FIELD: &str = "id";

/// A coerced column value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Null,
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{}", s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Null => write!(f, "null"),
        }
    }
}

/// One row keyed by column name
///
/// Keys are kept sorted so the JSON encoding is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    values: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Zip raw positional values against the schema, coercing each by column type
    ///
    /// A synthetic `deltatype = "1"` field is added to every record.
    ///
    /// # Errors
    /// Returns an error when the number of values differs from the number of columns.
    pub fn from_values(schema: &Schema, values: &[String]) -> Result<Self> {
        if values.len() != schema.len() {
            bail!(
                "row has {} values but the table has {} columns",
                values.len(),
                schema.len()
            );
        }

        let mut record = Self::default();
        record.insert(DELTA_TYPE_FIELD, FieldValue::Str(DELTA_TYPE_CREATE.to_string()));
        for (field, raw) in schema.fields.iter().zip(values) {
            record.insert(&field.name, field.coerce(raw));
        }
        Ok(record)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Partition key for the stream: the `id` column rendered as a string
    ///
    /// Rows without a usable id all land on the `null` key.
    pub fn partition_key(&self) -> String {
        match self.get(ID_FIELD) {
            Some(FieldValue::Null) | None => "null".to_string(),
            Some(FieldValue::Str(s)) if s.is_empty() => "null".to_string(),
            Some(value) => value.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use serde_json::{Value, json};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", "int(11)", false),
            Field::new("name", "varchar(20)", true),
            Field::new("score", "double", true),
        ])
    }

    fn values(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_values() {
        let record = Record::from_values(&schema(), &values(&["7", "ann", "1.5"])).unwrap();

        assert_eq!(record.get("id"), Some(&FieldValue::Int(7)));
        assert_eq!(record.get("name"), Some(&FieldValue::Str("ann".into())));
        assert_eq!(record.get("score"), Some(&FieldValue::Float(1.5)));
        assert_eq!(record.get("deltatype"), Some(&FieldValue::Str("1".into())));
        assert_eq!(record.len(), 4);
    }

    #[test]
    fn test_from_values_rejects_width_mismatch() {
        assert!(Record::from_values(&schema(), &values(&["7", "ann"])).is_err());
    }

    #[test]
    fn test_json_encoding() {
        let record = Record::from_values(&schema(), &values(&["7", "NULL", "2"])).unwrap();
        let value: Value = serde_json::from_slice(&record.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"deltatype": "1", "id": 7, "name": null, "score": 2.0})
        );
    }

    #[test]
    fn test_partition_key() {
        let record = Record::from_values(&schema(), &values(&["7", "a", "1"])).unwrap();
        assert_eq!(record.partition_key(), "7");

        let mut by_string = Record::default();
        by_string.insert("id", FieldValue::Str("abc-1".into()));
        assert_eq!(by_string.partition_key(), "abc-1");

        assert_eq!(Record::default().partition_key(), "null");
    }
}
