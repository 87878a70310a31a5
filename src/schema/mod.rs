//! Table schema metadata
//!
//! A [`Schema`] is the ordered column list of one table, exactly as the catalog
//! reports it. Row values coming out of the dump are matched to columns by
//! position, so the field order here must follow the dump's column order.

mod catalog;

pub use catalog::Catalog;

use crate::record::FieldValue;
use serde::{Deserialize, Serialize};

/// A single column of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    /// Declared column type, possibly parameterized (`decimal(10,2)`, `int(11) unsigned`)
    #[serde(rename = "type")]
    pub sql_type: String,
    #[serde(rename = "null", with = "yes_no")]
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable,
        }
    }

    /// The declared type without any length/precision suffix or modifiers
    ///
    /// `decimal(10,2)` becomes `decimal`, `int(11) unsigned` becomes `int`.
    pub fn base_type(&self) -> &str {
        let end = self
            .sql_type
            .find(|c: char| c == '(' || c.is_whitespace())
            .unwrap_or(self.sql_type.len());
        &self.sql_type[..end]
    }

    pub fn kind(&self) -> FieldKind {
        FieldKind::from_base_type(self.base_type())
    }

    /// JSON path selecting this field from an encoded record
    pub fn json_path(&self) -> String {
        format!("$['{}']", self.name)
    }

    /// Coerce a raw textual value into a typed value for this column
    ///
    /// The literal `NULL` is always null. Values that do not parse as the
    /// column's numeric kind are kept as strings.
    pub fn coerce(&self, raw: &str) -> FieldValue {
        self.kind().coerce(raw)
    }
}

/// Value family a column coerces into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
}

impl FieldKind {
    pub fn from_base_type(base: &str) -> Self {
        match base.to_ascii_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "bigint" => Self::Integer,
            "float" | "double" | "decimal" => Self::Float,
            _ => Self::Text,
        }
    }

    pub fn coerce(self, raw: &str) -> FieldValue {
        if raw == "NULL" {
            return FieldValue::Null;
        }
        match self {
            Self::Integer => raw
                .parse::<i64>()
                .map(FieldValue::Int)
                .unwrap_or_else(|_| FieldValue::Str(raw.to_string())),
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(FieldValue::Float)
                .unwrap_or_else(|| FieldValue::Str(raw.to_string())),
            Self::Text => FieldValue::Str(raw.to_string()),
        }
    }
}

/// Ordered column list of a table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build the JSON paths list, one entry per field in order
    pub fn paths(&self) -> Paths {
        Paths {
            json_paths: self.fields.iter().map(Field::json_path).collect(),
        }
    }
}

impl FromIterator<Field> for Schema {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// JSON paths artifact matching a [`Schema`] field for field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paths {
    #[serde(rename = "jsonpaths")]
    pub json_paths: Vec<String>,
}

/// `IS_NULLABLE` is reported as `YES`/`NO`; keep that shape in the artifact
mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "YES" } else { "NO" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.eq_ignore_ascii_case("yes"))
    }
}
