//! Record model: typed values, field categories and the record schema.

use serde::{Deserialize, Serialize};

use crate::config::ColumnConfig;
use crate::error::{DedupError, Result};
use crate::normalize::{CanonicalId, normalize_id};

/// Position of a record in the whole input, independent of chunking.
pub type RecordIndex = usize;

/// A single cell value.
///
/// Temporal columns keep their native integer representation (the unit lives
/// in the storage layer), so "most recent" is simply the maximum.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
    Timestamp(i64),
    List(Vec<String>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Text content, or `None` for any other variant.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

/// Storage-level category of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Flag,
    Temporal,
    List,
}

/// What a column means to the deduplicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    Identifier,
    Brand,
    Title,
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub role: FieldRole,
}

/// Ordered field layout shared by every record of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    fields: Vec<FieldSpec>,
    identifiers: Vec<usize>,
    brand: usize,
    titles: Vec<usize>,
}

impl RecordSchema {
    /// Assign roles to the columns of an input and check that the columns
    /// required for matching are present.
    pub fn resolve(columns: Vec<(String, FieldKind)>, config: &ColumnConfig) -> Result<Self> {
        let position = |name: &str| columns.iter().position(|(n, _)| n == name);

        let identifiers: Vec<usize> = config
            .identifier
            .iter()
            .filter_map(|name| position(name))
            .collect();
        if identifiers.is_empty() {
            return Err(DedupError::MissingColumn(format!(
                "none of the identifier columns {:?} exist",
                config.identifier
            )));
        }

        let brand = position(&config.brand)
            .ok_or_else(|| DedupError::MissingColumn(config.brand.clone()))?;

        let titles: Vec<usize> = config
            .title
            .iter()
            .filter_map(|name| position(name))
            .filter(|idx| !identifiers.contains(idx) && *idx != brand)
            .collect();
        if titles.is_empty() {
            return Err(DedupError::MissingColumn(format!(
                "none of the title columns {:?} exist",
                config.title
            )));
        }

        let fields = columns
            .into_iter()
            .enumerate()
            .map(|(idx, (name, kind))| {
                let role = if identifiers.contains(&idx) {
                    FieldRole::Identifier
                } else if idx == brand {
                    FieldRole::Brand
                } else if titles.contains(&idx) {
                    FieldRole::Title
                } else {
                    FieldRole::Attribute
                };
                FieldSpec { name, kind, role }
            })
            .collect();

        Ok(Self {
            fields,
            identifiers,
            brand,
            titles,
        })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical identifier of a record, built from its identifier columns
    /// in schema order.
    pub fn canonical_id(&self, record: &ProductRecord) -> Option<CanonicalId> {
        let raw: Vec<&Value> = self
            .identifiers
            .iter()
            .map(|&idx| record.get(idx))
            .collect();
        normalize_id(&raw)
    }

    pub fn brand<'a>(&self, record: &'a ProductRecord) -> Option<&'a str> {
        record.get(self.brand).as_text()
    }

    /// First non-blank title column of the record.
    pub fn title<'a>(&self, record: &'a ProductRecord) -> Option<&'a str> {
        self.titles
            .iter()
            .filter_map(|&idx| record.get(idx).as_text())
            .find(|t| !t.trim().is_empty())
    }

    pub(crate) fn check_arity(&self, record: &ProductRecord, chunk: usize, offset: usize) -> Result<()> {
        if record.values.len() != self.fields.len() {
            return Err(DedupError::SchemaMismatch {
                chunk,
                record: offset,
                detail: format!(
                    "record has {} values, schema has {} fields",
                    record.values.len(),
                    self.fields.len()
                ),
            });
        }
        Ok(())
    }
}

/// One input row, values aligned to a [`RecordSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    values: Vec<Value>,
}

static NULL: Value = Value::Null;

impl ProductRecord {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Value at a field position; out-of-range positions read as null.
    pub fn get(&self, idx: usize) -> &Value {
        self.values.get(idx).unwrap_or(&NULL)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<(String, FieldKind)> {
        vec![
            ("product_identifier".to_string(), FieldKind::Text),
            ("brand".to_string(), FieldKind::Text),
            ("product_title".to_string(), FieldKind::Text),
            ("name".to_string(), FieldKind::Text),
            ("price".to_string(), FieldKind::Float),
        ]
    }

    #[test]
    fn test_resolve_assigns_roles() {
        let schema = RecordSchema::resolve(columns(), &ColumnConfig::default()).unwrap();
        let roles: Vec<FieldRole> = schema.fields().iter().map(|f| f.role).collect();
        assert_eq!(
            roles,
            vec![
                FieldRole::Identifier,
                FieldRole::Brand,
                FieldRole::Title,
                FieldRole::Title,
                FieldRole::Attribute,
            ]
        );
    }

    #[test]
    fn test_resolve_requires_brand() {
        let cols = vec![
            ("product_identifier".to_string(), FieldKind::Text),
            ("product_title".to_string(), FieldKind::Text),
        ];
        let err = RecordSchema::resolve(cols, &ColumnConfig::default()).unwrap_err();
        assert!(matches!(err, DedupError::MissingColumn(name) if name == "brand"));
    }

    #[test]
    fn test_resolve_requires_identifier_and_title() {
        let no_id = vec![
            ("brand".to_string(), FieldKind::Text),
            ("title".to_string(), FieldKind::Text),
        ];
        assert!(RecordSchema::resolve(no_id, &ColumnConfig::default()).is_err());

        let no_title = vec![
            ("product_identifier".to_string(), FieldKind::Text),
            ("brand".to_string(), FieldKind::Text),
        ];
        assert!(RecordSchema::resolve(no_title, &ColumnConfig::default()).is_err());
    }

    #[test]
    fn test_title_falls_back_to_next_column() {
        let schema = RecordSchema::resolve(columns(), &ColumnConfig::default()).unwrap();
        let record = ProductRecord::new(vec![
            Value::Null,
            Value::text("Nike"),
            Value::text("   "),
            Value::text("Red Shoe"),
            Value::Float(10.0),
        ]);
        assert_eq!(schema.title(&record), Some("Red Shoe"));
        assert_eq!(schema.brand(&record), Some("Nike"));
    }

    #[test]
    fn test_non_text_brand_reads_as_missing() {
        let schema = RecordSchema::resolve(columns(), &ColumnConfig::default()).unwrap();
        let record = ProductRecord::new(vec![
            Value::Null,
            Value::Integer(7),
            Value::text("Red Shoe"),
            Value::Null,
            Value::Null,
        ]);
        assert_eq!(schema.brand(&record), None);
    }
}
