//! Fixtures shared by the unit tests.

use crate::config::ColumnConfig;
use crate::models::{FieldKind, ProductRecord, RecordSchema, Value};

pub const ID: usize = 0;
pub const BRAND: usize = 1;
pub const TITLE: usize = 2;
pub const IMGS: usize = 3;
pub const PRICE: usize = 4;
pub const UPDATED: usize = 5;

pub fn product_columns() -> Vec<(String, FieldKind)> {
    [
        ("product_identifier", FieldKind::Text),
        ("brand", FieldKind::Text),
        ("product_title", FieldKind::Text),
        ("imgs", FieldKind::List),
        ("price", FieldKind::Float),
        ("updated_at", FieldKind::Temporal),
        ("description", FieldKind::Text),
    ]
    .into_iter()
    .map(|(name, kind)| (name.to_string(), kind))
    .collect()
}

pub fn product_schema() -> RecordSchema {
    RecordSchema::resolve(product_columns(), &ColumnConfig::default())
        .expect("fixture columns resolve")
}

/// A record of [`product_schema`]. An empty `imgs` slice leaves the column
/// null.
pub fn product(id: Option<&str>, brand: &str, title: &str, imgs: &[&str]) -> ProductRecord {
    let mut values = vec![Value::Null; 7];
    values[ID] = id.map_or(Value::Null, Value::text);
    values[BRAND] = Value::text(brand);
    values[TITLE] = Value::text(title);
    if !imgs.is_empty() {
        values[IMGS] = Value::list(imgs.iter().copied());
    }
    ProductRecord::new(values)
}
