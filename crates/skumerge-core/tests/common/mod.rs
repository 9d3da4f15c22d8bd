#![allow(dead_code)]

use skumerge_core::{FieldKind, ProductRecord, SkumergeConfig, Value};

pub const TITLE: usize = 2;
pub const IMGS: usize = 3;
pub const PRICE: usize = 4;

pub fn columns() -> Vec<(String, FieldKind)> {
    [
        ("product_identifier", FieldKind::Text),
        ("brand", FieldKind::Text),
        ("product_title", FieldKind::Text),
        ("imgs", FieldKind::List),
        ("price", FieldKind::Float),
    ]
    .into_iter()
    .map(|(name, kind)| (name.to_string(), kind))
    .collect()
}

pub fn product(id: Option<&str>, brand: &str, title: &str, imgs: &[&str], price: Option<f64>) -> ProductRecord {
    ProductRecord::new(vec![
        id.map_or(Value::Null, Value::text),
        Value::text(brand),
        Value::text(title),
        if imgs.is_empty() {
            Value::Null
        } else {
            Value::list(imgs.iter().copied())
        },
        price.map_or(Value::Null, Value::Float),
    ])
}

pub fn scenario() -> Vec<ProductRecord> {
    vec![
        product(Some("A1"), "Nike", "Red Shoe", &["u1"], None),
        product(Some("A1"), "Nike", "Red Shoes", &["u2"], None),
        product(None, "Adidas", "Blu Socks", &["u3"], None),
        product(None, "Adidas", "Blue Socks", &["u4"], None),
    ]
}

pub fn config(threshold: f64, chunk_size: usize, workers: usize) -> SkumergeConfig {
    let mut config = SkumergeConfig::default();
    config.matching.similarity_threshold = threshold;
    config.pipeline.chunk_size = chunk_size;
    config.pipeline.worker_count = workers;
    config
}
