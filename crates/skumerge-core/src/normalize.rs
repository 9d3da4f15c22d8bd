//! Identifier and free-text canonicalization.

use std::fmt;

use crate::models::Value;

/// Normalized, order-sensitive product identifier.
///
/// Components keep the order of the identifier columns (and of the elements
/// of a list-valued identifier), so `("A", "B")` and `("B", "A")` differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalId(Vec<String>);

impl CanonicalId {
    pub fn components(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("+"))
    }
}

/// Build the canonical identifier from the raw identifier values of a record.
///
/// Nulls, flags and other malformed values count as missing. Returns `None`
/// when no component survives.
///
/// Numbers are rendered as decimal text and then stripped like any text id,
/// so a float id `1.5` normalizes to `15`, the same as the text ids `"1.5"`
/// and `"15"` and the integer `15`. Integral floats drop their fraction.
pub fn normalize_id(raw: &[&Value]) -> Option<CanonicalId> {
    let mut components = Vec::new();
    for value in raw {
        match value {
            Value::Text(s) => push_component(&mut components, s),
            Value::Integer(n) | Value::Timestamp(n) => push_component(&mut components, &n.to_string()),
            Value::Float(x) if x.is_finite() => {
                push_component(&mut components, &render_float(*x));
            }
            Value::List(items) => {
                for item in items {
                    push_component(&mut components, item);
                }
            }
            Value::Float(_) | Value::Flag(_) | Value::Null => {}
        }
    }

    if components.is_empty() {
        None
    } else {
        Some(CanonicalId(components))
    }
}

fn push_component(components: &mut Vec<String>, raw: &str) {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect();
    if !stripped.is_empty() {
        components.push(stripped);
    }
}

fn render_float(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        x.to_string()
    }
}

/// Lowercase, drop punctuation and control characters, collapse whitespace.
///
/// Idempotent: `clean_text(&clean_text(s)) == clean_text(s)`.
pub fn clean_text(s: &str) -> String {
    let kept: String = s
        .chars()
        .flat_map(char::to_lowercase)
        .filter_map(|c| {
            if c.is_whitespace() {
                Some(' ')
            } else if c.is_alphanumeric() {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comparison key for list items: case and whitespace are ignored,
/// punctuation is kept so URLs stay distinct.
pub fn fold_list_item(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(parts: &[&str]) -> Option<CanonicalId> {
        Some(CanonicalId(parts.iter().map(|s| s.to_string()).collect()))
    }

    #[test]
    fn test_normalize_id_strips_separators_and_case() {
        let raw = Value::text("  ab-12_cd ");
        assert_eq!(normalize_id(&[&raw]), id(&["AB12CD"]));
    }

    #[test]
    fn test_normalize_id_missing_and_empty() {
        assert_eq!(normalize_id(&[]), None);
        assert_eq!(normalize_id(&[&Value::Null]), None);
        assert_eq!(normalize_id(&[&Value::text(" -- ")]), None);
        assert_eq!(normalize_id(&[&Value::Flag(true)]), None);
        assert_eq!(normalize_id(&[&Value::Float(f64::NAN)]), None);
    }

    #[test]
    fn test_normalize_id_multi_component_is_order_sensitive() {
        let a = Value::text("A");
        let b = Value::text("B");
        let ab = normalize_id(&[&a, &b]);
        let ba = normalize_id(&[&b, &a]);
        assert_eq!(ab, id(&["A", "B"]));
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_normalize_id_drops_empty_components() {
        let list = Value::list(["x-1", "", "  ", "Y2"]);
        assert_eq!(normalize_id(&[&list, &Value::Null]), id(&["X1", "Y2"]));
    }

    #[test]
    fn test_normalize_id_numbers() {
        assert_eq!(normalize_id(&[&Value::Integer(42)]), id(&["42"]));
        assert_eq!(normalize_id(&[&Value::Float(42.0)]), id(&["42"]));
    }

    #[test]
    fn test_fractional_float_id_strips_like_text() {
        let float = normalize_id(&[&Value::Float(1.5)]);
        assert_eq!(float, id(&["15"]));
        assert_eq!(float, normalize_id(&[&Value::text("1.5")]));
        assert_eq!(float, normalize_id(&[&Value::Integer(15)]));
        assert_eq!(normalize_id(&[&Value::Float(-0.25)]), id(&["025"]));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Red   Shoe!! "), "red shoe");
        assert_eq!(clean_text("Hello,\tWorld\n(2024)"), "hello world 2024");
        assert_eq!(clean_text("T-Shirt"), "tshirt");
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("?!."), "");
    }

    #[test]
    fn test_clean_text_never_produces_pipe() {
        assert!(!clean_text("a|b").contains('|'));
    }

    #[test]
    fn test_fold_list_item() {
        assert_eq!(fold_list_item("  HTTP://X.com/A.png "), "http://x.com/a.png");
        assert_eq!(fold_list_item("a   b"), fold_list_item("A B"));
    }

    proptest! {
        #[test]
        fn clean_text_is_idempotent(s in "\\PC{0,40}") {
            let once = clean_text(&s);
            prop_assert_eq!(clean_text(&once), once);
        }

        #[test]
        fn clean_text_has_no_edge_or_double_spaces(s in "[a-zA-Z0-9 \\t.,!-]{0,40}") {
            let cleaned = clean_text(&s);
            prop_assert!(!cleaned.starts_with(' '));
            prop_assert!(!cleaned.ends_with(' '));
            prop_assert!(!cleaned.contains("  "));
        }
    }
}
