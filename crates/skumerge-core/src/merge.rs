//! Field-level merge of duplicate clusters.
//!
//! A cluster is folded into a [`PartialRecord`] one member (or one
//! sub-cluster) at a time. [`PartialRecord::absorb`] is associative and
//! commutative, so the canonical record does not depend on chunk order,
//! union order or worker count. Ties are broken by record index.

use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;

use crate::models::{FieldKind, FieldRole, FieldSpec, ProductRecord, RecordIndex, RecordSchema, Value};
use crate::normalize::fold_list_item;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Taken as a unit from the earliest member that has a canonical id.
    Identifier,
    /// Longest non-blank text.
    Longest,
    /// Case/whitespace-insensitive union in first-seen order.
    Union,
    /// Largest value; missing values never win and NaN only wins when no
    /// member has a number.
    Max,
}

impl MergePolicy {
    pub fn for_field(field: &FieldSpec) -> Self {
        if field.role == FieldRole::Identifier {
            return MergePolicy::Identifier;
        }
        match field.kind {
            FieldKind::Text => MergePolicy::Longest,
            FieldKind::List => MergePolicy::Union,
            FieldKind::Integer | FieldKind::Float | FieldKind::Flag | FieldKind::Temporal => {
                MergePolicy::Max
            }
        }
    }
}

/// Mergeable summary of one or more records of the same cluster.
#[derive(Debug, Clone)]
pub struct PartialRecord {
    anchor: RecordIndex,
    identity: Identity,
    slots: Vec<Slot>,
}

#[derive(Debug, Clone)]
struct Identity {
    /// Ordered so that the minimum is the preferred source: members with a
    /// canonical id first, then by index.
    rank: (bool, RecordIndex),
    values: Vec<Value>,
}

#[derive(Debug, Clone)]
enum Slot {
    Identifier(usize),
    Longest(Option<TextPick>),
    Max(Option<Value>),
    Union { present: bool, items: Vec<ListItem> },
}

#[derive(Debug, Clone)]
struct TextPick {
    nonblank: bool,
    len: usize,
    index: RecordIndex,
    value: String,
}

impl TextPick {
    fn key(&self) -> (bool, usize, Reverse<RecordIndex>) {
        (self.nonblank, self.len, Reverse(self.index))
    }
}

#[derive(Debug, Clone)]
struct ListItem {
    origin: (RecordIndex, usize),
    key: String,
    value: String,
}

impl PartialRecord {
    /// Summary of a single record. `has_id` tells whether the record has a
    /// canonical identifier.
    pub fn from_record(
        schema: &RecordSchema,
        index: RecordIndex,
        record: ProductRecord,
        has_id: bool,
    ) -> Self {
        let mut values = record.into_values();
        values.resize(schema.len(), Value::Null);

        let identity = Identity {
            rank: (!has_id, index),
            // Schema order, matching the ordinals of the identifier slots.
            values: schema
                .fields()
                .iter()
                .zip(&values)
                .filter(|(field, _)| MergePolicy::for_field(field) == MergePolicy::Identifier)
                .map(|(_, value)| value.clone())
                .collect(),
        };

        let mut ordinal = 0;
        let slots = schema
            .fields()
            .iter()
            .zip(values)
            .map(|(field, value)| match MergePolicy::for_field(field) {
                MergePolicy::Identifier => {
                    ordinal += 1;
                    Slot::Identifier(ordinal - 1)
                }
                MergePolicy::Longest => Slot::Longest(text_pick(index, value)),
                MergePolicy::Max => Slot::Max(comparable(value)),
                MergePolicy::Union => list_slot(index, value),
            })
            .collect();

        Self {
            anchor: index,
            identity,
            slots,
        }
    }

    /// Smallest record index folded into this partial.
    pub fn anchor(&self) -> RecordIndex {
        self.anchor
    }

    /// Fold another partial of the same schema into this one.
    pub fn absorb(&mut self, other: PartialRecord) {
        self.anchor = self.anchor.min(other.anchor);
        if other.identity.rank < self.identity.rank {
            self.identity = other.identity;
        }

        for (slot, incoming) in self.slots.iter_mut().zip(other.slots) {
            match (slot, incoming) {
                (Slot::Longest(current), Slot::Longest(Some(incoming))) => {
                    if current.as_ref().is_none_or(|c| incoming.key() > c.key()) {
                        *current = Some(incoming);
                    }
                }
                (Slot::Max(current), Slot::Max(Some(incoming))) => {
                    if current
                        .as_ref()
                        .is_none_or(|c| compare_values(&incoming, c) == Ordering::Greater)
                    {
                        *current = Some(incoming);
                    }
                }
                (
                    Slot::Union { present, items },
                    Slot::Union {
                        present: other_present,
                        items: other_items,
                    },
                ) => {
                    *present |= other_present;
                    merge_items(items, other_items);
                }
                _ => {}
            }
        }
    }

    /// Build the canonical record.
    pub fn finish(self) -> ProductRecord {
        let identity = self.identity.values;
        let values = self
            .slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Identifier(ordinal) => identity.get(ordinal).cloned().unwrap_or(Value::Null),
                Slot::Longest(pick) => pick.map_or(Value::Null, |p| Value::Text(p.value)),
                Slot::Max(value) => value.unwrap_or(Value::Null),
                Slot::Union { present, items } => {
                    if present {
                        Value::List(items.into_iter().map(|i| i.value).collect())
                    } else {
                        Value::Null
                    }
                }
            })
            .collect();
        ProductRecord::new(values)
    }
}

/// Merge the members of one cluster into its canonical record.
/// Returns `None` for an empty member list.
pub fn merge_records(
    schema: &RecordSchema,
    members: Vec<(RecordIndex, ProductRecord)>,
) -> Option<ProductRecord> {
    members
        .into_iter()
        .map(|(index, record)| {
            let has_id = schema.canonical_id(&record).is_some();
            PartialRecord::from_record(schema, index, record, has_id)
        })
        .reduce(|mut acc, next| {
            acc.absorb(next);
            acc
        })
        .map(PartialRecord::finish)
}

fn text_pick(index: RecordIndex, value: Value) -> Option<TextPick> {
    match value {
        Value::Text(s) => Some(TextPick {
            nonblank: !s.trim().is_empty(),
            len: s.chars().count(),
            index,
            value: s,
        }),
        _ => None,
    }
}

fn comparable(value: Value) -> Option<Value> {
    match value {
        Value::Null | Value::Text(_) | Value::List(_) => None,
        other => Some(other),
    }
}

fn list_slot(index: RecordIndex, value: Value) -> Slot {
    let raw = match value {
        Value::List(items) => items,
        Value::Text(s) => vec![s],
        _ => {
            return Slot::Union {
                present: false,
                items: Vec::new(),
            };
        }
    };

    let mut items = Vec::with_capacity(raw.len());
    for (pos, value) in raw.into_iter().enumerate() {
        let key = fold_list_item(&value);
        if key.is_empty() {
            continue;
        }
        items.push(ListItem {
            origin: (index, pos),
            key,
            value,
        });
    }
    merge_items(&mut items, Vec::new());
    Slot::Union {
        present: true,
        items,
    }
}

/// Union by key, keeping the earliest occurrence, ordered by origin.
fn merge_items(target: &mut Vec<ListItem>, incoming: Vec<ListItem>) {
    let mut by_key: HashMap<String, ListItem> = HashMap::with_capacity(target.len() + incoming.len());
    for item in target.drain(..).chain(incoming) {
        match by_key.get(&item.key) {
            Some(existing) if existing.origin <= item.origin => {}
            _ => {
                by_key.insert(item.key.clone(), item);
            }
        }
    }
    target.extend(by_key.into_values());
    target.sort_by_key(|item| item.origin);
}

/// Total order used by the `Max` policy. Variants of one column always
/// agree; the variant rank only keeps the order total.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) | (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => match (x.is_nan(), y.is_nan()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => x.total_cmp(y),
        },
        (Value::Flag(x), Value::Flag(y)) => x.cmp(y),
        _ => variant_rank(a).cmp(&variant_rank(b)),
    }
}

fn variant_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Flag(_) => 1,
        Value::Integer(_) => 2,
        Value::Float(_) => 3,
        Value::Timestamp(_) => 4,
        Value::Text(_) => 5,
        Value::List(_) => 6,
    }
}
