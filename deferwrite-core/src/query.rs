// src/query.rs
use std::cmp::Ordering;
use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::document::{field_at, DocumentSnapshot, Fields};

/// Field comparison operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    ArrayContains(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Dotted path into the document, e.g. `profile.handle`
    pub field: String,
    pub op: FilterOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Collection query, always evaluated against committed storage state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Query {
            collection: name.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp) -> Self {
        self.filters.push(Filter { field: field.into(), op });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Does a document body satisfy every filter?
    pub fn matches(&self, data: &Fields) -> bool {
        self.filters
            .iter()
            .all(|filter| Self::matches_op(field_at(data, &filter.field), &filter.op))
    }

    fn matches_op(value: Option<&Value>, op: &FilterOp) -> bool {
        match op {
            FilterOp::Eq(target) => value == Some(target),
            // Missing fields never match inequality filters
            FilterOp::Ne(target) => value.map_or(false, |v| v != target),
            FilterOp::Gt(target) => {
                value.map_or(false, |v| compare_values(v, target) == Some(Ordering::Greater))
            }
            FilterOp::Gte(target) => value.map_or(false, |v| {
                matches!(compare_values(v, target), Some(Ordering::Greater | Ordering::Equal))
            }),
            FilterOp::Lt(target) => {
                value.map_or(false, |v| compare_values(v, target) == Some(Ordering::Less))
            }
            FilterOp::Lte(target) => value.map_or(false, |v| {
                matches!(compare_values(v, target), Some(Ordering::Less | Ordering::Equal))
            }),
            FilterOp::In(targets) => value.map_or(false, |v| targets.contains(v)),
            FilterOp::NotIn(targets) => value.map_or(false, |v| !targets.contains(v)),
            FilterOp::ArrayContains(target) => value
                .and_then(Value::as_array)
                .map_or(false, |items| items.contains(target)),
        }
    }

    /// Filter, order and page a set of stored documents.
    /// Missing snapshots are dropped.
    pub fn apply(&self, docs: Vec<DocumentSnapshot>) -> Vec<DocumentSnapshot> {
        let mut matching: Vec<DocumentSnapshot> = docs
            .into_iter()
            .filter(|snapshot| snapshot.data.as_ref().map_or(false, |data| self.matches(data)))
            .collect();

        if !self.order_by.is_empty() {
            matching.sort_by(|a, b| {
                for (field, direction) in &self.order_by {
                    let cmp = sort_order(a.get(field), b.get(field));
                    if cmp != Ordering::Equal {
                        return match direction {
                            Direction::Ascending => cmp,
                            Direction::Descending => cmp.reverse(),
                        };
                    }
                }
                Ordering::Equal
            });
        }

        let skip = self.offset.unwrap_or(0);
        let take = self.limit.unwrap_or(usize::MAX);
        matching.into_iter().skip(skip).take(take).collect()
    }
}

/// Result of a storage-only query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySnapshot {
    pub docs: Vec<DocumentSnapshot>,
}

impl QuerySnapshot {
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.docs.iter().map(DocumentSnapshot::id).collect()
    }
}

/// Same-type comparison for filters; mixed types do not compare
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => n1.as_f64()?.partial_cmp(&n2.as_f64()?),
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        _ => None,
    }
}

/// Total order for sorting: missing < null < bool < number < string < array < object
fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_val), Some(b_val)) => compare_values(a_val, b_val)
            .unwrap_or_else(|| type_rank(a_val).cmp(&type_rank(b_val))),
    }
}

fn type_rank(val: &Value) -> u8 {
    match val {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
