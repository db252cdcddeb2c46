//! In-memory evaluation of predicates, expressions and sort keys.

use std::cmp::Ordering;

use serde_json::Value;

use super::{Document, Expr, Predicate, SortDirection, SortKey};

/// Resolve a dotted path (`owner.username`) inside a document.
pub(super) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

pub(super) fn matches(doc: &Document, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Eq(field, expected) => {
            values_equal(get_path(doc, field).unwrap_or(&Value::Null), expected)
        }
        Predicate::In(field, candidates) => {
            let actual = get_path(doc, field).unwrap_or(&Value::Null);
            candidates.iter().any(|c| values_equal(actual, c))
        }
        Predicate::Search { fields, term } => {
            let needle = term.to_ascii_lowercase();
            fields.iter().any(|f| {
                get_path(doc, f)
                    .and_then(Value::as_str)
                    .is_some_and(|s| s.to_ascii_lowercase().contains(&needle))
            })
        }
        Predicate::NotNull(field) => get_path(doc, field).is_some_and(|v| !v.is_null()),
        Predicate::And(parts) => parts.iter().all(|p| matches(doc, p)),
        Predicate::Or(parts) => parts.iter().any(|p| matches(doc, p)),
    }
}

pub(super) fn evaluate(doc: &Document, expr: &Expr) -> Value {
    match expr {
        Expr::Size(path) => {
            let len = get_path(doc, path)
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            Value::from(len as u64)
        }
        Expr::First(path) => get_path(doc, path)
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .cloned()
            .unwrap_or(Value::Null),
        Expr::Last(path) => get_path(doc, path)
            .and_then(Value::as_array)
            .and_then(|a| a.last())
            .cloned()
            .unwrap_or(Value::Null),
        Expr::AnyEq { array, key, value } => {
            let Some(value) = value else {
                return Value::Bool(false);
            };
            let hit = get_path(doc, array)
                .and_then(Value::as_array)
                .is_some_and(|items| {
                    items.iter().any(|item| {
                        item.as_object()
                            .and_then(|o| o.get(key))
                            .is_some_and(|v| values_equal(v, value))
                    })
                });
            Value::Bool(hit)
        }
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON scalars; containers compare equal to each other.
pub(super) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

pub(super) fn compare_docs(a: &Document, b: &Document, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let left = get_path(a, &key.field).unwrap_or(&Value::Null);
        let right = get_path(b, &key.field).unwrap_or(&Value::Null);
        let ord = match key.direction {
            SortDirection::Asc => compare_values(left, right),
            SortDirection::Desc => compare_values(right, left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
