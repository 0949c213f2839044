//! Criteria evaluation over stored JSON documents.

use serde_json::{Number, Value};
use std::cmp::Ordering;

use crate::domain::{Criteria, Order, Restriction};
use crate::ports::StoredRow;

const NULL: Value = Value::Null;

fn column<'v>(doc: &'v Value, name: &str) -> &'v Value {
    doc.get(name).unwrap_or(&NULL)
}

/// Does `doc` satisfy every restriction?
pub(crate) fn matches(criteria: &Criteria, doc: &Value) -> bool {
    criteria.restrictions().iter().all(|restriction| match restriction {
        Restriction::Eq(name, value) => same_value(column(doc, name), value),
        Restriction::Ne(name, value) => !same_value(column(doc, name), value),
        Restriction::IsNull(name) => column(doc, name).is_null(),
        Restriction::IsNotNull(name) => !column(doc, name).is_null(),
    })
}

/// Criteria ordering, ties broken by id.
pub(crate) fn compare_rows(criteria: &Criteria, a: &StoredRow, b: &StoredRow) -> Ordering {
    for order in criteria.orders() {
        let ordering = match order {
            Order::Asc(name) => compare_values(column(&a.doc, name), column(&b.doc, name)),
            Order::Desc(name) => compare_values(column(&b.doc, name), column(&a.doc, name)),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.id.cmp(&b.id)
}

/// Equality for restrictions. Numbers match across representations
/// (`1 == 1.0`); the ordering below keeps them distinct.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (exact_integer(x), exact_integer(y)) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => compare_values(a, b) == Ordering::Equal,
    }
}

fn exact_integer(number: &Number) -> Option<i128> {
    number
        .as_i64()
        .map(i128::from)
        .or_else(|| number.as_u64().map(i128::from))
}

/// Approximate value first, then the exact integer; floats sort before
/// integers of the same approximation.
fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    let approx_x = x.as_f64().unwrap_or(f64::NAN);
    let approx_y = y.as_f64().unwrap_or(f64::NAN);
    approx_x
        .total_cmp(&approx_y)
        .then_with(|| exact_integer(x).cmp(&exact_integer(y)))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order: null < bool < number < string < array < object.
/// Consistent with itself so it can drive `sort_by`.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            if a == b {
                Ordering::Equal
            } else {
                a.to_string().cmp(&b.to_string())
            }
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
