//! Property filter evaluation against a JSON property map.

use std::cmp::Ordering;

use campaign_core::types::{Condition, Filter, FilterOperator, FilterSet};
use serde_json::{Map, Value};

/// True when every condition holds. An empty set holds.
pub fn matches_all(filters: &FilterSet, properties: &Map<String, Value>) -> bool {
    filters.iter().all(|condition| matches_condition(condition, properties))
}

pub fn matches_condition(condition: &Condition, properties: &Map<String, Value>) -> bool {
    match condition {
        Condition::Single(filter) => matches_filter(filter, properties),
        Condition::Any { or } => or.iter().any(|filter| matches_filter(filter, properties)),
    }
}

pub fn matches_filter(filter: &Filter, properties: &Map<String, Value>) -> bool {
    let actual = properties.get(&filter.name);
    match filter.operator {
        FilterOperator::Exists => actual.map_or(false, |v| !v.is_null()),
        FilterOperator::NotExists => actual.map_or(true, Value::is_null),
        op => compare_values(actual.unwrap_or(&Value::Null), op, &filter.condition_value),
    }
}

#[allow(clippy::unnecessary_map_or)]
pub fn compare_values(actual: &Value, operator: FilterOperator, expected: &Value) -> bool {
    match operator {
        FilterOperator::Eq => loosely_equal(actual, expected),
        FilterOperator::Ne => !loosely_equal(actual, expected),
        FilterOperator::Gt => numeric_cmp(actual, expected).map_or(false, |o| o == Ordering::Greater),
        FilterOperator::Gte => numeric_cmp(actual, expected).map_or(false, |o| o != Ordering::Less),
        FilterOperator::Lt => numeric_cmp(actual, expected).map_or(false, |o| o == Ordering::Less),
        FilterOperator::Lte => numeric_cmp(actual, expected).map_or(false, |o| o != Ordering::Greater),
        FilterOperator::Contains => contains(actual, expected),
        FilterOperator::NotContains => !contains(actual, expected),
        FilterOperator::In => expected
            .as_array()
            .map_or(false, |list| list.iter().any(|v| loosely_equal(actual, v))),
        FilterOperator::NotIn => expected
            .as_array()
            .map_or(true, |list| !list.iter().any(|v| loosely_equal(actual, v))),
        FilterOperator::Exists => !actual.is_null(),
        FilterOperator::NotExists => actual.is_null(),
    }
}

/// Numbers compare by value so `3` equals `3.0`.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => expected.as_str().map_or(false, |e| s.contains(e)),
        Value::Array(items) => items.iter().any(|v| loosely_equal(v, expected)),
        _ => false,
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    let a_num = a.as_f64()?;
    let b_num = b.as_f64()?;
    a_num.partial_cmp(&b_num)
}
