// src/fetch/json.rs

//! Columns for the JSON fields a normalizer does not name itself.

use arrow::{
    array::{ArrayRef, Float64Array, StringArray},
    datatypes::{DataType, Field},
};
use serde_json::{Map, Value};
use std::{collections::BTreeSet, sync::Arc};

pub type Extra = Map<String, Value>;

/// `targetRateFrom` → `target_rate_from`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Nested objects are spread one level deep as `<parent>_<child>`.
fn flatten(extra: &Extra) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    for (key, value) in extra {
        match value {
            Value::Object(inner) => {
                for (child, v) in inner {
                    out.push((format!("{}_{}", snake_case(key), snake_case(child)), v));
                }
            }
            _ => out.push((snake_case(key), value)),
        }
    }
    out
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// One column per leftover key across `rows`, sorted by name. A column is
/// Float64 when every present value is a JSON number, else Utf8. Names in
/// `taken` are skipped.
pub fn extra_columns(rows: &[&Extra], taken: &[&str]) -> Vec<(Field, ArrayRef)> {
    let flat: Vec<Vec<(String, &Value)>> = rows.iter().map(|r| flatten(r)).collect();
    let names: BTreeSet<&str> = flat
        .iter()
        .flat_map(|r| r.iter().map(|(k, _)| k.as_str()))
        .filter(|k| !taken.contains(k))
        .collect();

    names
        .into_iter()
        .map(|name| {
            let values: Vec<Option<&Value>> = flat
                .iter()
                .map(|r| {
                    r.iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| *v)
                        .filter(|v| !v.is_null())
                })
                .collect();
            let numeric = values.iter().flatten().all(|v| v.is_number());
            if numeric {
                let arr: Float64Array = values.iter().map(|v| v.and_then(Value::as_f64)).collect();
                (Field::new(name, DataType::Float64, true), Arc::new(arr) as ArrayRef)
            } else {
                let arr: StringArray = values.iter().map(|v| v.and_then(as_text)).collect();
                (Field::new(name, DataType::Utf8, true), Arc::new(arr) as ArrayRef)
            }
        })
        .collect()
}
