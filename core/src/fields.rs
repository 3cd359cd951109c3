//! Field extraction over arbitrary JSON payloads.
//!
//! Walks a parsed `serde_json::Value` depth-first and produces a flat,
//! ordered catalog of addressable leaves. Pure functions, no state; a
//! widget's field catalog is recomputed from its latest payload on demand.

use crate::types::{ApiField, FieldType};
use serde_json::Value;

/// Extract the addressable leaf fields of a JSON payload.
///
/// Plain objects are recursed key by key, in the order the payload listed
/// them. A nested plain object keeps recursing; anything else found under
/// an object key (scalar, null, or array) is emitted as one leaf, with the
/// value itself as the sample. An array at the traversal root is assumed
/// homogeneous: only element `[0]` is surfaced, with an `[0]` path suffix.
/// Empty arrays and a bare scalar root contribute nothing.
///
/// JSON cannot encode reference cycles, so the traversal needs no cycle
/// guard. Output order is deterministic for a given payload.
pub fn extract_fields(value: &Value, prefix: &str) -> Vec<ApiField> {
    let mut fields = Vec::new();
    traverse(value, prefix, &mut fields);
    fields
}

fn traverse(value: &Value, path: &str, out: &mut Vec<ApiField>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };

                match child {
                    Value::Object(_) => traverse(child, &child_path, out),
                    _ => out.push(ApiField {
                        key: key.clone(),
                        value: child.clone(),
                        field_type: FieldType::of(child),
                        path: child_path,
                    }),
                }
            }
        }
        Value::Array(items) => {
            if let Some(first) = items.first() {
                traverse(first, &format!("{}[0]", path), out);
            }
        }
        _ => {}
    }
}

/// Resolve a dot-separated field path against a payload.
///
/// Each segment is an object key lookup. Missing intermediate keys resolve
/// to `None` rather than an error; the rendering side shows a placeholder
/// for those.
pub fn get_nested_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
