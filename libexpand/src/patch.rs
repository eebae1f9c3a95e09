//! JSON merge patches (RFC 7386) computed as a two-way diff.
//!
//! Status writes never send whole objects: the caller mutates a copy, and
//! only the fields that differ between the original and the copy are sent.
//! Concurrent writers touching other fields are left alone.  Applying a
//! patch is [`json_patch::merge`].

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ExpandError;

/// Compute the merge patch that turns `old` into `new`.
///
/// Objects are diffed key by key; keys missing from `new` become `null`.
/// Arrays and scalars are replaced wholesale when they differ.  Identical
/// documents yield an empty object.
pub fn create_two_way_merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => Value::Object(diff_objects(old, new)),
        _ if old == new => Value::Object(Map::new()),
        _ => new.clone(),
    }
}

fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();
    for (key, old_value) in old {
        match new.get(key) {
            None => {
                patch.insert(key.clone(), Value::Null);
            }
            Some(new_value) if new_value == old_value => {}
            Some(Value::Object(new_obj)) => match old_value {
                Value::Object(old_obj) => {
                    patch.insert(key.clone(), Value::Object(diff_objects(old_obj, new_obj)));
                }
                _ => {
                    patch.insert(key.clone(), Value::Object(new_obj.clone()));
                }
            },
            Some(new_value) => {
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            patch.insert(key.clone(), new_value.clone());
        }
    }
    patch
}

/// Marshal both objects and diff them.
pub fn diff<T: Serialize>(old: &T, new: &T) -> Result<Value, ExpandError> {
    let old = serde_json::to_value(old)
        .map_err(|e| ExpandError::Serialization(format!("marshal old object: {e}")))?;
    let new = serde_json::to_value(new)
        .map_err(|e| ExpandError::Serialization(format!("marshal new object: {e}")))?;
    Ok(create_two_way_merge_patch(&old, &new))
}

/// Whether a patch changes nothing.
pub fn is_empty(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}
