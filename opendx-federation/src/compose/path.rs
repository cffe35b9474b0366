//! Dot-path traversal over JSON values.
//!
//! Reads and writes follow the intermediate rules of the composer: writers
//! create missing objects lazily, readers report missing keys; a list reached
//! mid-path broadcasts a write to every element and aggregates a read across
//! every element, preserving order. Null sub-trees are treated as absent.

use serde_json::Map;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("key \"{key}\" not found while resolving \"{path}\"")]
    KeyNotFound { path: String, key: String },
    #[error("expected an object while resolving \"{path}\"")]
    NotAnObject { path: String },
}

pub fn get_path(root: &Value, path: &str) -> Result<Value, PathError> {
    let segments: Vec<&str> = path.split('.').collect();
    get_segments(root, &segments, path)
}

fn get_segments(value: &Value, segments: &[&str], full_path: &str) -> Result<Value, PathError> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(value.clone());
    };
    match value {
        Value::Object(map) => match map.get(*head) {
            Some(child) if !child.is_null() => get_segments(child, rest, full_path),
            _ => Err(PathError::KeyNotFound {
                path: full_path.to_owned(),
                key: (*head).to_owned(),
            }),
        },
        Value::Array(items) => {
            let mut aggregated = Vec::new();
            for item in items {
                if let Ok(resolved) = get_segments(item, segments, full_path) {
                    aggregated.push(resolved);
                }
            }
            Ok(Value::Array(aggregated))
        }
        _ => Err(PathError::NotAnObject {
            path: full_path.to_owned(),
        }),
    }
}

pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_segments(root, &segments, &value);
}

fn set_segments(target: &mut Value, segments: &[&str], value: &Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match target {
        Value::Array(items) => {
            for item in items {
                set_segments(item, segments, value);
            }
        }
        Value::Object(map) => {
            if rest.is_empty() {
                map.insert((*head).to_owned(), value.clone());
            } else {
                let child = map
                    .entry((*head).to_owned())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !child.is_object() && !child.is_array() {
                    *child = Value::Object(Map::new());
                }
                set_segments(child, rest, value);
            }
        }
        other => {
            *other = Value::Object(Map::new());
            set_segments(other, segments, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn reads_nested_values() {
        let root = json!({"person": {"fullName": "Ada Lovelace"}});
        assert_eq!(
            get_path(&root, "person.fullName").unwrap(),
            json!("Ada Lovelace")
        );
    }

    #[test]
    fn missing_keys_are_reported() {
        let root = json!({"person": {}});
        assert_eq!(
            get_path(&root, "person.fullName"),
            Err(PathError::KeyNotFound {
                path: "person.fullName".to_owned(),
                key: "fullName".to_owned(),
            })
        );
    }

    #[test]
    fn null_subtrees_are_absent() {
        let root = json!({"person": null});
        assert!(matches!(
            get_path(&root, "person.fullName"),
            Err(PathError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn a_list_on_the_read_path_aggregates_per_element() {
        let root = json!({"vehicles": [
            {"regNo": "ABC123"},
            {"regNo": "XYZ789"},
            {"make": "no registration"},
        ]});
        assert_eq!(
            get_path(&root, "vehicles.regNo").unwrap(),
            json!(["ABC123", "XYZ789"])
        );
    }

    #[test]
    fn writes_create_intermediate_objects_lazily() {
        let mut root = json!({});
        set_path(&mut root, "data.personInfo.fullName", json!("Ada"));
        set_path(&mut root, "data.personInfo.birthDate", json!("1815-12-10"));
        assert_eq!(
            root,
            json!({"data": {"personInfo": {"fullName": "Ada", "birthDate": "1815-12-10"}}})
        );
    }

    #[test]
    fn a_list_on_the_write_path_broadcasts_to_every_element() {
        let mut root = json!({"items": [{"a": 1}, {"a": 2}]});
        set_path(&mut root, "items.source", json!("drp"));
        assert_eq!(
            root,
            json!({"items": [{"a": 1, "source": "drp"}, {"a": 2, "source": "drp"}]})
        );
    }
}
