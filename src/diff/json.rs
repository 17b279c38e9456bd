//! Structural diff of arbitrary JSON values.
//!
//! Changes are addressed by JSON-pointer style paths. Objects are compared
//! key by key. Lists whose elements all carry an `id` are matched by id and
//! addressed as `<path>/<id>`; any other list is compared as a multiset, so
//! reordering alone is not a change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::{element_id, keyed_elements};

/// one machine-readable difference between two values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueChange {
    Added { path: String, value: Value },
    Removed { path: String, value: Value },
    Changed { path: String, old: Value, new: Value },
}

impl ValueChange {
    pub fn path(&self) -> &str {
        match self {
            ValueChange::Added { path, .. }
            | ValueChange::Removed { path, .. }
            | ValueChange::Changed { path, .. } => path,
        }
    }
}

/// Diff `previous` into `current`.
///
/// An empty result means the two values are equal up to list order.
pub fn diff_json(current: &Value, previous: &Value) -> Vec<ValueChange> {
    let mut changes = Vec::new();
    diff_values("", previous, current, &mut changes);
    changes
}

fn diff_values(path: &str, old: &Value, new: &Value, out: &mut Vec<ValueChange>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => diff_objects(path, old, new, out),
        (Value::Array(old), Value::Array(new)) => {
            if all_keyed(old) && all_keyed(new) {
                diff_keyed_lists(path, old, new, out);
            } else {
                diff_multisets(path, old, new, out);
            }
        }
        _ => out.push(ValueChange::Changed {
            path: path.to_string(),
            old: old.clone(),
            new: new.clone(),
        }),
    }
}

fn diff_objects(path: &str, old: &Map<String, Value>, new: &Map<String, Value>, out: &mut Vec<ValueChange>) {
    for (key, old_value) in old {
        let child = child_path(path, key);
        match new.get(key) {
            Some(new_value) => diff_values(&child, old_value, new_value, out),
            None => out.push(ValueChange::Removed {
                path: child,
                value: old_value.clone(),
            }),
        }
    }
    for (key, new_value) in new {
        if !old.contains_key(key) {
            out.push(ValueChange::Added {
                path: child_path(path, key),
                value: new_value.clone(),
            });
        }
    }
}

/// non-empty list of objects that all carry a usable id
fn all_keyed(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|item| element_id(item).is_some())
}

fn diff_keyed_lists(path: &str, old: &[Value], new: &[Value], out: &mut Vec<ValueChange>) {
    let old_keyed = keyed_elements(old);
    let new_keyed = keyed_elements(new);
    let new_by_id: HashMap<&str, &Value> = new_keyed.iter().map(|(id, v)| (id.as_str(), *v)).collect();
    let old_by_id: HashMap<&str, &Value> = old_keyed.iter().map(|(id, v)| (id.as_str(), *v)).collect();

    for (id, old_value) in &old_keyed {
        let child = child_path(path, id);
        match new_by_id.get(id.as_str()) {
            Some(new_value) => diff_values(&child, old_value, new_value, out),
            None => out.push(ValueChange::Removed {
                path: child,
                value: (*old_value).clone(),
            }),
        }
    }
    for (id, new_value) in &new_keyed {
        if !old_by_id.contains_key(id.as_str()) {
            out.push(ValueChange::Added {
                path: child_path(path, id),
                value: (*new_value).clone(),
            });
        }
    }
}

fn diff_multisets(path: &str, old: &[Value], new: &[Value], out: &mut Vec<ValueChange>) {
    let mut unmatched: Vec<Option<&Value>> = new.iter().map(Some).collect();

    for (i, old_value) in old.iter().enumerate() {
        let hit = unmatched.iter_mut().find(|slot| slot.is_some_and(|v| v == old_value));
        match hit {
            Some(slot) => *slot = None,
            None => out.push(ValueChange::Removed {
                path: child_path(path, &i.to_string()),
                value: old_value.clone(),
            }),
        }
    }
    for (j, slot) in unmatched.into_iter().enumerate() {
        if let Some(new_value) = slot {
            out.push(ValueChange::Added {
                path: child_path(path, &j.to_string()),
                value: new_value.clone(),
            });
        }
    }
}

/// append one escaped pointer segment
fn child_path(parent: &str, segment: &str) -> String {
    format!("{}/{}", parent, segment.replace('~', "~0").replace('/', "~1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_values() {
        let v = json!({"a": [1, 2, {"b": null}]});
        assert!(diff_json(&v, &v).is_empty());
    }

    #[test]
    fn test_nested_change_path() {
        let previous = json!({"renderer": {"symbol": {"color": [0, 0, 0]}, "type": "simple"}});
        let current = json!({"renderer": {"symbol": {"color": "red"}, "type": "simple"}});

        let changes = diff_json(&current, &previous);
        assert_eq!(
            changes,
            vec![ValueChange::Changed {
                path: "/renderer/symbol/color".into(),
                old: json!([0, 0, 0]),
                new: json!("red"),
            }]
        );
    }

    #[test]
    fn test_added_and_removed_keys() {
        let previous = json!({"a": 1, "b": 2});
        let current = json!({"b": 2, "c": 3});

        let changes = diff_json(&current, &previous);
        assert_eq!(changes.len(), 2);
        assert!(changes.contains(&ValueChange::Removed { path: "/a".into(), value: json!(1) }));
        assert!(changes.contains(&ValueChange::Added { path: "/c".into(), value: json!(3) }));
    }

    #[test]
    fn test_list_order_is_ignored() {
        let previous = json!({"tags": ["x", "y", "z"]});
        let current = json!({"tags": ["z", "x", "y"]});
        assert!(diff_json(&current, &previous).is_empty());
    }

    #[test]
    fn test_multiset_counts_duplicates() {
        let previous = json!(["a", "a", "b"]);
        let current = json!(["a", "b", "c"]);

        let changes = diff_json(&current, &previous);
        assert_eq!(
            changes,
            vec![
                ValueChange::Removed { path: "/1".into(), value: json!("a") },
                ValueChange::Added { path: "/2".into(), value: json!("c") },
            ]
        );
    }

    #[test]
    fn test_keyed_lists_match_by_id() {
        let previous = json!({"fields": [{"id": "f1", "alias": "Name"}, {"id": "f2"}]});
        let current = json!({"fields": [{"id": "f2"}, {"id": "f1", "alias": "Full name"}]});

        let changes = diff_json(&current, &previous);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path(), "/fields/f1/alias");
    }

    #[test]
    fn test_pointer_escaping() {
        let previous = json!({"a/b": 1, "c~d": 1});
        let current = json!({"a/b": 2, "c~d": 2});

        let paths: Vec<_> = diff_json(&current, &previous).iter().map(|c| c.path().to_string()).collect();
        assert!(paths.contains(&"/a~1b".to_string()));
        assert!(paths.contains(&"/c~0d".to_string()));
    }

    #[test]
    fn test_serialized_shape() {
        let change = ValueChange::Changed { path: "/x".into(), old: json!(1), new: json!(2) };
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({"kind": "changed", "path": "/x", "old": 1, "new": 2})
        );
    }
}
