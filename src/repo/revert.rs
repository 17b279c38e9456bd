//! Inverse of a commit, applied on top of the current document.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::storage::{element_id, keyed_elements, Collection, Document};

/// Undo what `target` changed relative to `parent`, starting from `current`.
///
/// Per sub-element id, in both collections:
/// - added by the commit: removed from current
/// - removed by the commit: restored from parent, if current lacks it
/// - modified by the commit: reset to the parent version, if current has it
///
/// Map-level keys the commit changed are reset to the parent value, or
/// removed when the parent lacked them. Everything else in current, unkeyed
/// elements included, is left alone.
pub fn compute_revert(current: &Document, target: &Document, parent: &Document) -> Document {
    let mut result = current.clone();

    for collection in Collection::ALL {
        let reverted = revert_elements(
            current.elements(collection),
            target.elements(collection),
            parent.elements(collection),
        );
        if current.has_collection(collection) || !reverted.is_empty() {
            result.set_elements(collection, reverted);
        }
    }

    let target_props = target.properties();
    let parent_props = parent.properties();
    let changed: HashSet<&String> = target_props
        .keys()
        .chain(parent_props.keys())
        .filter(|key| target_props.get(*key) != parent_props.get(*key))
        .collect();

    for key in changed {
        match parent_props.get(key) {
            Some(value) => {
                result.insert(key.clone(), value.clone());
            }
            None => {
                result.remove(key);
            }
        }
    }

    result
}

/// revert one collection
pub(crate) fn revert_elements(current: &[Value], target: &[Value], parent: &[Value]) -> Vec<Value> {
    let target_by_id: HashMap<String, &Value> = keyed_elements(target).into_iter().collect();
    let parent_keyed = keyed_elements(parent);
    let parent_by_id: HashMap<&str, &Value> = parent_keyed.iter().map(|(id, v)| (id.as_str(), *v)).collect();

    let mut result = Vec::with_capacity(current.len());
    let mut present = HashSet::new();

    for element in current {
        let Some(id) = element_id(element) else {
            result.push(element.clone());
            continue;
        };

        match (target_by_id.get(&id), parent_by_id.get(id.as_str())) {
            // added by the commit
            (Some(_), None) => continue,
            // modified by the commit
            (Some(committed), Some(original)) if committed != original => {
                result.push((*original).clone());
            }
            _ => result.push(element.clone()),
        }
        present.insert(id);
    }

    for (id, original) in &parent_keyed {
        if !target_by_id.contains_key(id) && !present.contains(id) {
            result.push((*original).clone());
        }
    }

    result
}
