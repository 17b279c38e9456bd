//! Merge engine
//!
//! combines two document snapshots sub-element by sub-element. Each of the
//! `layers` and `tables` collections is merged independently; map-level
//! properties always come from `ours`.
//!
//! # Policies
//!
//! without a base (two-way) the merge is an additive union:
//! - id only on one side: kept
//! - id on both sides, equal: kept
//! - id on both sides, different: conflict
//!
//! with a base (three-way) a side that did not change since the base yields
//! to the side that did, and deletions are respected unless the other side
//! modified the element:
//!
//! ```text
//!   ours == theirs              -> keep
//!   ours == base != theirs      -> take theirs     (modified)
//!   theirs == base != ours      -> keep ours
//!   all three differ            -> conflict
//!   in base + ours, not theirs  -> keep ours
//!   in base + theirs, not ours  -> drop, or conflict if theirs != base
//! ```

mod conflict;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::storage::{element_id, element_title, keyed_elements, Collection, Document};

pub use conflict::{resolve_conflict, Conflict, MergeError, Resolution};

/// result of merging two documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// best-effort merged document; conflicting ids hold our version
    pub merged_data: Document,
    /// unresolved conflicts
    pub conflicts: Vec<Conflict>,
    /// ids adopted from theirs because only they had them
    pub added: Vec<String>,
    /// ids taken from theirs because only they changed them
    pub modified: Vec<String>,
}

impl MergeResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Apply a resolved value for the pending conflict on `layer_id`.
    ///
    /// The value replaces the element in `merged_data`, or is appended if the
    /// element is not there. `null` (or an empty object) deletes it.
    pub fn apply_resolution(&mut self, layer_id: &str, resolved: Value) -> Result<(), MergeError> {
        let position = self
            .conflicts
            .iter()
            .position(|c| c.layer_id == layer_id)
            .ok_or_else(|| MergeError::ConflictNotFound(layer_id.to_string()))?;
        let conflict = self.conflicts.remove(position);

        let mut elements = self.merged_data.elements(conflict.collection).to_vec();
        let existing = elements
            .iter()
            .position(|e| element_id(e).as_deref() == Some(layer_id));
        let delete = is_deletion(&resolved);

        match (existing, delete) {
            (Some(i), true) => {
                elements.remove(i);
            }
            (Some(i), false) => elements[i] = resolved,
            (None, false) => elements.push(resolved),
            (None, true) => {}
        }
        self.merged_data.set_elements(conflict.collection, elements);

        debug!(id = layer_id, collection = %conflict.collection, delete, "applied resolution");
        Ok(())
    }

    /// Resolve every pending conflict the same way.
    ///
    /// Nothing is applied unless every conflict can be resolved.
    pub fn resolve_all(&mut self, choice: Resolution) -> Result<(), MergeError> {
        let resolved = self
            .conflicts
            .iter()
            .map(|c| resolve_conflict(c, choice).map(|value| (c.layer_id.clone(), value)))
            .collect::<Result<Vec<_>, _>>()?;

        for (id, value) in resolved {
            self.apply_resolution(&id, value)?;
        }
        Ok(())
    }
}

/// Free-function form of [`MergeResult::apply_resolution`].
pub fn apply_resolution(mut result: MergeResult, layer_id: &str, resolved: Value) -> Result<MergeResult, MergeError> {
    result.apply_resolution(layer_id, resolved)?;
    Ok(result)
}

fn is_deletion(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Merge `theirs` into `ours`, optionally against a common ancestor.
pub fn merge_maps(ours: &Document, theirs: &Document, base: Option<&Document>) -> MergeResult {
    let mut result = MergeResult {
        merged_data: ours.clone(),
        ..Default::default()
    };

    for collection in Collection::ALL {
        if !ours.has_collection(collection) && !theirs.has_collection(collection) {
            continue;
        }
        let merged = merge_collection(collection, ours, theirs, base, &mut result);
        result.merged_data.set_elements(collection, merged);
    }

    debug!(
        conflicts = result.conflicts.len(),
        added = result.added.len(),
        modified = result.modified.len(),
        three_way = base.is_some(),
        "merged documents"
    );
    result
}

fn merge_collection(
    collection: Collection,
    ours: &Document,
    theirs: &Document,
    base: Option<&Document>,
    result: &mut MergeResult,
) -> Vec<Value> {
    let their_index: HashMap<String, &Value> = theirs.keyed(collection).into_iter().collect();
    let base_index: Option<HashMap<String, &Value>> =
        base.map(|b| keyed_elements(b.elements(collection)).into_iter().collect());

    let mut merged = Vec::new();
    let mut seen = HashSet::new();

    for element in ours.elements(collection) {
        let Some(id) = element_id(element) else {
            merged.push(element.clone());
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }

        let Some(their_element) = their_index.get(&id).copied() else {
            merged.push(element.clone());
            continue;
        };

        if element == their_element {
            merged.push(element.clone());
            continue;
        }

        match lookup(&base_index, &id) {
            Some(base_element) if element == base_element => {
                merged.push(their_element.clone());
                result.modified.push(id);
            }
            Some(base_element) if their_element == base_element => {
                merged.push(element.clone());
            }
            base_element => {
                result.conflicts.push(Conflict {
                    collection,
                    layer_title: element_title(element),
                    layer_id: id,
                    ours_value: element.clone(),
                    theirs_value: their_element.clone(),
                    base_value: base_element.cloned(),
                });
                merged.push(element.clone());
            }
        }
    }

    for (id, their_element) in theirs.keyed(collection) {
        if seen.contains(&id) {
            continue;
        }
        match lookup(&base_index, &id) {
            Some(base_element) if their_element != base_element => {
                result.conflicts.push(Conflict {
                    collection,
                    layer_title: element_title(their_element),
                    layer_id: id,
                    ours_value: Value::Null,
                    theirs_value: their_element.clone(),
                    base_value: Some(base_element.clone()),
                });
            }
            Some(_) => {}
            None => {
                merged.push(their_element.clone());
                result.added.push(id);
            }
        }
    }

    merged
}

fn lookup<'a>(index: &Option<HashMap<String, &'a Value>>, id: &str) -> Option<&'a Value> {
    index.as_ref().and_then(|index| index.get(id).copied())
}

/// Render a merge result as plain text for display.
pub fn format_merge_summary(result: &MergeResult) -> String {
    let mut lines = Vec::new();

    if result.has_conflicts() {
        lines.push(format!("Merge has {} conflict(s).", result.conflicts.len()));
    } else {
        lines.push("Merge completed successfully.".to_string());
    }

    if !result.added.is_empty() {
        lines.push(format!("Added: {}", result.added.len()));
        lines.extend(result.added.iter().map(|id| format!("  + {}", id)));
    }

    if !result.modified.is_empty() {
        lines.push(format!("Modified: {}", result.modified.len()));
        lines.extend(result.modified.iter().map(|id| format!("  ~ {}", id)));
    }

    if !result.conflicts.is_empty() {
        lines.push("Conflicts:".to_string());
        for conflict in &result.conflicts {
            lines.push(format!(
                "  ! {} ({}, {})",
                conflict.layer_title, conflict.layer_id, conflict.collection
            ));
        }
    }

    lines.join("\n")
}
