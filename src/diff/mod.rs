//! Diff engine
//!
//! compares two document snapshots by sub-element identity. All functions
//! take `(current, previous)`: an id present only in `current` is *added*,
//! one present only in `previous` is *removed*.
//!
//! everything here is pure; absent or malformed collections read as empty and
//! nothing ever fails.

mod json;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{element_title, keyed_elements, Collection, Document};

pub use json::{diff_json, ValueChange};

/// kind of change to a sub-element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeType::Added => "added",
            ChangeType::Removed => "removed",
            ChangeType::Modified => "modified",
        };
        f.write_str(s)
    }
}

/// change to a single layer or table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerChange {
    pub layer_id: String,
    pub layer_title: String,
    pub change_type: ChangeType,
    /// property-level changes, only filled for `Modified`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ValueChange>,
}

/// differences between two documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapDiff {
    pub layer_changes: Vec<LayerChange>,
    pub table_changes: Vec<LayerChange>,
    /// changes to everything outside the two collections
    pub property_changes: Vec<ValueChange>,
}

impl MapDiff {
    pub fn has_changes(&self) -> bool {
        !self.layer_changes.is_empty() || !self.table_changes.is_empty() || !self.property_changes.is_empty()
    }

    /// changes for one collection
    pub fn changes(&self, collection: Collection) -> &[LayerChange] {
        match collection {
            Collection::Layers => &self.layer_changes,
            Collection::Tables => &self.table_changes,
        }
    }

    fn filter(changes: &[LayerChange], kind: ChangeType) -> Vec<&LayerChange> {
        changes.iter().filter(|c| c.change_type == kind).collect()
    }

    pub fn added_layers(&self) -> Vec<&LayerChange> {
        Self::filter(&self.layer_changes, ChangeType::Added)
    }

    pub fn removed_layers(&self) -> Vec<&LayerChange> {
        Self::filter(&self.layer_changes, ChangeType::Removed)
    }

    pub fn modified_layers(&self) -> Vec<&LayerChange> {
        Self::filter(&self.layer_changes, ChangeType::Modified)
    }

    pub fn added_tables(&self) -> Vec<&LayerChange> {
        Self::filter(&self.table_changes, ChangeType::Added)
    }

    pub fn removed_tables(&self) -> Vec<&LayerChange> {
        Self::filter(&self.table_changes, ChangeType::Removed)
    }

    pub fn modified_tables(&self) -> Vec<&LayerChange> {
        Self::filter(&self.table_changes, ChangeType::Modified)
    }
}

/// Compare two documents.
pub fn diff_maps(current: &Document, previous: &Document) -> MapDiff {
    let current_props = Value::Object(current.properties());
    let previous_props = Value::Object(previous.properties());

    let property_changes = if current_props == previous_props {
        Vec::new()
    } else {
        diff_json(&current_props, &previous_props)
    };

    MapDiff {
        layer_changes: diff_layers(current.layers(), previous.layers()),
        table_changes: diff_layers(current.tables(), previous.tables()),
        property_changes,
    }
}

/// Compare two sub-element lists by id.
///
/// Output order: added (in `current` order), removed (in `previous` order),
/// then modified (in `current` order). Elements without an id are ignored.
pub fn diff_layers(current: &[Value], previous: &[Value]) -> Vec<LayerChange> {
    let current = keyed_elements(current);
    let previous = keyed_elements(previous);
    let current_by_id: HashMap<&str, &Value> = current.iter().map(|(id, v)| (id.as_str(), *v)).collect();
    let previous_by_id: HashMap<&str, &Value> = previous.iter().map(|(id, v)| (id.as_str(), *v)).collect();

    let mut changes = Vec::new();

    for (id, element) in &current {
        if !previous_by_id.contains_key(id.as_str()) {
            changes.push(LayerChange {
                layer_id: id.clone(),
                layer_title: element_title(element),
                change_type: ChangeType::Added,
                details: Vec::new(),
            });
        }
    }

    for (id, element) in &previous {
        if !current_by_id.contains_key(id.as_str()) {
            changes.push(LayerChange {
                layer_id: id.clone(),
                layer_title: element_title(element),
                change_type: ChangeType::Removed,
                details: Vec::new(),
            });
        }
    }

    for (id, element) in &current {
        if let Some(old) = previous_by_id.get(id.as_str()) {
            if element != old {
                changes.push(LayerChange {
                    layer_id: id.clone(),
                    layer_title: element_title(element),
                    change_type: ChangeType::Modified,
                    details: diff_json(element, old),
                });
            }
        }
    }

    changes
}

/// Render a diff as plain text for display.
pub fn format_diff_summary(diff: &MapDiff) -> String {
    if !diff.has_changes() {
        return "No changes detected.".to_string();
    }

    let mut lines = Vec::new();
    let sections = [
        ("Added layers", "+", diff.added_layers()),
        ("Removed layers", "-", diff.removed_layers()),
        ("Modified layers", "~", diff.modified_layers()),
        ("Added tables", "+", diff.added_tables()),
        ("Removed tables", "-", diff.removed_tables()),
        ("Modified tables", "~", diff.modified_tables()),
    ];
    for (heading, marker, changes) in sections {
        if changes.is_empty() {
            continue;
        }
        lines.push(format!("{} ({}):", heading, changes.len()));
        for change in changes {
            lines.push(format!("  {} {} ({})", marker, change.layer_title, change.layer_id));
        }
    }

    if !diff.property_changes.is_empty() {
        lines.push("Map properties changed:".to_string());
        for change in &diff.property_changes {
            lines.push(format!("  * {}", change.path()));
        }
    }

    lines.join("\n")
}
