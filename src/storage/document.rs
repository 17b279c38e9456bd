//! The versioned document model.
//!
//! A document is an arbitrary JSON object with two distinguished lists of
//! sub-elements, `layers` and `tables`. Each sub-element is identified by its
//! caller-assigned `id`; elements without one are carried along but are
//! invisible to structural diff and merge.
//!
//! ```text
//! {
//!   "title": "City Map",
//!   "layers": [ { "id": "roads", "title": "Roads", ... } ],
//!   "tables": [ { "id": "permits", ... } ]
//! }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One of the two identified sub-element collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Layers,
    Tables,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Layers, Collection::Tables];

    /// key of this collection inside a document
    pub fn key(self) -> &'static str {
        match self {
            Collection::Layers => "layers",
            Collection::Tables => "tables",
        }
    }

    /// true if `key` names one of the collections
    pub fn is_collection_key(key: &str) -> bool {
        Self::ALL.iter().any(|c| c.key() == key)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A JSON object under version control.
///
/// Equality is structural: key order inside objects is irrelevant, element
/// order inside arrays is significant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// an empty document
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// wrap a JSON value; returns None unless it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// true if the document carries the collection key at all
    pub fn has_collection(&self, collection: Collection) -> bool {
        self.0.contains_key(collection.key())
    }

    /// the sub-elements of a collection; missing or malformed lists read as empty
    pub fn elements(&self, collection: Collection) -> &[Value] {
        match self.0.get(collection.key()) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn layers(&self) -> &[Value] {
        self.elements(Collection::Layers)
    }

    pub fn tables(&self) -> &[Value] {
        self.elements(Collection::Tables)
    }

    /// replace a collection wholesale
    pub fn set_elements(&mut self, collection: Collection, elements: Vec<Value>) {
        self.0.insert(collection.key().to_string(), Value::Array(elements));
    }

    /// keyed sub-elements in document order
    ///
    /// The first occurrence of a duplicated id wins; unkeyed elements are skipped.
    pub fn keyed(&self, collection: Collection) -> Vec<(String, &Value)> {
        keyed_elements(self.elements(collection))
    }

    /// ids of the keyed sub-elements of a collection
    pub fn ids(&self, collection: Collection) -> Vec<String> {
        self.keyed(collection).into_iter().map(|(id, _)| id).collect()
    }

    /// look up a sub-element by id
    pub fn find(&self, collection: Collection, id: &str) -> Option<&Value> {
        self.elements(collection)
            .iter()
            .find(|element| element_id(element).as_deref() == Some(id))
    }

    /// map-level properties: everything except the two collections
    pub fn properties(&self) -> Map<String, Value> {
        self.0
            .iter()
            .filter(|(key, _)| !Collection::is_collection_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

/// The identity of a sub-element.
///
/// String ids are used as-is, numeric ids are stringified, anything else
/// (including an empty string) means the element has no identity.
pub fn element_id(element: &Value) -> Option<String> {
    match element.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// index a list of sub-elements by id, in list order
///
/// the first occurrence of a duplicated id wins; unkeyed elements are skipped
pub fn keyed_elements(elements: &[Value]) -> Vec<(String, &Value)> {
    let mut seen = HashSet::new();
    elements
        .iter()
        .filter_map(|element| element_id(element).map(|id| (id, element)))
        .filter(|(id, _)| seen.insert(id.clone()))
        .collect()
}

/// display title of a sub-element
pub fn element_title(element: &Value) -> String {
    element
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Untitled")
        .to_string()
}
