//! The staging index (`index.json`): the document the next commit captures.

use std::path::PathBuf;

use tracing::debug;

use crate::storage::document::Document;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::layout::{read_text, write_json};

#[derive(Debug, Clone)]
pub struct StagingIndex {
    path: PathBuf,
}

impl StagingIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the staged document.
    ///
    /// A missing or blank file means nothing is staged and reads as an empty
    /// document. Anything else must be a JSON object.
    pub fn load(&self) -> StorageResult<Document> {
        let Some(text) = read_text(&self.path)? else {
            return Ok(Document::new());
        };
        if text.trim().is_empty() {
            return Ok(Document::new());
        }

        let value: serde_json::Value = serde_json::from_str(&text).map_err(StorageError::json(&self.path))?;
        Document::from_value(value).ok_or_else(|| StorageError::NotAnObject {
            path: self.path.clone(),
        })
    }

    /// Replace the staged document.
    pub fn save(&self, document: &Document) -> StorageResult<()> {
        write_json(&self.path, document)?;
        debug!(keys = document.as_map().len(), "updated index");
        Ok(())
    }

    /// Stage an empty document.
    pub fn clear(&self) -> StorageResult<()> {
        self.save(&Document::new())
    }
}
