use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ServerError;

/// In-memory view of the client's documents, keyed by file identifier.
///
/// Only notifications mutate it. Text is held behind an `Arc` so feature
/// functions can run against a snapshot without copying the document.
#[derive(Debug, Default)]
pub struct DocumentStore {
    entries: HashMap<String, Arc<String>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `file` or replaces its whole text.
    pub fn upsert(&mut self, file: impl Into<String>, contents: String) {
        self.entries.insert(file.into(), Arc::new(contents));
    }

    /// Drops `file`. Returns whether it was present; removing an unknown file
    /// leaves the store untouched.
    pub fn remove(&mut self, file: &str) -> bool {
        self.entries.remove(file).is_some()
    }

    pub fn read(&self, file: &str) -> Result<Arc<String>, ServerError> {
        self.entries
            .get(file)
            .cloned()
            .ok_or_else(|| ServerError::UnknownFile(file.to_owned()))
    }

    pub fn contains(&self, file: &str) -> bool {
        self.entries.contains_key(file)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
