//! Read-only knowledge document: an arbitrary JSON object of facts.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::StoreError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeDocument {
    facts: Map<String, Value>,
}

impl KnowledgeDocument {
    pub fn from_map(facts: Map<String, Value>) -> Self {
        Self { facts }
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let facts = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { facts })
    }

    pub fn facts(&self) -> &Map<String, Value> {
        &self.facts
    }

    /// Compact JSON with non-ASCII characters left as is.
    pub fn to_json(&self) -> String {
        Value::Object(self.facts.clone()).to_string()
    }
}
