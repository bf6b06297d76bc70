use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::model::ProcessDefinition;

/// Source of immutable process definitions.
///
/// Definitions are content-addressed per key: deploying content identical to
/// an existing version returns that version instead of minting a new one.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Store a definition and return it with its assigned version.
    async fn deploy(&self, definition: ProcessDefinition) -> Result<Arc<ProcessDefinition>>;
    /// Latest version for `key`.
    async fn load(&self, key: &str) -> Result<Option<Arc<ProcessDefinition>>>;
    async fn load_version(&self, key: &str, version: u32)
        -> Result<Option<Arc<ProcessDefinition>>>;
}

// ── MemoryDefinitionStore ──

/// In-memory DefinitionStore. Versions start at 1 per key.
pub struct MemoryDefinitionStore {
    inner: RwLock<HashMap<String, Vec<Arc<ProcessDefinition>>>>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryDefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn deploy(&self, definition: ProcessDefinition) -> Result<Arc<ProcessDefinition>> {
        let mut store = self.inner.write().map_err(|e| anyhow!("Lock: {}", e))?;
        let versions = store.entry(definition.key.clone()).or_default();

        if let Some(existing) = versions
            .iter()
            .find(|d| d.content_hash == definition.content_hash)
        {
            return Ok(existing.clone());
        }

        let next = versions.last().map_or(1, |d| d.version + 1);
        let stored = Arc::new(definition.with_version(next));
        versions.push(stored.clone());
        Ok(stored)
    }

    async fn load(&self, key: &str) -> Result<Option<Arc<ProcessDefinition>>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store.get(key).and_then(|v| v.last().cloned()))
    }

    async fn load_version(
        &self,
        key: &str,
        version: u32,
    ) -> Result<Option<Arc<ProcessDefinition>>> {
        let store = self.inner.read().map_err(|e| anyhow!("Lock: {}", e))?;
        Ok(store
            .get(key)
            .and_then(|v| v.iter().find(|d| d.version == version).cloned()))
    }
}
