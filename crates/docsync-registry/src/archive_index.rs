//! Index from archive entry id to the registry document created for it.

use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use docsync_core::defaults::BY_ARCHIVE_ID_PATH;
use docsync_core::{EntryId, ResourceStore, Result};

use crate::paths;

#[derive(Clone)]
pub struct ArchiveIndex {
    store: Arc<dyn ResourceStore>,
}

impl ArchiveIndex {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Registry document already linked to an archive entry.
    pub async fn lookup(&self, entry_id: EntryId) -> Result<Option<String>> {
        let path = paths::join(BY_ARCHIVE_ID_PATH, &[&entry_id.to_string()]);
        match self.store.get(&path).await {
            Ok(value) => Ok(value
                .get("_id")
                .and_then(JsonValue::as_str)
                .map(String::from)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Link an archive entry to a registry document.
    pub async fn register(&self, entry_id: EntryId, document_id: &str) -> Result<()> {
        self.store
            .put(
                BY_ARCHIVE_ID_PATH,
                json!({ entry_id.to_string(): { "_id": document_id } }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRegistry;

    #[tokio::test]
    async fn test_register_then_lookup() {
        let registry = MemoryRegistry::new();
        let doc = registry
            .create_resource("application/json", json!({}))
            .await
            .unwrap();
        let index = ArchiveIndex::new(Arc::new(registry));

        assert_eq!(index.lookup(EntryId(5)).await.unwrap(), None);
        index.register(EntryId(5), &doc).await.unwrap();
        assert_eq!(index.lookup(EntryId(5)).await.unwrap(), Some(doc));
    }
}
