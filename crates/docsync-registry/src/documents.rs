//! Reads of registry domain documents, their attachments and context.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use docsync_core::{Attachment, Blob, Document, Error, ResourceStore, Result, TradingPartner};

use crate::paths;

/// Repository for registry documents.
#[derive(Clone)]
pub struct DocumentRepository {
    store: Arc<dyn ResourceStore>,
}

impl DocumentRepository {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Fetch a document body and its content type.
    pub async fn fetch(&self, document_id: &str) -> Result<Document> {
        let body = self.store.get(&paths::join(document_id, &[])).await?;
        let content_type = body
            .get("_type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                Error::InvalidInput(format!("Document {} has no content type", document_id))
            })?
            .to_string();
        Ok(Document {
            id: document_id.trim_start_matches('/').to_string(),
            content_type,
            body,
        })
    }

    /// Binary attachments listed under `_meta/vdoc/pdf`.
    ///
    /// Keys are returned as stored, including any bookkeeping key; callers
    /// decide which to skip. A document without attachments yields an empty
    /// list.
    pub async fn attachments(&self, document_id: &str) -> Result<Vec<Attachment>> {
        let listing = match self
            .store
            .get(&paths::join(document_id, &["_meta", "vdoc", "pdf"]))
            .await
        {
            Ok(v) => v,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let Some(obj) = listing.as_object() else {
            return Ok(Vec::new());
        };

        let mut attachments = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            let resource_id = match value {
                JsonValue::String(s) => s.clone(),
                other => match other.get("_id").and_then(JsonValue::as_str) {
                    Some(id) => id.to_string(),
                    None => continue,
                },
            };
            let original_filename = if key.starts_with('_') {
                None
            } else {
                self.original_filename(&resource_id).await?
            };
            attachments.push(Attachment {
                key: key.clone(),
                resource_id,
                original_filename,
            });
        }
        debug!(document_id, count = attachments.len(), "Listed attachments");
        Ok(attachments)
    }

    async fn original_filename(&self, resource_id: &str) -> Result<Option<String>> {
        match self
            .store
            .get(&paths::join(resource_id, &["_meta", "filename"]))
            .await
        {
            Ok(JsonValue::String(name)) if !name.is_empty() => Ok(Some(name)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Binary content of an attachment.
    pub async fn content(&self, attachment: &Attachment) -> Result<Blob> {
        self.store
            .get_blob(&paths::join(&attachment.resource_id, &[]))
            .await
    }

    /// Trading partner at a registry path.
    pub async fn trading_partner(&self, context: &str) -> Result<TradingPartner> {
        let value = self.store.get(context).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Raw share marker (`_meta/shared`) of a document, if set.
    pub async fn share_mode(&self, document_id: &str) -> Result<Option<String>> {
        match self
            .store
            .get(&paths::join(document_id, &["_meta", "shared"]))
            .await
        {
            Ok(JsonValue::String(s)) => Ok(Some(s)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRegistry;
    use serde_json::json;

    async fn setup() -> (MemoryRegistry, DocumentRepository, String) {
        let registry = MemoryRegistry::new();
        let doc = registry
            .create_resource(
                "application/vnd.trellisfw.coi.accord.1+json",
                json!({ "holder": { "name": "Acme" } }),
            )
            .await
            .unwrap();
        let repo = DocumentRepository::new(Arc::new(registry.clone()));
        (registry, repo, doc)
    }

    #[tokio::test]
    async fn test_fetch_reads_type() {
        let (_registry, repo, doc) = setup().await;
        let document = repo.fetch(&doc).await.unwrap();
        assert_eq!(document.content_type, "application/vnd.trellisfw.coi.accord.1+json");
        assert_eq!(document.body["holder"]["name"], json!("Acme"));
        assert_eq!(document.id, doc);
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let (_registry, repo, _doc) = setup().await;
        assert!(repo.fetch("resources/missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_attachments_with_filenames() {
        let (registry, repo, doc) = setup().await;
        let pdf = registry
            .create_blob("application/pdf", b"%PDF".to_vec())
            .await
            .unwrap();
        registry
            .put(&paths::join(&pdf, &["_meta"]), json!({ "filename": "coi.pdf" }))
            .await
            .unwrap();
        registry
            .put(
                &paths::join(&doc, &["_meta", "vdoc", "pdf"]),
                json!({ "h1": { "_id": pdf.clone() } }),
            )
            .await
            .unwrap();

        let attachments = repo.attachments(&doc).await.unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].key, "h1");
        assert_eq!(attachments[0].resource_id, pdf);
        assert_eq!(attachments[0].original_filename.as_deref(), Some("coi.pdf"));

        let blob = repo.content(&attachments[0]).await.unwrap();
        assert_eq!(blob.bytes, b"%PDF".to_vec());
    }

    #[tokio::test]
    async fn test_attachments_none() {
        let (_registry, repo, doc) = setup().await;
        assert!(repo.attachments(&doc).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_share_mode() {
        let (registry, repo, doc) = setup().await;
        assert_eq!(repo.share_mode(&doc).await.unwrap(), None);
        registry
            .put(&paths::join(&doc, &["_meta"]), json!({ "shared": "incoming" }))
            .await
            .unwrap();
        assert_eq!(repo.share_mode(&doc).await.unwrap().as_deref(), Some("incoming"));
    }

    #[tokio::test]
    async fn test_trading_partner() {
        let (registry, repo, _doc) = setup().await;
        registry
            .put(
                "/resources/tp1",
                json!({ "name": "Acme Foods", "externalIds": ["sap:0042"] }),
            )
            .await
            .unwrap();
        let partner = repo.trading_partner("/resources/tp1").await.unwrap();
        assert_eq!(partner.name, "Acme Foods");
        assert_eq!(partner.sap_numbers(), "0042");
    }
}
