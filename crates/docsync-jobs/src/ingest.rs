//! Import of archive documents the registry has never seen.
//!
//! The archive content becomes a content-addressed blob attached to a new
//! "unidentified" registry document. The archive's current fields are
//! recorded as that attachment's sync state so later syncs treat them as
//! human owned.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, instrument, warn};

use docsync_core::defaults::{UNIDENTIFIED_CONTENT_TYPE, UNIDENTIFIED_LIST_PATH};
use docsync_core::{
    ArchiveEntry, Blob, DocumentStore, EntryId, JobPayload, JobType, Result, SyncRequest,
    SyncState,
};
use docsync_registry::{paths, Registry};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::poller::move_to_review;
use crate::sync::{detect_mime_type, SyncOrchestrator};
use crate::work_queue::WorkQueue;

/// Hex SHA-256 of attachment content; the attachment key of imported content.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Registry document created for an archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub document_id: String,
    /// Attachment key (content hash).
    pub key: String,
}

/// Creates registry documents for archive entries.
#[derive(Clone)]
pub struct ArchiveIngestor {
    registry: Registry,
    archive: Arc<dyn DocumentStore>,
}

impl ArchiveIngestor {
    pub fn new(registry: Registry, archive: Arc<dyn DocumentStore>) -> Self {
        Self { registry, archive }
    }

    /// Import one archive document.
    ///
    /// The archive id index is written last, so an indexed entry is always
    /// fully ingested. When a step fails, what was written so far is removed
    /// and a retry starts over.
    #[instrument(
        skip(self, entry),
        fields(subsystem = "ingest", op = "ingest", entry_id = %entry.entry_id)
    )]
    pub async fn ingest(&self, entry: &ArchiveEntry) -> Result<Ingested> {
        let start = Instant::now();
        let entry_id = entry.entry_id;

        let bytes = self.archive.fetch_content(entry_id).await?;
        let key = content_hash(&bytes);
        let mime_type = match entry.mime_type.as_deref() {
            Some(mt) if !mt.is_empty() => mt.to_string(),
            _ => detect_mime_type(&Blob {
                bytes: bytes.clone(),
                content_type: None,
            }),
        };
        let mut fields = entry.fields_map();
        if fields.is_empty() {
            fields = self.archive.get_metadata(entry_id).await?;
        }
        let state = SyncState {
            archive_entry_id: Some(entry_id),
            fields,
            path: Some(entry.path.clone()),
            filename: Some(entry.name.clone()),
            last_synced_at: None,
        };

        let mut written = Written::default();
        match self
            .write(entry_id, &key, &mime_type, bytes, &state, &mut written)
            .await
        {
            Ok(document_id) => {
                info!(
                    document_id = %document_id,
                    key = %key,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Ingested archive document"
                );
                Ok(Ingested { document_id, key })
            }
            Err(e) => {
                warn!(error = %e, "Ingestion failed, removing partial writes");
                self.undo(written).await;
                Err(e)
            }
        }
    }

    async fn write(
        &self,
        entry_id: EntryId,
        key: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        state: &SyncState,
        written: &mut Written,
    ) -> Result<String> {
        let store = self.registry.store();

        let size = bytes.len();
        let blob_id = store.create_blob(mime_type, bytes).await?;
        written.blob_id = Some(blob_id.clone());
        debug!(blob_id = %blob_id, mime_type = %mime_type, size, "Uploaded archive content");

        let document_id = store
            .create_resource(UNIDENTIFIED_CONTENT_TYPE, json!({}))
            .await?;
        written.document_id = Some(document_id.clone());
        store
            .put(
                &paths::join(&document_id, &["_meta"]),
                json!({ "vdoc": { "pdf": { key: { "_id": blob_id } } } }),
            )
            .await?;
        self.registry
            .sync_state
            .save(&document_id, key, state)
            .await?;

        let list_key = store
            .post(UNIDENTIFIED_LIST_PATH, json!({ "_id": document_id }))
            .await?;
        written.list_key = Some(list_key);

        self.registry
            .archive_index
            .register(entry_id, &document_id)
            .await?;
        Ok(document_id)
    }

    /// Best-effort removal of a failed ingestion's writes, newest first.
    async fn undo(&self, written: Written) {
        let store = self.registry.store();
        let mut targets = Vec::new();
        if let Some(list_key) = &written.list_key {
            targets.push(paths::join(UNIDENTIFIED_LIST_PATH, &[list_key.as_str()]));
        }
        if let Some(document_id) = &written.document_id {
            targets.push(paths::join(document_id, &[]));
        }
        if let Some(blob_id) = &written.blob_id {
            targets.push(paths::join(blob_id, &[]));
        }
        for path in targets {
            if let Err(e) = store.delete(&path).await {
                warn!(path = %path, error = %e, "Could not remove partial ingestion write");
            }
        }
    }
}

/// Registry writes made so far by one ingestion.
#[derive(Debug, Default)]
struct Written {
    blob_id: Option<String>,
    document_id: Option<String>,
    list_key: Option<String>,
}

/// Runs `archive-work` jobs claimed by the poller.
///
/// Known entries are resynced from their registry document; unknown ones are
/// ingested. Either way the entry leaves the inbox and its claim is released,
/// unless the job will be retried.
pub struct ArchiveWorkHandler {
    registry: Registry,
    archive: Arc<dyn DocumentStore>,
    orchestrator: Arc<SyncOrchestrator>,
    ingestor: ArchiveIngestor,
    queue: Arc<WorkQueue>,
    needs_review_folder: String,
}

impl ArchiveWorkHandler {
    pub fn new(
        registry: Registry,
        archive: Arc<dyn DocumentStore>,
        orchestrator: Arc<SyncOrchestrator>,
        queue: Arc<WorkQueue>,
        needs_review_folder: impl Into<String>,
    ) -> Self {
        let ingestor = ArchiveIngestor::new(registry.clone(), archive.clone());
        Self {
            registry,
            archive,
            orchestrator,
            ingestor,
            queue,
            needs_review_folder: needs_review_folder.into(),
        }
    }

    async fn process(&self, entry: &ArchiveEntry) -> Result<serde_json::Value> {
        let entry_id = entry.entry_id;
        match self.registry.archive_index.lookup(entry_id).await? {
            Some(document_id) => {
                debug!(%entry_id, document_id = %document_id, "Known archive entry, resyncing");
                let request = SyncRequest::new(document_id.clone()).with_claimed_entry(entry_id);
                let entries = self.orchestrator.sync(&request).await?;
                if !entries.values().any(|e| e.entry_id == entry_id) {
                    warn!(
                        %entry_id,
                        document_id = %document_id,
                        "Resync did not file the archive entry, moving to needs review"
                    );
                    self.review(entry_id).await;
                }
                Ok(json!({ "resynced": document_id, "attachments": entries.len() }))
            }
            None => {
                let ingested = self.ingestor.ingest(entry).await?;
                self.review(entry_id).await;
                Ok(json!({ "ingested": ingested.document_id, "key": ingested.key }))
            }
        }
    }

    async fn review(&self, entry_id: EntryId) {
        move_to_review(self.archive.as_ref(), entry_id, &self.needs_review_folder).await;
    }
}

#[async_trait]
impl JobHandler for ArchiveWorkHandler {
    fn job_type(&self) -> JobType {
        JobType::ArchiveWork
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let JobPayload::ArchiveWork(work) = ctx.payload() else {
            return JobResult::Failed("Expected an archive-work payload".into());
        };
        let entry_id = work.entry.entry_id;

        ctx.report_progress(10, Some("Processing archive entry"));
        let result = self.process(&work.entry).await;
        match result {
            Ok(summary) => {
                self.queue.release(entry_id);
                ctx.report_progress(100, Some("Done"));
                JobResult::Success(Some(summary))
            }
            Err(e) if e.is_retryable() && !ctx.is_final_attempt() => {
                // Claim stays so the poller does not queue the entry twice.
                JobResult::Retry(e.to_string())
            }
            Err(e) => {
                error!(%entry_id, error = %e, "Archive work failed, moving to needs review");
                self.review(entry_id).await;
                self.queue.release(entry_id);
                JobResult::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
