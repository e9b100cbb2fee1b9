//! Registry -> archive sync of one document.
//!
//! Each attachment of a document becomes one archive document. Fields are
//! derived by the document's transformer, reconciled against what was last
//! recorded and what the archive holds now, then filed at a deterministic
//! location. Re-running a sync with nothing changed only confirms metadata.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use docsync_core::defaults::{
    FIELD_DOCUMENT_DATE, FIELD_DOCUMENT_TYPE, FIELD_ENTITY, FIELD_SAP_NUMBER, FIELD_SHARE_MODE,
    SELF_KEY, SHARE_MODE_INCOMING, SHARE_MODE_OUTGOING,
};
use docsync_core::{
    file, is_unfileable, reconcile, recorded_fields, ArchiveEntry, Attachment, Blob,
    CreateDocumentRequest, Document, DocumentStore, EntryId, Error, FieldMap, FieldValue, Filing,
    FilingConfig, JobPayload, JobType, Result, SyncRequest, SyncState, Transformer,
};
use docsync_registry::Registry;

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::transformers::TransformerRegistry;
use crate::work_queue::WorkQueue;

/// Fallback MIME type for content nobody could identify.
const OCTET_STREAM: &str = "application/octet-stream";

/// Share mode label for a document's raw `_meta/shared` marker.
pub fn share_mode_label(shared: Option<&str>) -> &'static str {
    match shared {
        None | Some("incoming") => SHARE_MODE_INCOMING,
        Some(_) => SHARE_MODE_OUTGOING,
    }
}

/// MIME type of a blob: declared type first, then content sniffing.
pub fn detect_mime_type(blob: &Blob) -> String {
    match blob.content_type.as_deref() {
        Some(ct) if !ct.is_empty() && ct != OCTET_STREAM => ct.to_string(),
        _ => infer::get(&blob.bytes)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| OCTET_STREAM.to_string()),
    }
}

/// Syncs registry documents into the archive.
pub struct SyncOrchestrator {
    registry: Registry,
    archive: Arc<dyn DocumentStore>,
    transformers: Arc<TransformerRegistry>,
    filing: FilingConfig,
    work_queue: Option<Arc<WorkQueue>>,
}

impl SyncOrchestrator {
    pub fn new(
        registry: Registry,
        archive: Arc<dyn DocumentStore>,
        transformers: Arc<TransformerRegistry>,
        filing: FilingConfig,
    ) -> Self {
        Self {
            registry,
            archive,
            transformers,
            filing,
            work_queue: None,
        }
    }

    /// Release claims on archive entries this orchestrator finishes.
    pub fn with_work_queue(mut self, queue: Arc<WorkQueue>) -> Self {
        self.work_queue = Some(queue);
        self
    }

    /// Sync every attachment of a document.
    ///
    /// Returns the settled archive entry per attachment key. Attachments
    /// without any fields yet are left out. The first failure aborts the
    /// remaining attachments and is returned as [`Error::Sync`]; attachments
    /// already synced stay synced.
    #[instrument(
        skip(self, request),
        fields(subsystem = "sync", op = "sync", document_id = %request.document_id)
    )]
    pub async fn sync(&self, request: &SyncRequest) -> Result<BTreeMap<String, ArchiveEntry>> {
        let start = Instant::now();
        let entries = self
            .sync_document(request)
            .await
            .map_err(|e| Error::sync(request.document_id.clone(), e))?;
        info!(
            attachments = entries.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Document synced"
        );
        Ok(entries)
    }

    async fn sync_document(&self, request: &SyncRequest) -> Result<BTreeMap<String, ArchiveEntry>> {
        let document = self.registry.documents.fetch(&request.document_id).await?;
        let transformer = self
            .transformers
            .get(&document.content_type)
            .ok_or_else(|| Error::UnknownDocumentType(document.content_type.clone()))?;

        let automated = self
            .automated_fields(&document, transformer.as_ref(), request)
            .await?;

        let mut result = BTreeMap::new();
        for attachment in self.registry.documents.attachments(&document.id).await? {
            if attachment.key == SELF_KEY {
                continue;
            }
            if let Some(entry) = self
                .sync_attachment(&document, &attachment, &automated, transformer.as_ref())
                .await?
            {
                if request.claimed_entry == Some(entry.entry_id) {
                    self.release(entry.entry_id);
                }
                result.insert(attachment.key.clone(), entry);
            }
        }
        Ok(result)
    }

    /// Transformer fields plus the context the document itself does not carry.
    async fn automated_fields(
        &self,
        document: &Document,
        transformer: &dyn Transformer,
        request: &SyncRequest,
    ) -> Result<FieldMap> {
        let mut fields = transformer.document_fields(document)?;

        if let Some(ref context) = request.trading_context {
            let partner = self.registry.documents.trading_partner(context).await?;
            fields.insert(FIELD_ENTITY.to_string(), FieldValue::Single(partner.name.clone()));
            let sap = partner.sap_numbers();
            if !sap.is_empty() {
                fields.insert(FIELD_SAP_NUMBER.to_string(), FieldValue::Single(sap));
            }
        }

        if !fields.contains_key(FIELD_SHARE_MODE) {
            let shared = self.registry.documents.share_mode(&document.id).await?;
            fields.insert(
                FIELD_SHARE_MODE.to_string(),
                FieldValue::from(share_mode_label(shared.as_deref())),
            );
        }

        Ok(fields)
    }

    #[instrument(
        skip(self, document, automated, transformer),
        fields(attachment_key = %attachment.key)
    )]
    async fn sync_attachment(
        &self,
        document: &Document,
        attachment: &Attachment,
        automated: &FieldMap,
        transformer: &dyn Transformer,
    ) -> Result<Option<ArchiveEntry>> {
        let mut automated = automated.clone();
        automated.extend(transformer.attachment_fields(attachment));

        let previous = self
            .registry
            .sync_state
            .load(&document.id, &attachment.key)
            .await?;
        // Undated documents keep the date they were first synced on.
        if !automated.contains_key(FIELD_DOCUMENT_DATE)
            && !previous.fields.contains_key(FIELD_DOCUMENT_DATE)
            && !is_unfileable(&automated)
        {
            let today = self.registry.clock().now().format("%Y-%m-%d").to_string();
            automated.insert(FIELD_DOCUMENT_DATE.to_string(), FieldValue::Single(today));
        }

        let mut entry_id = previous.archive_entry_id;
        let current = match entry_id {
            Some(id) => match self.archive.get_metadata(id).await {
                Ok(fields) => Some(fields),
                Err(e) if e.is_not_found() => {
                    warn!(entry_id = %id, "Recorded archive entry is gone, recreating");
                    entry_id = None;
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let fields = reconcile(&automated, &previous.fields, current.as_ref());
        if is_unfileable(&fields) {
            debug!("No fields to file yet, skipping attachment");
            return Ok(None);
        }

        let filing = match file(&fields, &self.filing) {
            Ok(filing) => filing,
            Err(Error::InvalidInput(reason)) => {
                warn!(%reason, "Fields do not determine a location yet, skipping attachment");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let template = fields
            .get(FIELD_DOCUMENT_TYPE)
            .and_then(FieldValue::first)
            .map(String::from);

        let (entry_id, settled) = match entry_id {
            Some(id) => match self
                .update_entry(id, &fields, template.as_deref(), &filing)
                .await
            {
                Ok(settled) => (id, settled),
                Err(Error::StaleArchiveEntry(_)) => {
                    warn!(entry_id = %id, "Archive lost the entry, recreating");
                    let id = self
                        .create_entry(attachment, &fields, template, &filing)
                        .await?;
                    (id, None)
                }
                Err(e) => return Err(e),
            },
            None => {
                let id = self
                    .create_entry(attachment, &fields, template, &filing)
                    .await?;
                (id, None)
            }
        };

        let state = SyncState {
            archive_entry_id: Some(entry_id),
            fields: recorded_fields(&automated, &previous.fields, &fields),
            path: Some(filing.path),
            filename: Some(filing.filename),
            last_synced_at: None,
        };
        if !state.same_outcome(&previous) {
            self.registry
                .sync_state
                .save(&document.id, &attachment.key, &state)
                .await?;
        }

        let entry = match settled {
            Some(entry) => entry,
            None => self.archive.retrieve_entry(entry_id).await?,
        };
        Ok(Some(entry))
    }

    /// Push fields to an existing entry and move it into place.
    ///
    /// Returns the entry when it was already filed correctly, `None` when it
    /// had to be moved and must be re-read.
    async fn update_entry(
        &self,
        entry_id: EntryId,
        fields: &FieldMap,
        template: Option<&str>,
        filing: &Filing,
    ) -> Result<Option<ArchiveEntry>> {
        stale_if_missing(
            entry_id,
            self.archive.set_metadata(entry_id, fields, template).await,
        )?;
        let entry = stale_if_missing(entry_id, self.archive.retrieve_entry(entry_id).await)?;
        if entry.is_at(&filing.path, &filing.filename) {
            debug!(%entry_id, "Archive entry already filed");
            return Ok(Some(entry));
        }

        if entry.name != filing.filename {
            self.archive
                .rename_entry(entry_id, &filing.path, &filing.filename)
                .await?;
        } else {
            self.archive.move_entry(entry_id, &filing.path).await?;
        }
        info!(
            %entry_id,
            path = %filing.path,
            name = %filing.filename,
            "Refiled archive entry"
        );
        Ok(None)
    }

    async fn create_entry(
        &self,
        attachment: &Attachment,
        fields: &FieldMap,
        template: Option<String>,
        filing: &Filing,
    ) -> Result<EntryId> {
        let blob = self.registry.documents.content(attachment).await?;
        let mime_type = detect_mime_type(&blob);
        let entry_id = self
            .archive
            .create_document(CreateDocumentRequest {
                path: filing.path.clone(),
                name: filing.filename.clone(),
                mime_type,
                template_name: template,
                fields: fields.clone(),
                content: blob.bytes,
            })
            .await?;
        info!(
            %entry_id,
            path = %filing.path,
            name = %filing.filename,
            "Created archive document"
        );
        Ok(entry_id)
    }

    fn release(&self, entry_id: EntryId) {
        if let Some(ref queue) = self.work_queue {
            if queue.release(entry_id) {
                debug!(%entry_id, "Released archive claim");
            }
        }
    }
}

fn stale_if_missing<T>(entry_id: EntryId, result: Result<T>) -> Result<T> {
    match result {
        Err(e) if e.is_not_found() => Err(Error::StaleArchiveEntry(entry_id)),
        other => other,
    }
}

/// Runs `sync-doc` jobs.
pub struct SyncDocumentHandler {
    orchestrator: Arc<SyncOrchestrator>,
}

impl SyncDocumentHandler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for SyncDocumentHandler {
    fn job_type(&self) -> JobType {
        JobType::SyncDocument
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let JobPayload::SyncDocument(request) = ctx.payload() else {
            return JobResult::Failed("Expected a sync-doc payload".into());
        };

        ctx.report_progress(10, Some("Syncing document"));
        match self.orchestrator.sync(request).await {
            Ok(entries) => {
                ctx.report_progress(100, Some("Done"));
                JobResult::Success(serde_json::to_value(&entries).ok())
            }
            Err(e) if e.is_retryable() => JobResult::Retry(e.to_string()),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
