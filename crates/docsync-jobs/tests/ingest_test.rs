//! Archive ingestion and archive-work handling.
//!
//! Validates that:
//! - an unknown archive document becomes an unidentified registry document
//!   with its content, sync state, index entry and list link
//! - the archive-work handler ingests unknown entries and moves them to
//!   needs review
//! - a known entry dropped into the inbox is refiled from its registry document
//! - a permanent failure moves the entry to needs review and releases it
//! - a transient failure keeps the claim until the final attempt
//! - a retry after a partially failed ingestion completes it

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use docsync_archive::{MockArchive, MockOp};
use docsync_jobs::defaults::{
    INBOX_FOLDER, NEEDS_REVIEW_FOLDER, UNIDENTIFIED_CONTENT_TYPE, UNIDENTIFIED_LIST_PATH,
};
use docsync_jobs::transformers::COI_CONTENT_TYPE;
use docsync_jobs::{
    content_hash, ArchiveIngestor, ArchiveWork, ArchiveWorkHandler, EntryId, Error, FieldMap,
    FieldValue, FilingConfig, Job, JobContext, JobHandler, JobPayload, JobResult, ManualClock,
    SyncOrchestrator, SyncRequest, TransformerRegistry, WorkQueue,
};
use docsync_registry::{Blob, MemoryRegistry, Registry, ResourceStore};

const PARTNER: &str = "/bookmarks/trellisfw/trading-partners/tp1";
const FILED_PATH: &str = "/trellis/Acme Foods/Shared To Smithfield/Certificate of Insurance";
const SCAN: &[u8] = b"%PDF-1.4 scanned certificate";

struct Fixture {
    store: MemoryRegistry,
    registry: Registry,
    archive: Arc<MockArchive>,
    queue: Arc<WorkQueue>,
    orchestrator: Arc<SyncOrchestrator>,
    handler: ArchiveWorkHandler,
}

/// Registry that fails the first post to the unidentified list.
struct ListPostFailsOnce {
    inner: MemoryRegistry,
    failed: AtomicBool,
}

#[async_trait]
impl ResourceStore for ListPostFailsOnce {
    async fn get(&self, path: &str) -> docsync_jobs::Result<serde_json::Value> {
        self.inner.get(path).await
    }

    async fn put(&self, path: &str, body: serde_json::Value) -> docsync_jobs::Result<()> {
        self.inner.put(path, body).await
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> docsync_jobs::Result<String> {
        if path == UNIDENTIFIED_LIST_PATH && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(Error::Store("503 upstream".into()));
        }
        self.inner.post(path, body).await
    }

    async fn delete(&self, path: &str) -> docsync_jobs::Result<()> {
        self.inner.delete(path).await
    }

    async fn get_blob(&self, path: &str) -> docsync_jobs::Result<Blob> {
        self.inner.get_blob(path).await
    }

    async fn create_resource(
        &self,
        content_type: &str,
        body: serde_json::Value,
    ) -> docsync_jobs::Result<String> {
        self.inner.create_resource(content_type, body).await
    }

    async fn create_blob(&self, content_type: &str, bytes: Vec<u8>) -> docsync_jobs::Result<String> {
        self.inner.create_blob(content_type, bytes).await
    }
}

fn fixture() -> Fixture {
    let store = MemoryRegistry::new();
    fixture_over(store.clone(), Arc::new(store.with_origin("docsync")))
}

fn fixture_over(store: MemoryRegistry, writes: Arc<dyn ResourceStore>) -> Fixture {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let registry = Registry::new(writes, clock.clone());
    let archive = Arc::new(MockArchive::new());
    let queue = Arc::new(WorkQueue::new(clock));
    let orchestrator = Arc::new(
        SyncOrchestrator::new(
            registry.clone(),
            archive.clone(),
            Arc::new(TransformerRegistry::with_defaults()),
            FilingConfig::default().with_root("/trellis"),
        )
        .with_work_queue(queue.clone()),
    );
    let handler = ArchiveWorkHandler::new(
        registry.clone(),
        archive.clone(),
        orchestrator.clone(),
        queue.clone(),
        NEEDS_REVIEW_FOLDER,
    );
    Fixture {
        store,
        registry,
        archive,
        queue,
        orchestrator,
        handler,
    }
}

fn fields(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
        .collect()
}

fn scanned(fx: &Fixture) -> EntryId {
    fx.archive.insert_document(
        INBOX_FOLDER,
        "scan.pdf",
        fields(&[("Document Type", "Certificate of Insurance"), ("Entity", "Acme")]),
        SCAN.to_vec(),
    )
}

fn context(fx: &Fixture, entry_id: EntryId, attempt: u32) -> JobContext {
    let entry = fx.archive.entry(entry_id).unwrap();
    let mut job = Job::new(JobPayload::ArchiveWork(ArchiveWork { entry }));
    for _ in 1..attempt {
        job = job.next_attempt();
    }
    JobContext::new(job).with_max_attempts(3)
}

async fn seed_synced_coi(fx: &Fixture) -> (String, EntryId) {
    fx.store
        .put(PARTNER, json!({ "name": "Acme Foods", "externalIds": ["sap:0042"] }))
        .await
        .unwrap();
    let doc = fx
        .store
        .create_resource(
            COI_CONTENT_TYPE,
            json!({
                "insured": { "name": "Acme Foods" },
                "policies": {
                    "p1": {
                        "type": "Commercial General Liability",
                        "effective_date": "2024-01-01T00:00:00Z",
                        "expire_date": "2025-01-01T00:00:00Z"
                    }
                }
            }),
        )
        .await
        .unwrap();
    let pdf = fx
        .store
        .create_blob("application/pdf", b"%PDF-1.4 certificate".to_vec())
        .await
        .unwrap();
    fx.store
        .put(
            &format!("/{}/_meta/vdoc/pdf", doc),
            json!({ "h1": { "_id": pdf } }),
        )
        .await
        .unwrap();

    let entries = fx
        .orchestrator
        .sync(&SyncRequest::new(doc.clone()).with_trading_context(PARTNER))
        .await
        .unwrap();
    let entry_id = entries["h1"].entry_id;
    fx.registry
        .archive_index
        .register(entry_id, &doc)
        .await
        .unwrap();
    (doc, entry_id)
}

#[tokio::test]
async fn test_ingest_creates_unidentified_document() {
    let fx = fixture();
    let entry_id = scanned(&fx);
    let entry = fx.archive.entry(entry_id).unwrap();

    let ingestor = ArchiveIngestor::new(fx.registry.clone(), fx.archive.clone());
    let ingested = ingestor.ingest(&entry).await.unwrap();

    assert_eq!(ingested.key, content_hash(SCAN));

    let body = fx.store.get(&format!("/{}", ingested.document_id)).await.unwrap();
    assert_eq!(body["_type"], UNIDENTIFIED_CONTENT_TYPE);

    let vdoc = fx
        .store
        .get(&format!("/{}/_meta/vdoc/pdf", ingested.document_id))
        .await
        .unwrap();
    let blob_id = vdoc[&ingested.key]["_id"].as_str().unwrap().to_string();
    let blob = fx.store.get_blob(&format!("/{}", blob_id)).await.unwrap();
    assert_eq!(blob.bytes, SCAN);
    assert_eq!(blob.content_type.as_deref(), Some("application/pdf"));

    let state = fx
        .registry
        .sync_state
        .load(&ingested.document_id, &ingested.key)
        .await
        .unwrap();
    assert_eq!(state.archive_entry_id, Some(entry_id));
    assert_eq!(state.fields, entry.fields_map());
    assert_eq!(state.path.as_deref(), Some(INBOX_FOLDER));
    assert_eq!(state.filename.as_deref(), Some("scan.pdf"));

    assert_eq!(
        fx.registry.archive_index.lookup(entry_id).await.unwrap(),
        Some(ingested.document_id.clone())
    );

    let list = fx.store.get(UNIDENTIFIED_LIST_PATH).await.unwrap();
    let linked = list
        .as_object()
        .unwrap()
        .values()
        .any(|item| item["_id"] == ingested.document_id.as_str());
    assert!(linked, "document should be linked into the unidentified list");
}

#[tokio::test]
async fn test_unknown_entry_is_ingested_and_sent_to_review() {
    let fx = fixture();
    let entry_id = scanned(&fx);
    assert!(fx.queue.claim(entry_id));

    let result = fx.handler.execute(context(&fx, entry_id, 1)).await;

    let JobResult::Success(Some(summary)) = result else {
        panic!("expected success, got {:?}", result);
    };
    let document_id = summary["ingested"].as_str().unwrap().to_string();
    assert_eq!(
        fx.registry.archive_index.lookup(entry_id).await.unwrap(),
        Some(document_id)
    );
    assert_eq!(fx.archive.entry(entry_id).unwrap().path, NEEDS_REVIEW_FOLDER);
    assert!(!fx.queue.is_claimed(entry_id));
}

#[tokio::test]
async fn test_known_entry_is_refiled() {
    let fx = fixture();
    let (doc, entry_id) = seed_synced_coi(&fx).await;
    fx.archive.relocate(entry_id, INBOX_FOLDER);
    assert!(fx.queue.claim(entry_id));

    let result = fx.handler.execute(context(&fx, entry_id, 1)).await;

    let JobResult::Success(Some(summary)) = result else {
        panic!("expected success, got {:?}", result);
    };
    assert_eq!(summary["resynced"], doc.as_str());
    assert_eq!(fx.archive.entry(entry_id).unwrap().path, FILED_PATH);
    assert_eq!(fx.archive.document_count(), 1);
    assert!(!fx.queue.is_claimed(entry_id));
}

#[tokio::test]
async fn test_permanent_failure_moves_entry_to_review() {
    let fx = fixture();
    let entry_id = scanned(&fx);
    assert!(fx.queue.claim(entry_id));
    fx.archive
        .fail_next(MockOp::FetchContent, Error::Archive("corrupt volume".into()));

    let result = fx.handler.execute(context(&fx, entry_id, 1)).await;

    assert!(matches!(result, JobResult::Failed(ref e) if e.contains("corrupt volume")));
    assert_eq!(fx.archive.entry(entry_id).unwrap().path, NEEDS_REVIEW_FOLDER);
    assert!(!fx.queue.is_claimed(entry_id));
    assert_eq!(fx.registry.archive_index.lookup(entry_id).await.unwrap(), None);
}

#[tokio::test]
async fn test_transient_failure_keeps_claim_until_final_attempt() {
    let fx = fixture();
    let entry_id = scanned(&fx);
    assert!(fx.queue.claim(entry_id));

    fx.archive
        .fail_next(MockOp::FetchContent, Error::Request("connection reset".into()));
    let result = fx.handler.execute(context(&fx, entry_id, 1)).await;
    assert!(matches!(result, JobResult::Retry(_)));
    assert!(fx.queue.is_claimed(entry_id));
    assert_eq!(fx.archive.entry(entry_id).unwrap().path, INBOX_FOLDER);

    fx.archive
        .fail_next(MockOp::FetchContent, Error::Request("connection reset".into()));
    let result = fx.handler.execute(context(&fx, entry_id, 3)).await;
    assert!(matches!(result, JobResult::Failed(_)));
    assert!(!fx.queue.is_claimed(entry_id));
    assert_eq!(fx.archive.entry(entry_id).unwrap().path, NEEDS_REVIEW_FOLDER);
}

#[tokio::test]
async fn test_retry_after_partial_ingestion_completes_it() {
    let store = MemoryRegistry::new();
    let flaky = Arc::new(ListPostFailsOnce {
        inner: store.with_origin("docsync"),
        failed: AtomicBool::new(false),
    });
    let fx = fixture_over(store, flaky);
    let entry_id = scanned(&fx);
    assert!(fx.queue.claim(entry_id));

    let result = fx.handler.execute(context(&fx, entry_id, 1)).await;
    assert!(matches!(result, JobResult::Retry(ref e) if e.contains("503")));
    assert_eq!(fx.registry.archive_index.lookup(entry_id).await.unwrap(), None);
    assert!(fx.queue.is_claimed(entry_id));
    assert_eq!(fx.archive.entry(entry_id).unwrap().path, INBOX_FOLDER);

    let result = fx.handler.execute(context(&fx, entry_id, 2)).await;
    let JobResult::Success(Some(summary)) = result else {
        panic!("expected success, got {:?}", result);
    };
    let document_id = summary["ingested"].as_str().unwrap().to_string();
    assert_eq!(
        fx.registry.archive_index.lookup(entry_id).await.unwrap(),
        Some(document_id.clone())
    );

    let list = fx.store.get(UNIDENTIFIED_LIST_PATH).await.unwrap();
    let linked: Vec<_> = list
        .as_object()
        .unwrap()
        .values()
        .filter_map(|item| item["_id"].as_str())
        .collect();
    assert_eq!(linked, vec![document_id.as_str()]);
    assert_eq!(fx.archive.entry(entry_id).unwrap().path, NEEDS_REVIEW_FOLDER);
    assert!(!fx.queue.is_claimed(entry_id));
}

#[tokio::test]
async fn test_failed_ingestion_removes_partial_writes() {
    let store = MemoryRegistry::new();
    let flaky = Arc::new(ListPostFailsOnce {
        inner: store.with_origin("docsync"),
        failed: AtomicBool::new(false),
    });
    let fx = fixture_over(store, flaky);
    let entry_id = scanned(&fx);
    let entry = fx.archive.entry(entry_id).unwrap();

    let before = fx.store.resource_count();
    let ingestor = ArchiveIngestor::new(fx.registry.clone(), fx.archive.clone());
    let err = ingestor.ingest(&entry).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(fx.store.resource_count(), before);
    assert_eq!(fx.registry.archive_index.lookup(entry_id).await.unwrap(), None);
}
