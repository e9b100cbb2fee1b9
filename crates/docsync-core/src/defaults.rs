//! Centralized default constants for docsync.
//!
//! **This module is the single source of truth** for shared default values.
//! Components read their environment overrides in `from_env()` and fall back
//! to these constants.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section.

// =============================================================================
// ARCHIVE
// =============================================================================

/// Archive folder every archive path is relative to.
pub const ARCHIVE_BASE_FOLDER: &str = "/FSQA";

/// Default archive REST root.
pub const ARCHIVE_API_ROOT: &str = "http://localhost/CWSAPI/";

/// Archive request timeout in seconds.
pub const ARCHIVE_TIMEOUT_SECS: u64 = 60;

/// Volume new archive documents are stored in.
pub const ARCHIVE_VOLUME: &str = "Default";

/// Body fragment the archive returns when an entry id no longer exists.
pub const ARCHIVE_ENTRY_NOT_FOUND: &str = "Entry not found";

// =============================================================================
// FILING
// =============================================================================

/// Root folder of the deterministic filing layout.
pub const FILING_ROOT: &str = "/trellis/trading-partners";

/// Document type that gets the ticket-style path and filename.
pub const TICKET_DOCUMENT_TYPE: &str = "Zendesk Ticket";

/// Filename token used when more than one location is listed.
pub const MULTI_LOCATION_TOKEN: &str = "Multi-Location";

/// Filename token used when more than one product is listed.
pub const MULTI_PRODUCT_TOKEN: &str = "Multi-Product";

// =============================================================================
// FIELD NAMES
// =============================================================================

pub const FIELD_ENTITY: &str = "Entity";
pub const FIELD_SHARE_MODE: &str = "Share Mode";
pub const FIELD_DOCUMENT_TYPE: &str = "Document Type";
pub const FIELD_DOCUMENT_DATE: &str = "Document Date";
pub const FIELD_EXPIRATION_DATE: &str = "Expiration Date";
pub const FIELD_LOCATIONS: &str = "Locations";
pub const FIELD_PRODUCTS: &str = "Products";
pub const FIELD_TICKET_ID: &str = "Zendesk Ticket ID";
pub const FIELD_COMMENT_NUMBER: &str = "Comment Number";
pub const FIELD_ORIGINAL_FILENAME: &str = "Original Filename";
pub const FIELD_SAP_NUMBER: &str = "SAP Number";

/// Share mode label for documents shared with us.
pub const SHARE_MODE_INCOMING: &str = "Shared To Smithfield";

/// Share mode label for documents we shared out.
pub const SHARE_MODE_OUTGOING: &str = "Shared From Smithfield";

/// External id prefix carrying an SAP vendor number.
pub const SAP_ID_PREFIX: &str = "sap:";

// =============================================================================
// WORK QUEUE
// =============================================================================

/// Archive folder polled for archive-originated work.
pub const INBOX_FOLDER: &str = "/_Trellis_Automation";

/// Archive folder for entries that need a human.
pub const NEEDS_REVIEW_FOLDER: &str = "/_NeedsReview";

/// Poll cadence for the inbox folder.
pub const POLL_INTERVAL_MS: u64 = 10_000;

/// Claimed entries older than this are reclaimed.
pub const WORK_QUEUE_TIMEOUT_SECS: u64 = 100;

/// Upper bound for the reclaim window (one week).
pub const MAX_WORK_QUEUE_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

// =============================================================================
// REGISTRY LAYOUT
// =============================================================================

/// Default registry base URL.
pub const REGISTRY_DOMAIN: &str = "https://localhost";

/// Registry request timeout in seconds.
pub const REGISTRY_TIMEOUT_SECS: u64 = 30;

/// Origin marker written with this service's own registry writes.
pub const REGISTRY_SELF_ORIGIN: &str = "docsync";

/// Sub-path under a resource holding the origin marker of the last write
/// made by this service: `{ "origin": ..., "rev": ... }`.
pub const ORIGIN_MARKER_SUBPATH: &str = "_meta/services/lf-sync-origin";

/// Response header carrying a resource's revision after a write.
pub const REGISTRY_REV_HEADER: &str = "x-oada-rev";

/// Service name used for per-document bookkeeping under `_meta/services`.
pub const SERVICE_NAME: &str = "lf-sync";

/// Sub-path under a document holding one sync state per attachment.
pub const SYNC_STATE_SUBPATH: &str = "_meta/services/lf-sync";

/// Flat index of archive entry id -> registry document.
pub const BY_ARCHIVE_ID_PATH: &str = "/bookmarks/services/lf-sync/by-lf-id";

/// List ingested archive documents are linked into.
pub const UNIDENTIFIED_LIST_PATH: &str = "/bookmarks/trellisfw/documents/unidentified";

/// Content type for documents created by ingestion.
pub const UNIDENTIFIED_CONTENT_TYPE: &str = "application/vnd.trellisfw.unidentified.1+json";

/// Trading partner directory.
pub const TRADING_PARTNERS_PATH: &str = "/bookmarks/trellisfw/trading-partners";

/// Attachment key reserved for identity bookkeeping.
pub const SELF_KEY: &str = "_id";

/// Polling change feed cadence.
pub const WATCH_POLL_INTERVAL_MS: u64 = 5_000;

// =============================================================================
// JOB DISPATCHER
// =============================================================================

/// Default number of jobs executed concurrently.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Attempts before a retryable job fails for good.
pub const JOB_MAX_ATTEMPTS: u32 = 3;

/// Per-job execution timeout in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Upper bound for exponential retry backoff.
pub const JOB_MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Capacity of submission queues and event broadcast channels.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SERVICE
// =============================================================================

/// Seconds to wait for running jobs after a shutdown signal.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;
