//! Domain models shared by every docsync crate.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// FIELDS
// =============================================================================

/// Value of one archive metadata field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Multi(Vec<String>),
}

impl FieldValue {
    /// Non-empty values in their stored order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            FieldValue::Single(v) => {
                if v.is_empty() {
                    Vec::new()
                } else {
                    vec![v.as_str()]
                }
            }
            FieldValue::Multi(vs) => vs
                .iter()
                .map(String::as_str)
                .filter(|v| !v.is_empty())
                .collect(),
        }
    }

    /// True when no non-empty value is present.
    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    /// First non-empty value.
    pub fn first(&self) -> Option<&str> {
        self.values().into_iter().next()
    }

    /// Set equality: ordering and duplicates are not semantic, and a single
    /// value equals a one-element list.
    pub fn equivalent(&self, other: &FieldValue) -> bool {
        let mut a = self.values();
        let mut b = other.values();
        a.sort_unstable();
        a.dedup();
        b.sort_unstable();
        b.dedup();
        a == b
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Single(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Single(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(vs: Vec<String>) -> Self {
        FieldValue::Multi(vs)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(vs: Vec<&str>) -> Self {
        FieldValue::Multi(vs.into_iter().map(String::from).collect())
    }
}

/// Archive field name -> value. Ordered so serialization is stable.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Drop entries that carry no value.
pub fn non_empty_fields(fields: FieldMap) -> FieldMap {
    fields.into_iter().filter(|(_, v)| !v.is_empty()).collect()
}

// =============================================================================
// ARCHIVE
// =============================================================================

/// Archive entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(EntryId)
            .map_err(|_| Error::InvalidInput(format!("Invalid archive entry id: {}", s)))
    }
}

/// Kind of archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Document,
    Folder,
    Shortcut,
    #[serde(other)]
    Other,
}

/// One named field on an archive entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveField {
    pub name: String,
    pub value: FieldValue,
}

/// Snapshot of an archive entry.
///
/// `path` is the parent folder relative to the archive base folder, with `/`
/// separators and a leading `/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub entry_id: EntryId,
    pub entry_type: EntryType,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub fields: Vec<ArchiveField>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl ArchiveEntry {
    pub fn is_document(&self) -> bool {
        self.entry_type == EntryType::Document
    }

    /// Field list as a map, dropping fields without a value.
    pub fn fields_map(&self) -> FieldMap {
        non_empty_fields(
            self.fields
                .iter()
                .map(|f| (f.name.clone(), f.value.clone()))
                .collect(),
        )
    }

    /// Whether the entry already sits at `path` under `name`.
    pub fn is_at(&self, path: &str, name: &str) -> bool {
        normalize_folder(&self.path) == normalize_folder(path) && self.name == name
    }
}

fn normalize_folder(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Deterministic filing location for an archive document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filing {
    pub path: String,
    pub filename: String,
}

// =============================================================================
// SYNC STATE
// =============================================================================

/// Outcome of the last sync of one (document, attachment) pair.
///
/// Serialized with the field names already persisted in the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(
        rename = "LaserficheEntryID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub archive_entry_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: FieldMap,
    #[serde(rename = "Path", default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "lastSync", default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncState {
    /// Whether the attachment has been created in the archive.
    pub fn is_created(&self) -> bool {
        self.archive_entry_id.is_some()
    }

    /// Equality ignoring the sync timestamp.
    pub fn same_outcome(&self, other: &SyncState) -> bool {
        self.archive_entry_id == other.archive_entry_id
            && self.fields == other.fields
            && self.path == other.path
            && self.filename == other.filename
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Registry-owned domain document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Resource id, e.g. `resources/abc123`.
    pub id: String,
    /// Registry content type (`_type`).
    pub content_type: String,
    pub body: JsonValue,
}

/// Binary attachment of a document (a "vdoc").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Stable key, unique within the document.
    pub key: String,
    /// Resource id of the binary content.
    pub resource_id: String,
    pub original_filename: Option<String>,
}

/// Binary payload with its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Counterparty a document is shared with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPartner {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "externalIds", default)]
    pub external_ids: Vec<String>,
}

impl TradingPartner {
    /// SAP vendor numbers, comma joined.
    pub fn sap_numbers(&self) -> String {
        self.external_ids
            .iter()
            .filter_map(|id| id.strip_prefix(crate::defaults::SAP_ID_PREFIX))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Registry change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Path at which the change was observed.
    pub path: String,
    /// Resource that changed.
    pub resource_id: String,
    /// Origin marker of the writer, if known.
    pub origin: Option<String>,
}

// =============================================================================
// JOBS
// =============================================================================

/// Job types handled by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    SyncDocument,
    ArchiveWork,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SyncDocument => "sync-doc",
            JobType::ArchiveWork => "archive-work",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to sync one registry document into the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub document_id: String,
    /// Registry path of the trading partner the document was found under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_context: Option<String>,
    /// Archive entry claimed from the work queue that triggered this sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_entry: Option<EntryId>,
}

impl SyncRequest {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            trading_context: None,
            claimed_entry: None,
        }
    }

    pub fn with_trading_context(mut self, context: impl Into<String>) -> Self {
        self.trading_context = Some(context.into());
        self
    }

    pub fn with_claimed_entry(mut self, entry_id: EntryId) -> Self {
        self.claimed_entry = Some(entry_id);
        self
    }
}

/// Archive entry claimed from the inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveWork {
    pub entry: ArchiveEntry,
}

/// Job record, serialized as `{type, config}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config")]
pub enum JobPayload {
    #[serde(rename = "sync-doc")]
    SyncDocument(SyncRequest),
    #[serde(rename = "archive-work")]
    ArchiveWork(ArchiveWork),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::SyncDocument(_) => JobType::SyncDocument,
            JobPayload::ArchiveWork(_) => JobType::ArchiveWork,
        }
    }
}

/// A unit of work submitted to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    /// 1-based attempt counter.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload,
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }

    /// The same job, one attempt later.
    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}
