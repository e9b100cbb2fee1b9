//! Core traits for docsync abstractions.
//!
//! These traits define the seams to the two external stores, the registry
//! change feed, per-type field transformers and time, enabling pluggable
//! backends and deterministic tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde_json::Value as JsonValue;

use crate::defaults::FIELD_ORIGINAL_FILENAME;
use crate::error::Result;
use crate::models::*;
use crate::pattern::PathPattern;

// =============================================================================
// ARCHIVE (DOCUMENT STORE)
// =============================================================================

/// Request to create a new archive document.
#[derive(Debug, Clone)]
pub struct CreateDocumentRequest {
    /// Destination folder, relative to the archive base folder.
    pub path: String,
    pub name: String,
    pub mime_type: String,
    /// Archive template the fields belong to.
    pub template_name: Option<String>,
    pub fields: FieldMap,
    pub content: Vec<u8>,
}

/// Operations against the archive.
///
/// Paths are relative to the configured archive base folder and use `/`.
/// A missing entry is reported as [`crate::Error::NotFound`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document and return its entry id.
    async fn create_document(&self, req: CreateDocumentRequest) -> Result<EntryId>;

    /// Replace the template and field values of an entry.
    async fn set_metadata(
        &self,
        entry_id: EntryId,
        fields: &FieldMap,
        template_name: Option<&str>,
    ) -> Result<()>;

    /// Move an entry into `path`, keeping its name.
    async fn move_entry(&self, entry_id: EntryId, path: &str) -> Result<()>;

    /// Move an entry into `path` under `name`.
    async fn rename_entry(&self, entry_id: EntryId, path: &str, name: &str) -> Result<()>;

    /// Fetch the current state of an entry.
    async fn retrieve_entry(&self, entry_id: EntryId) -> Result<ArchiveEntry>;

    /// Fetch the non-empty field values of an entry.
    async fn get_metadata(&self, entry_id: EntryId) -> Result<FieldMap>;

    /// List the direct children of a folder.
    async fn browse_folder(&self, path: &str) -> Result<Vec<ArchiveEntry>>;

    /// Download the electronic document of an entry.
    async fn fetch_content(&self, entry_id: EntryId) -> Result<Vec<u8>>;
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Path-addressed access to the registry.
///
/// Paths are either absolute (`/bookmarks/...`) or resource ids
/// (`resources/abc`); both forms are accepted with or without a leading `/`.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read the JSON value at a path.
    async fn get(&self, path: &str) -> Result<JsonValue>;

    /// Merge `body` into the value at `path`, creating it if needed.
    async fn put(&self, path: &str, body: JsonValue) -> Result<()>;

    /// Append `body` to the list at `path` and return the new key.
    async fn post(&self, path: &str, body: JsonValue) -> Result<String>;

    /// Remove the value at a path.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Read binary content.
    async fn get_blob(&self, path: &str) -> Result<Blob>;

    /// Create a JSON resource and return its id (`resources/<key>`).
    async fn create_resource(&self, content_type: &str, body: JsonValue) -> Result<String>;

    /// Create a binary resource and return its id (`resources/<key>`).
    async fn create_blob(&self, content_type: &str, bytes: Vec<u8>) -> Result<String>;
}

/// Stream of registry change notifications.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Source of registry change notifications.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Watch every item matching `pattern`.
    async fn watch(&self, pattern: &PathPattern) -> Result<ChangeStream>;
}

// =============================================================================
// TRANSFORMERS
// =============================================================================

/// Derives archive fields from a registry document of one content type.
pub trait Transformer: Send + Sync {
    /// Archive document type label (also used as archive template).
    fn document_type(&self) -> &str;

    /// Fields derived from the document body.
    fn document_fields(&self, document: &Document) -> Result<FieldMap>;

    /// Fields derived from one attachment.
    fn attachment_fields(&self, attachment: &Attachment) -> FieldMap {
        let mut fields = FieldMap::new();
        if let Some(ref filename) = attachment.original_filename {
            fields.insert(
                FIELD_ORIGINAL_FILENAME.to_string(),
                FieldValue::Single(filename.clone()),
            );
        }
        fields
    }
}

// =============================================================================
// CLOCK
// =============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl Transformer for Fixed {
        fn document_type(&self) -> &str {
            "Fixed"
        }

        fn document_fields(&self, _document: &Document) -> Result<FieldMap> {
            Ok(FieldMap::new())
        }
    }

    #[test]
    fn test_default_attachment_fields_original_filename() {
        let attachment = Attachment {
            key: "abc".into(),
            resource_id: "resources/abc".into(),
            original_filename: Some("scan.pdf".into()),
        };
        let fields = Fixed.attachment_fields(&attachment);
        assert_eq!(
            fields.get(FIELD_ORIGINAL_FILENAME),
            Some(&FieldValue::from("scan.pdf"))
        );
    }

    #[test]
    fn test_default_attachment_fields_without_filename() {
        let attachment = Attachment {
            key: "abc".into(),
            resource_id: "resources/abc".into(),
            original_filename: None,
        };
        assert!(Fixed.attachment_fields(&attachment).is_empty());
    }

    #[test]
    fn test_manual_clock_advance() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(101));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(101));
    }
}
