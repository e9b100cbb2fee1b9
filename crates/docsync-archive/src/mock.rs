//! In-memory archive for tests.
//!
//! Records every call, supports one-shot failure injection per operation, and
//! exposes helpers to simulate out-of-band changes (human field edits, the
//! filing workflow relocating an entry, an entry disappearing).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use docsync_core::{
    ArchiveEntry, ArchiveField, CreateDocumentRequest, DocumentStore, EntryId, EntryType, Error,
    FieldMap, Result,
};

/// Archive operation, for failure injection and call filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateDocument,
    SetMetadata,
    MoveEntry,
    RenameEntry,
    RetrieveEntry,
    GetMetadata,
    BrowseFolder,
    FetchContent,
}

/// Recorded archive call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    CreateDocument {
        path: String,
        name: String,
        mime_type: String,
        template_name: Option<String>,
        fields: FieldMap,
    },
    SetMetadata {
        entry_id: EntryId,
        fields: FieldMap,
        template_name: Option<String>,
    },
    MoveEntry {
        entry_id: EntryId,
        path: String,
    },
    RenameEntry {
        entry_id: EntryId,
        path: String,
        name: String,
    },
    RetrieveEntry(EntryId),
    GetMetadata(EntryId),
    BrowseFolder(String),
    FetchContent(EntryId),
}

impl MockCall {
    pub fn op(&self) -> MockOp {
        match self {
            MockCall::CreateDocument { .. } => MockOp::CreateDocument,
            MockCall::SetMetadata { .. } => MockOp::SetMetadata,
            MockCall::MoveEntry { .. } => MockOp::MoveEntry,
            MockCall::RenameEntry { .. } => MockOp::RenameEntry,
            MockCall::RetrieveEntry(_) => MockOp::RetrieveEntry,
            MockCall::GetMetadata(_) => MockOp::GetMetadata,
            MockCall::BrowseFolder(_) => MockOp::BrowseFolder,
            MockCall::FetchContent(_) => MockOp::FetchContent,
        }
    }

    /// Whether the call changes archive state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self.op(),
            MockOp::CreateDocument | MockOp::SetMetadata | MockOp::MoveEntry | MockOp::RenameEntry
        )
    }
}

struct Stored {
    entry: ArchiveEntry,
    content: Vec<u8>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<EntryId, Stored>,
    next_id: u64,
    calls: Vec<MockCall>,
    failures: HashMap<MockOp, VecDeque<Error>>,
}

/// Recording in-memory [`DocumentStore`]. Clones share state.
#[derive(Clone, Default)]
pub struct MockArchive {
    state: Arc<Mutex<State>>,
}

impl MockArchive {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: MockOp, error: Error) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, op: MockOp) -> Vec<MockCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    /// Calls that changed archive state.
    pub fn mutating_calls(&self) -> Vec<MockCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Current state of an entry.
    pub fn entry(&self, entry_id: EntryId) -> Option<ArchiveEntry> {
        self.lock().entries.get(&entry_id).map(|s| s.entry.clone())
    }

    pub fn content(&self, entry_id: EntryId) -> Option<Vec<u8>> {
        self.lock().entries.get(&entry_id).map(|s| s.content.clone())
    }

    /// Number of documents stored.
    pub fn document_count(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|s| s.entry.is_document())
            .count()
    }

    /// Seed a document without recording a call.
    pub fn insert_document(
        &self,
        path: &str,
        name: &str,
        fields: FieldMap,
        content: Vec<u8>,
    ) -> EntryId {
        self.insert(path, name, EntryType::Document, fields, content)
    }

    /// Seed a folder without recording a call.
    pub fn insert_folder(&self, path: &str, name: &str) -> EntryId {
        self.insert(path, name, EntryType::Folder, FieldMap::new(), Vec::new())
    }

    fn insert(
        &self,
        path: &str,
        name: &str,
        entry_type: EntryType,
        fields: FieldMap,
        content: Vec<u8>,
    ) -> EntryId {
        let mut state = self.lock();
        let entry_id = next_id(&mut state);
        let size = (entry_type == EntryType::Document).then_some(content.len() as u64);
        state.entries.insert(
            entry_id,
            Stored {
                entry: ArchiveEntry {
                    entry_id,
                    entry_type,
                    name: name.to_string(),
                    path: normalize(path),
                    fields: to_fields(&fields),
                    template_name: None,
                    mime_type: None,
                    size,
                },
                content,
            },
        );
        entry_id
    }

    /// Simulate a human editing fields directly in the archive.
    pub fn edit_fields(&self, entry_id: EntryId, fields: FieldMap) {
        if let Some(stored) = self.lock().entries.get_mut(&entry_id) {
            merge_fields(&mut stored.entry, &fields);
        }
    }

    /// Simulate the archive moving an entry on its own.
    pub fn relocate(&self, entry_id: EntryId, path: &str) {
        if let Some(stored) = self.lock().entries.get_mut(&entry_id) {
            stored.entry.path = normalize(path);
        }
    }

    /// Simulate the archive losing an entry.
    pub fn remove(&self, entry_id: EntryId) {
        self.lock().entries.remove(&entry_id);
    }

    /// Record a call and consume an injected failure for it, if any.
    fn record(&self, call: MockCall) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        let op = call.op();
        state.calls.push(call);
        if let Some(error) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }
}

fn next_id(state: &mut State) -> EntryId {
    state.next_id += 1;
    EntryId(state.next_id)
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

fn to_fields(fields: &FieldMap) -> Vec<ArchiveField> {
    fields
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(name, value)| ArchiveField {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn merge_fields(entry: &mut ArchiveEntry, fields: &FieldMap) {
    let mut merged: FieldMap = entry
        .fields
        .iter()
        .map(|f| (f.name.clone(), f.value.clone()))
        .collect();
    for (name, value) in fields {
        merged.insert(name.clone(), value.clone());
    }
    entry.fields = to_fields(&merged);
}

fn not_found(entry_id: EntryId) -> Error {
    Error::NotFound(format!("archive entry {}", entry_id))
}

#[async_trait]
impl DocumentStore for MockArchive {
    async fn create_document(&self, req: CreateDocumentRequest) -> Result<EntryId> {
        let mut state = self.record(MockCall::CreateDocument {
            path: req.path.clone(),
            name: req.name.clone(),
            mime_type: req.mime_type.clone(),
            template_name: req.template_name.clone(),
            fields: req.fields.clone(),
        })?;
        let entry_id = next_id(&mut state);
        state.entries.insert(
            entry_id,
            Stored {
                entry: ArchiveEntry {
                    entry_id,
                    entry_type: EntryType::Document,
                    name: req.name,
                    path: normalize(&req.path),
                    fields: to_fields(&req.fields),
                    template_name: req.template_name,
                    mime_type: Some(req.mime_type),
                    size: Some(req.content.len() as u64),
                },
                content: req.content,
            },
        );
        Ok(entry_id)
    }

    async fn set_metadata(
        &self,
        entry_id: EntryId,
        fields: &FieldMap,
        template_name: Option<&str>,
    ) -> Result<()> {
        let mut state = self.record(MockCall::SetMetadata {
            entry_id,
            fields: fields.clone(),
            template_name: template_name.map(String::from),
        })?;
        let stored = state
            .entries
            .get_mut(&entry_id)
            .ok_or(Error::StaleArchiveEntry(entry_id))?;
        merge_fields(&mut stored.entry, fields);
        if let Some(template) = template_name {
            stored.entry.template_name = Some(template.to_string());
        }
        Ok(())
    }

    async fn move_entry(&self, entry_id: EntryId, path: &str) -> Result<()> {
        let mut state = self.record(MockCall::MoveEntry {
            entry_id,
            path: path.to_string(),
        })?;
        let stored = state
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| not_found(entry_id))?;
        stored.entry.path = normalize(path);
        Ok(())
    }

    async fn rename_entry(&self, entry_id: EntryId, path: &str, name: &str) -> Result<()> {
        let mut state = self.record(MockCall::RenameEntry {
            entry_id,
            path: path.to_string(),
            name: name.to_string(),
        })?;
        let stored = state
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| not_found(entry_id))?;
        stored.entry.path = normalize(path);
        stored.entry.name = name.to_string();
        Ok(())
    }

    async fn retrieve_entry(&self, entry_id: EntryId) -> Result<ArchiveEntry> {
        let state = self.record(MockCall::RetrieveEntry(entry_id))?;
        state
            .entries
            .get(&entry_id)
            .map(|s| s.entry.clone())
            .ok_or_else(|| not_found(entry_id))
    }

    async fn get_metadata(&self, entry_id: EntryId) -> Result<FieldMap> {
        let state = self.record(MockCall::GetMetadata(entry_id))?;
        state
            .entries
            .get(&entry_id)
            .map(|s| s.entry.fields_map())
            .ok_or_else(|| not_found(entry_id))
    }

    async fn browse_folder(&self, path: &str) -> Result<Vec<ArchiveEntry>> {
        let state = self.record(MockCall::BrowseFolder(path.to_string()))?;
        let folder = normalize(path);
        Ok(state
            .entries
            .values()
            .filter(|s| s.entry.path == folder)
            .map(|s| s.entry.clone())
            .collect())
    }

    async fn fetch_content(&self, entry_id: EntryId) -> Result<Vec<u8>> {
        let state = self.record(MockCall::FetchContent(entry_id))?;
        state
            .entries
            .get(&entry_id)
            .map(|s| s.content.clone())
            .ok_or_else(|| not_found(entry_id))
    }
}
