//! # docsync-registry
//!
//! Registry access layer for docsync.
//!
//! This crate provides:
//! - An HTTP client for the path-addressed registry
//! - An in-memory registry with link following and change events
//! - A polling change feed that works against any registry
//! - Repositories for documents, sync state and the archive id index
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docsync_core::SystemClock;
//! use docsync_registry::{HttpRegistry, Registry};
//!
//! let registry = Registry::new(Arc::new(HttpRegistry::from_env()?), Arc::new(SystemClock));
//! let state = registry.sync_state.load("resources/abc", "h1").await?;
//! ```

pub mod archive_index;
pub mod documents;
pub mod feed;
pub mod http;
pub mod memory;
pub mod paths;
pub mod sync_state;

use std::sync::Arc;

pub use docsync_core::*;

pub use archive_index::ArchiveIndex;
pub use documents::DocumentRepository;
pub use feed::PollingChangeFeed;
pub use http::{HttpRegistry, RegistryConfig};
pub use memory::{MemoryRegistry, BOOKMARKS_ID};
pub use sync_state::SyncStateStore;

/// Combined registry context with all repositories.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn ResourceStore>,
    clock: Arc<dyn Clock>,
    /// Domain documents and their attachments.
    pub documents: DocumentRepository,
    /// Per-attachment sync state.
    pub sync_state: SyncStateStore,
    /// Archive entry id -> registry document.
    pub archive_index: ArchiveIndex,
}

impl Registry {
    pub fn new(store: Arc<dyn ResourceStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            documents: DocumentRepository::new(store.clone()),
            sync_state: SyncStateStore::new(store.clone(), clock.clone()),
            archive_index: ArchiveIndex::new(store.clone()),
            store,
            clock,
        }
    }

    /// Clock used for timestamps written to the registry.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The underlying resource store.
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }
}
