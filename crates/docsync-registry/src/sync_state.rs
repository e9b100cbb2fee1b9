//! Per-attachment sync state kept in the registry.
//!
//! States live under `{document}/_meta/services/lf-sync/{attachment key}`.
//! A state that was never written loads as the default (not created).

use std::sync::Arc;

use tracing::debug;

use docsync_core::defaults::SYNC_STATE_SUBPATH;
use docsync_core::{Clock, ResourceStore, Result, SyncState};

use crate::paths;

/// Load and save [`SyncState`] records.
#[derive(Clone)]
pub struct SyncStateStore {
    store: Arc<dyn ResourceStore>,
    clock: Arc<dyn Clock>,
}

impl SyncStateStore {
    pub fn new(store: Arc<dyn ResourceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn path(document_id: &str, key: &str) -> String {
        paths::join(document_id, &[SYNC_STATE_SUBPATH, key])
    }

    /// Load the state for one attachment.
    pub async fn load(&self, document_id: &str, key: &str) -> Result<SyncState> {
        match self.store.get(&Self::path(document_id, key)).await {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(e) if e.is_not_found() => Ok(SyncState::default()),
            Err(e) => Err(e),
        }
    }

    /// Persist a state, stamping the sync time. Returns the stored record.
    pub async fn save(&self, document_id: &str, key: &str, state: &SyncState) -> Result<SyncState> {
        let mut state = state.clone();
        state.last_synced_at = Some(self.clock.now());
        let body = serde_json::to_value(&state)?;
        self.store.put(&Self::path(document_id, key), body).await?;
        debug!(document_id, key, entry_id = ?state.archive_entry_id, "Saved sync state");
        Ok(state)
    }
}
