//! Archive inbox poller.
//!
//! Every tick reclaims claims that outlived the work-queue timeout, then
//! lists the inbox folder. Folders and other non-documents are rejected to
//! the needs-review folder; unclaimed documents are claimed and queued as
//! archive-work jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use docsync_core::defaults::{
    INBOX_FOLDER, MAX_WORK_QUEUE_TIMEOUT_SECS, NEEDS_REVIEW_FOLDER, POLL_INTERVAL_MS,
    WORK_QUEUE_TIMEOUT_SECS,
};
use docsync_core::{ArchiveWork, DocumentStore, EntryId, Error, JobPayload, Result};

use crate::dispatcher::JobSubmitter;
use crate::work_queue::WorkQueue;

/// Configuration for the inbox poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Poll cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Claims older than this are reclaimed.
    pub work_timeout_secs: u64,
    /// Archive folder polled for work.
    pub inbox_folder: String,
    /// Archive folder for entries that need a human.
    pub needs_review_folder: String,
    /// Whether to poll at all.
    pub enabled: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL_MS,
            work_timeout_secs: WORK_QUEUE_TIMEOUT_SECS,
            inbox_folder: INBOX_FOLDER.to_string(),
            needs_review_folder: NEEDS_REVIEW_FOLDER.to_string(),
            enabled: true,
        }
    }
}

impl PollerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `POLLER_ENABLED` | `true` | Enable/disable polling |
    /// | `LF_POLL_RATE_MS` | `10000` | Poll cadence |
    /// | `WORK_QUEUE_TIMEOUT_SECS` | `100` | Reclaim window |
    /// | `INBOX_FOLDER` | `/_Trellis_Automation` | Polled folder |
    /// | `NEEDS_REVIEW_FOLDER` | `/_NeedsReview` | Reclaim/reject destination |
    pub fn from_env() -> Self {
        Self {
            poll_interval_ms: std::env::var("LF_POLL_RATE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(POLL_INTERVAL_MS)
                .max(1),
            work_timeout_secs: std::env::var("WORK_QUEUE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(clamp_work_timeout)
                .unwrap_or(WORK_QUEUE_TIMEOUT_SECS),
            inbox_folder: std::env::var("INBOX_FOLDER")
                .unwrap_or_else(|_| INBOX_FOLDER.to_string()),
            needs_review_folder: std::env::var("NEEDS_REVIEW_FOLDER")
                .unwrap_or_else(|_| NEEDS_REVIEW_FOLDER.to_string()),
            enabled: std::env::var("POLLER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms.max(1);
        self
    }

    pub fn with_work_timeout(mut self, secs: u64) -> Self {
        self.work_timeout_secs = clamp_work_timeout(secs);
        self
    }

    pub fn with_inbox_folder(mut self, folder: impl Into<String>) -> Self {
        self.inbox_folder = folder.into();
        self
    }

    pub fn with_needs_review_folder(mut self, folder: impl Into<String>) -> Self {
        self.needs_review_folder = folder.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Reclaim window bounded to `1..=MAX_WORK_QUEUE_TIMEOUT_SECS`.
fn clamp_work_timeout(secs: u64) -> u64 {
    secs.clamp(1, MAX_WORK_QUEUE_TIMEOUT_SECS)
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Claims that timed out and were moved to needs review.
    pub reclaimed: Vec<EntryId>,
    /// Non-documents moved to needs review without a claim.
    pub rejected: Vec<EntryId>,
    /// Newly claimed and queued entries.
    pub claimed: Vec<EntryId>,
    /// Entries still claimed from an earlier tick.
    pub in_flight: usize,
}

/// Move an archive entry to the needs-review folder, logging failures.
///
/// Returns whether the entry was moved. An entry that no longer exists
/// counts as handled.
pub(crate) async fn move_to_review(
    archive: &dyn DocumentStore,
    entry_id: EntryId,
    folder: &str,
) -> bool {
    match archive.move_entry(entry_id, folder).await {
        Ok(()) => true,
        Err(e) if e.is_not_found() => {
            debug!(%entry_id, "Entry already gone, nothing to move");
            true
        }
        Err(e) => {
            warn!(%entry_id, error = %e, folder, "Failed to move entry to needs review");
            false
        }
    }
}

/// Handle for a running poller.
pub struct PollerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl PollerHandle {
    /// Stop polling after the current tick.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }
}

/// Polls the archive inbox and feeds the dispatcher.
pub struct WorkQueuePoller {
    archive: Arc<dyn DocumentStore>,
    queue: Arc<WorkQueue>,
    submitter: JobSubmitter,
    config: PollerConfig,
}

impl WorkQueuePoller {
    pub fn new(
        archive: Arc<dyn DocumentStore>,
        queue: Arc<WorkQueue>,
        submitter: JobSubmitter,
        config: PollerConfig,
    ) -> Self {
        Self {
            archive,
            queue,
            submitter,
            config,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run one poll cycle.
    #[instrument(skip(self), fields(subsystem = "poller", op = "tick"))]
    pub async fn tick(&self) -> Result<PollSummary> {
        let mut summary = PollSummary::default();

        let timeout = chrono::Duration::seconds(self.config.work_timeout_secs as i64);
        for entry_id in self.queue.take_expired(timeout) {
            warn!(
                %entry_id,
                timeout_secs = self.config.work_timeout_secs,
                "Archive work never completed, moving to needs review"
            );
            move_to_review(
                self.archive.as_ref(),
                entry_id,
                &self.config.needs_review_folder,
            )
            .await;
            summary.reclaimed.push(entry_id);
        }

        let entries = self.archive.browse_folder(&self.config.inbox_folder).await?;
        for entry in entries {
            let entry_id = entry.entry_id;
            if self.queue.is_claimed(entry_id) {
                summary.in_flight += 1;
                continue;
            }

            if !entry.is_document() {
                warn!(
                    %entry_id,
                    name = %entry.name,
                    entry_type = ?entry.entry_type,
                    "Inbox entry is not a document, moving to needs review"
                );
                move_to_review(
                    self.archive.as_ref(),
                    entry_id,
                    &self.config.needs_review_folder,
                )
                .await;
                summary.rejected.push(entry_id);
                continue;
            }

            if !self.queue.claim(entry_id) {
                summary.in_flight += 1;
                continue;
            }
            let payload = JobPayload::ArchiveWork(ArchiveWork { entry });
            if let Err(e) = self.submitter.submit(payload).await {
                self.queue.release(entry_id);
                return Err(e);
            }
            info!(%entry_id, "Claimed archive entry");
            summary.claimed.push(entry_id);
        }

        debug!(
            reclaimed = summary.reclaimed.len(),
            rejected = summary.rejected.len(),
            claimed = summary.claimed.len(),
            in_flight = summary.in_flight,
            "Polled archive inbox"
        );
        Ok(summary)
    }

    /// Start polling on the configured interval.
    pub fn start(self) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(self.run(shutdown_rx));
        PollerHandle { shutdown_tx }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Archive poller is disabled, not starting");
            return;
        }

        info!(
            inbox = %self.config.inbox_folder,
            poll_interval_ms = self.config.poll_interval_ms,
            work_timeout_secs = self.config.work_timeout_secs,
            "Archive poller started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Archive poller received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Archive poll failed");
                    }
                }
            }
        }

        info!("Archive poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_config_default() {
        let config = PollerConfig::default();
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.work_timeout_secs, 100);
        assert_eq!(config.inbox_folder, "/_Trellis_Automation");
        assert_eq!(config.needs_review_folder, "/_NeedsReview");
        assert!(config.enabled);
    }

    #[test]
    fn test_poller_config_builder() {
        let config = PollerConfig::default()
            .with_poll_interval(0)
            .with_work_timeout(5)
            .with_inbox_folder("/in")
            .with_needs_review_folder("/review")
            .with_enabled(false);
        assert_eq!(config.poll_interval_ms, 1);
        assert_eq!(config.work_timeout_secs, 5);
        assert_eq!(config.inbox_folder, "/in");
        assert_eq!(config.needs_review_folder, "/review");
        assert!(!config.enabled);
    }

    #[test]
    fn test_work_timeout_is_bounded() {
        let config = PollerConfig::default().with_work_timeout(u64::MAX);
        assert_eq!(config.work_timeout_secs, MAX_WORK_QUEUE_TIMEOUT_SECS);
        let config = PollerConfig::default().with_work_timeout(0);
        assert_eq!(config.work_timeout_secs, 1);
    }
}
