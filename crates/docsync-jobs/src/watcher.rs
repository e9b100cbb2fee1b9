//! Registry change watcher.
//!
//! Turns registry change notifications into `sync-doc` jobs. Subscriptions
//! are declarative: a path pattern naming the documents to watch and,
//! optionally, a pattern rendering the trading-partner context from the same
//! captures. Changes written by this service itself are dropped here.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use docsync_core::defaults::{REGISTRY_SELF_ORIGIN, TRADING_PARTNERS_PATH};
use docsync_core::{ChangeEvent, ChangeFeed, Error, JobPayload, PathPattern, Result, SyncRequest};

use crate::dispatcher::JobSubmitter;

/// Documents under one watched path template.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub name: String,
    pub pattern: PathPattern,
    /// Rendered from the pattern captures into the request's trading context.
    pub trading_context: Option<PathPattern>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, pattern: PathPattern) -> Self {
        Self {
            name: name.into(),
            pattern,
            trading_context: None,
        }
    }

    pub fn with_trading_context(mut self, context: PathPattern) -> Self {
        self.trading_context = Some(context);
        self
    }

    /// Every document of every trading partner.
    pub fn trading_partner_documents() -> Result<Self> {
        let pattern = PathPattern::parse(&format!(
            "{}/{{partner}}/bookmarks/trellisfw/documents/{{doctype}}/{{document}}",
            TRADING_PARTNERS_PATH
        ))?;
        let context = PathPattern::parse(&format!("{}/{{partner}}", TRADING_PARTNERS_PATH))?;
        Ok(Self::new("trading-partner-documents", pattern).with_trading_context(context))
    }

    /// Sync request for a change under this subscription, if it matches.
    pub fn to_request(&self, event: &ChangeEvent) -> Option<SyncRequest> {
        let captures = self.pattern.matches(&event.path)?;
        let mut request = SyncRequest::new(event.resource_id.clone());
        if let Some(ref context) = self.trading_context {
            match context.render(&captures) {
                Ok(path) => request = request.with_trading_context(path),
                Err(e) => {
                    warn!(subscription = %self.name, error = %e, "Cannot derive trading context");
                    return None;
                }
            }
        }
        Some(request)
    }
}

/// Configuration for the change watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Origin this service stamps on its own registry writes.
    pub self_origin: String,
    pub enabled: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            self_origin: REGISTRY_SELF_ORIGIN.to_string(),
            enabled: true,
        }
    }
}

impl WatcherConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WATCH_ENABLED` | `true` | Enable/disable watching |
    /// | `REGISTRY_SELF_ORIGIN` | `docsync` | Origin of changes to ignore |
    pub fn from_env() -> Self {
        Self {
            self_origin: std::env::var("REGISTRY_SELF_ORIGIN")
                .unwrap_or_else(|_| REGISTRY_SELF_ORIGIN.to_string()),
            enabled: std::env::var("WATCH_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }

    pub fn with_self_origin(mut self, origin: impl Into<String>) -> Self {
        self.self_origin = origin.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Handle for a running watcher.
pub struct WatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl WatcherHandle {
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }
}

/// Feeds registry changes to the dispatcher.
pub struct ChangeWatcher {
    feed: Arc<dyn ChangeFeed>,
    submitter: JobSubmitter,
    subscriptions: Vec<Subscription>,
    config: WatcherConfig,
}

impl ChangeWatcher {
    pub fn new(feed: Arc<dyn ChangeFeed>, submitter: JobSubmitter, config: WatcherConfig) -> Self {
        Self {
            feed,
            submitter,
            subscriptions: Vec::new(),
            config,
        }
    }

    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    /// Whether an event was written by this service.
    pub fn is_self_change(&self, event: &ChangeEvent) -> bool {
        event.origin.as_deref() == Some(self.config.self_origin.as_str())
    }

    /// Queue a sync for one change. Returns the job id, if one was queued.
    pub async fn handle_event(
        &self,
        subscription: &Subscription,
        event: &ChangeEvent,
    ) -> Result<Option<Uuid>> {
        if self.is_self_change(event) {
            trace!(path = %event.path, "Ignoring own change");
            return Ok(None);
        }
        let Some(request) = subscription.to_request(event) else {
            return Ok(None);
        };
        debug!(
            subscription = %subscription.name,
            document_id = %request.document_id,
            trading_context = ?request.trading_context,
            "Document changed"
        );
        let job_id = self
            .submitter
            .submit(JobPayload::SyncDocument(request))
            .await?;
        Ok(Some(job_id))
    }

    pub fn start(self) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(self.run(shutdown_rx));
        WatcherHandle { shutdown_tx }
    }

    #[instrument(skip(self, shutdown_rx), fields(subsystem = "watcher"))]
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Change watcher is disabled, not starting");
            return;
        }

        let mut streams = Vec::with_capacity(self.subscriptions.len());
        for (index, subscription) in self.subscriptions.iter().enumerate() {
            match self.feed.watch(&subscription.pattern).await {
                Ok(changes) => streams.push(changes.map(move |event| (index, event)).boxed()),
                Err(e) => error!(
                    subscription = %subscription.name,
                    error = %e,
                    "Failed to watch subscription"
                ),
            }
        }
        info!(subscriptions = streams.len(), "Change watcher started");
        let mut changes = stream::select_all(streams);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Change watcher received shutdown signal");
                    break;
                }
                next = changes.next() => {
                    let Some((index, event)) = next else {
                        warn!("All change feeds ended");
                        break;
                    };
                    if let Err(e) = self.handle_event(&self.subscriptions[index], &event).await {
                        error!(path = %event.path, error = %e, "Failed to queue sync");
                    }
                }
            }
        }

        info!("Change watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str, origin: Option<&str>) -> ChangeEvent {
        ChangeEvent {
            path: path.to_string(),
            resource_id: "resources/doc1".to_string(),
            origin: origin.map(String::from),
        }
    }

    #[test]
    fn test_trading_partner_subscription_request() {
        let sub = Subscription::trading_partner_documents().unwrap();
        let request = sub
            .to_request(&event(
                "/bookmarks/trellisfw/trading-partners/tp1/bookmarks/trellisfw/documents/cois/doc1",
                None,
            ))
            .unwrap();
        assert_eq!(request.document_id, "resources/doc1");
        assert_eq!(
            request.trading_context.as_deref(),
            Some("/bookmarks/trellisfw/trading-partners/tp1")
        );
    }

    #[test]
    fn test_subscription_ignores_other_paths() {
        let sub = Subscription::trading_partner_documents().unwrap();
        assert!(sub
            .to_request(&event("/bookmarks/trellisfw/trading-partners/tp1", None))
            .is_none());
    }

    #[test]
    fn test_watcher_config_default() {
        let config = WatcherConfig::default();
        assert_eq!(config.self_origin, "docsync");
        assert!(config.enabled);
    }
}
