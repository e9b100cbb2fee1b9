//! docsync worker.
//!
//! Watches trading-partner documents in the registry and files them into the
//! archive, and polls the archive inbox for documents to import or refile.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docsync_archive::ArchiveClient;
use docsync_core::defaults::SHUTDOWN_GRACE_SECS;
use docsync_core::{DocumentStore, FilingConfig, SystemClock};
use docsync_jobs::{
    ArchiveWorkHandler, ChangeWatcher, DispatcherBuilder, DispatcherConfig, DispatcherEvent,
    PollerConfig, Subscription, SyncDocumentHandler, SyncOrchestrator, TransformerRegistry,
    WatcherConfig, WorkQueue, WorkQueuePoller,
};
use docsync_registry::{HttpRegistry, PollingChangeFeed, Registry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "docsync_service=info,docsync_jobs=debug,docsync_registry=info,docsync_archive=info".into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("docsync.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            subscriber
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            subscriber.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            subscriber
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            subscriber.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let shutdown_grace = std::env::var("SHUTDOWN_GRACE_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(SHUTDOWN_GRACE_SECS);

    // Stores
    let clock = Arc::new(SystemClock);
    let registry_store = Arc::new(HttpRegistry::from_env()?);
    info!(domain = %registry_store.config().domain, "Registry client ready");
    let registry = Registry::new(registry_store.clone(), clock.clone());

    let archive_client = ArchiveClient::from_env()?;
    info!(
        api_root = %archive_client.config().api_root,
        base_folder = %archive_client.config().base_folder,
        "Archive client ready"
    );
    let archive: Arc<dyn DocumentStore> = Arc::new(archive_client);

    // Sync
    let queue = Arc::new(WorkQueue::new(clock));
    let transformers = TransformerRegistry::with_defaults();
    info!(content_types = transformers.len(), "Transformers registered");
    let orchestrator = Arc::new(
        SyncOrchestrator::new(
            registry.clone(),
            archive.clone(),
            Arc::new(transformers),
            FilingConfig::from_env(),
        )
        .with_work_queue(queue.clone()),
    );

    // Dispatcher
    let poller_config = PollerConfig::from_env();
    let dispatcher = DispatcherBuilder::new()
        .with_config(DispatcherConfig::from_env())
        .with_handler(SyncDocumentHandler::new(orchestrator.clone()))
        .with_handler(ArchiveWorkHandler::new(
            registry.clone(),
            archive.clone(),
            orchestrator,
            queue.clone(),
            poller_config.needs_review_folder.clone(),
        ))
        .build()
        .await;
    tokio::spawn(log_dispatcher_events(dispatcher.events()));
    let dispatcher = dispatcher.start();
    info!("Job dispatcher started");

    // Producers
    let poller =
        WorkQueuePoller::new(archive, queue, dispatcher.submitter(), poller_config).start();
    let feed = Arc::new(PollingChangeFeed::from_env(registry_store));
    let watcher = ChangeWatcher::new(feed, dispatcher.submitter(), WatcherConfig::from_env())
        .with_subscription(Subscription::trading_partner_documents()?)
        .start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Producers first so nothing new is queued while jobs drain.
    if let Err(e) = watcher.shutdown().await {
        debug!(error = %e, "Change watcher already stopped");
    }
    if let Err(e) = poller.shutdown().await {
        debug!(error = %e, "Archive poller already stopped");
    }

    let mut events = dispatcher.events();
    if let Err(e) = dispatcher.shutdown().await {
        debug!(error = %e, "Job dispatcher already stopped");
        return Ok(());
    }
    let drained = tokio::time::timeout(Duration::from_secs(shutdown_grace), async {
        loop {
            match events.recv().await {
                Ok(DispatcherEvent::DispatcherStopped) | Err(broadcast::error::RecvError::Closed) => {
                    break
                }
                _ => continue,
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            grace_secs = shutdown_grace,
            "Running jobs did not finish in time, exiting"
        );
    }

    info!("docsync stopped");
    Ok(())
}

/// Log dispatcher lifecycle events that handlers do not log themselves.
async fn log_dispatcher_events(mut events: broadcast::Receiver<DispatcherEvent>) {
    loop {
        match events.recv().await {
            Ok(DispatcherEvent::JobQueued { job_id, job_type }) => {
                debug!(%job_id, %job_type, "Job queued");
            }
            Ok(DispatcherEvent::JobProgress {
                job_id,
                percent,
                message,
            }) => {
                debug!(%job_id, percent, message = message.as_deref().unwrap_or(""), "Job progress");
            }
            Ok(DispatcherEvent::DispatcherStopped) => break,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Dispatcher event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
