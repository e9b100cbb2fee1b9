//! # docsync-jobs
//!
//! Background work for docsync.
//!
//! This crate provides:
//! - A bounded-concurrency job dispatcher with retry and timeouts
//! - The sync orchestrator (registry -> archive)
//! - Ingestion of unknown archive documents (archive -> registry)
//! - The archive inbox work queue and its poller
//! - The registry change watcher
//! - Per-content-type field transformers
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use docsync_jobs::{
//!     DispatcherBuilder, DispatcherConfig, SyncDocumentHandler, SyncOrchestrator,
//!     TransformerRegistry,
//! };
//!
//! let orchestrator = Arc::new(SyncOrchestrator::new(
//!     registry,
//!     archive,
//!     Arc::new(TransformerRegistry::with_defaults()),
//!     FilingConfig::from_env(),
//! ));
//!
//! let dispatcher = DispatcherBuilder::new()
//!     .with_config(DispatcherConfig::from_env())
//!     .with_handler(SyncDocumentHandler::new(orchestrator))
//!     .build()
//!     .await;
//!
//! let handle = dispatcher.start();
//! handle.submitter().submit(JobPayload::SyncDocument(SyncRequest::new("resources/abc"))).await?;
//! handle.shutdown().await?;
//! ```

pub mod dispatcher;
pub mod handler;
pub mod ingest;
pub mod poller;
pub mod sync;
pub mod transformers;
pub mod watcher;
pub mod work_queue;

// Re-export core types
pub use docsync_core::*;

pub use dispatcher::{
    compute_retry_backoff_seconds, DispatcherBuilder, DispatcherConfig, DispatcherEvent,
    DispatcherHandle, JobDispatcher, JobSubmitter,
};
pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use ingest::{content_hash, ArchiveIngestor, ArchiveWorkHandler, Ingested};
pub use poller::{PollSummary, PollerConfig, PollerHandle, WorkQueuePoller};
pub use sync::{SyncDocumentHandler, SyncOrchestrator};
pub use transformers::{
    CertificateTransformer, GenericTransformer, TicketTransformer, TransformerRegistry,
};
pub use watcher::{ChangeWatcher, Subscription, WatcherConfig, WatcherHandle};
pub use work_queue::WorkQueue;
