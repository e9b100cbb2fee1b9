//! # docsync-archive
//!
//! Archive access for docsync.
//!
//! This crate provides:
//! - [`ArchiveClient`], a [`DocumentStore`](docsync_core::DocumentStore) over
//!   the archive REST API with transparent token refresh
//! - Wire types for the REST API
//! - Conversion between base-relative paths and archive paths
//! - [`MockArchive`], a recording in-memory archive for tests

pub mod client;
pub mod config;
pub mod mock;
pub mod paths;
pub mod wire;

pub use client::ArchiveClient;
pub use config::ArchiveConfig;
pub use mock::{MockArchive, MockCall, MockOp};
