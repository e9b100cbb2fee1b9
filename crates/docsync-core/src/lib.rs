//! # docsync-core
//!
//! Core types, traits, and rules for keeping the registry and the archive in
//! sync.
//!
//! This crate provides:
//! - Domain models (fields, sync state, archive entries, jobs)
//! - The error taxonomy shared by every crate
//! - Traits for the archive, the registry, change feeds and transformers
//! - Field reconciliation and the filing workflow (pure, no I/O)

pub mod defaults;
pub mod error;
pub mod filing;
pub mod models;
pub mod pattern;
pub mod reconcile;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use filing::{file, parse_date, FilingConfig};
pub use models::*;
pub use pattern::{Captures, PathPattern, Segment};
pub use reconcile::{is_unfileable, reconcile, recorded_fields};
pub use traits::*;
