//! Deterministic filing location for archive documents.
//!
//! Layout: `<root>/<Entity>/<Share Mode>/<Document Type>`, plus
//! `<YYYY-MM>/Ticket<id>` for tickets.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::defaults::{
    FIELD_COMMENT_NUMBER, FIELD_DOCUMENT_DATE, FIELD_DOCUMENT_TYPE, FIELD_ENTITY,
    FIELD_EXPIRATION_DATE, FIELD_LOCATIONS, FIELD_ORIGINAL_FILENAME, FIELD_PRODUCTS,
    FIELD_SHARE_MODE, FIELD_TICKET_ID, FILING_ROOT, MULTI_LOCATION_TOKEN, MULTI_PRODUCT_TOKEN,
    TICKET_DOCUMENT_TYPE,
};
use crate::error::{Error, Result};
use crate::models::{FieldMap, Filing};

/// Filing workflow configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingConfig {
    /// Folder all filed documents live under.
    pub root: String,
}

impl Default for FilingConfig {
    fn default() -> Self {
        Self {
            root: FILING_ROOT.to_string(),
        }
    }
}

impl FilingConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FILING_ROOT` | `/trellis/trading-partners` |
    pub fn from_env() -> Self {
        Self {
            root: std::env::var("FILING_ROOT").unwrap_or_else(|_| FILING_ROOT.to_string()),
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }
}

/// Compute the archive folder and filename for a merged field set.
///
/// Pure: equal field maps always produce equal results. Fails with
/// [`Error::InvalidInput`] when Entity, Share Mode or Document Type is
/// missing, or a ticket lacks its id or a parseable date. Callers treat that
/// like an empty field set and leave the attachment for a later run.
pub fn file(fields: &FieldMap, config: &FilingConfig) -> Result<Filing> {
    let entity = required(fields, FIELD_ENTITY)?;
    let share_mode = required(fields, FIELD_SHARE_MODE)?;
    let document_type = required(fields, FIELD_DOCUMENT_TYPE)?;

    let mut segments = vec![
        segment(entity),
        segment(share_mode),
        segment(document_type),
    ];

    let filename = if document_type == TICKET_DOCUMENT_TYPE {
        let ticket_id = required(fields, FIELD_TICKET_ID)?;
        let raw_date = required(fields, FIELD_DOCUMENT_DATE)?;
        let date = parse_date(raw_date).ok_or_else(|| {
            Error::InvalidInput(format!("Unparseable {}: {}", FIELD_DOCUMENT_DATE, raw_date))
        })?;
        segments.push(date.format("%Y-%m").to_string());
        segments.push(format!("Ticket{}", segment(ticket_id)));

        let mut parts = vec![format!("[Ticket{}]", segment(ticket_id))];
        if let Some(comment) = optional(fields, FIELD_COMMENT_NUMBER) {
            parts.push(format!("[Comment{}]", segment(comment)));
        }
        if let Some(original) = optional(fields, FIELD_ORIGINAL_FILENAME) {
            parts.push(segment(original));
        }
        parts.join("_")
    } else {
        let mut tokens = vec![segment(document_type), segment(entity)];
        if let Some(expiration) = optional(fields, FIELD_EXPIRATION_DATE) {
            let date = parse_date(expiration)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| segment(expiration));
            tokens.push(format!("EXP_{}", date));
        }
        if let Some(token) = multi_token(fields, FIELD_LOCATIONS, MULTI_LOCATION_TOKEN) {
            tokens.push(token);
        }
        if let Some(token) = multi_token(fields, FIELD_PRODUCTS, MULTI_PRODUCT_TOKEN) {
            tokens.push(token);
        }
        tokens.iter().map(|t| format!("[{}]", t)).collect()
    };

    Ok(Filing {
        path: join_path(&config.root, &segments),
        filename,
    })
}

/// Parse the date formats found in registry documents and archive fields.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(value, "%m/%d/%Y").ok()
}

fn required<'a>(fields: &'a FieldMap, name: &str) -> Result<&'a str> {
    optional(fields, name)
        .ok_or_else(|| Error::InvalidInput(format!("Missing field required for filing: {}", name)))
}

fn optional<'a>(fields: &'a FieldMap, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(|v| v.first()).map(str::trim)
}

fn multi_token(fields: &FieldMap, name: &str, multi: &str) -> Option<String> {
    let values = fields.get(name)?.values();
    match values.as_slice() {
        [] => None,
        [single] => Some(segment(single)),
        _ => Some(multi.to_string()),
    }
}

/// Folder separators inside a value would change the layout.
fn segment(value: &str) -> String {
    value.trim().replace(['/', '\\'], "-")
}

fn join_path(root: &str, segments: &[String]) -> String {
    let root = root.trim_end_matches('/');
    let mut path = if root.starts_with('/') {
        root.to_string()
    } else {
        format!("/{}", root)
    };
    for s in segments {
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(s);
    }
    path
}
