//! Error types for docsync.

use thiserror::Error;

use crate::models::EntryId;

/// Result type alias using docsync's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for docsync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found in either store
    #[error("Not found: {0}")]
    NotFound(String),

    /// No transformer registered for a document content type
    #[error("Unknown document type: {0}")]
    UnknownDocumentType(String),

    /// Transient store failure (network, 5xx, auth refresh)
    #[error("Store error: {0}")]
    Store(String),

    /// The archive lost an entry we have recorded
    #[error("Archive entry {0} no longer exists")]
    StaleArchiveEntry(EntryId),

    /// Sync of one document failed
    #[error("Sync of document {document_id} failed: {source}")]
    Sync {
        document_id: String,
        #[source]
        source: Box<Error>,
    },

    /// Registry rejected a request
    #[error("Registry error: {0}")]
    Registry(String),

    /// Archive rejected a request
    #[error("Archive error: {0}")]
    Archive(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an error as the failure of one document sync.
    pub fn sync(document_id: impl Into<String>, source: Error) -> Self {
        Error::Sync {
            document_id: document_id.into(),
            source: Box::new(source),
        }
    }

    /// Absence of the addressed resource, possibly wrapped.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) | Error::StaleArchiveEntry(_) => true,
            Error::Sync { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(_) | Error::Request(_) | Error::Unauthorized(_) | Error::Io(_) => true,
            Error::Sync { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::Store(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("resources/abc".to_string());
        assert_eq!(err.to_string(), "Not found: resources/abc");
    }

    #[test]
    fn test_error_display_unknown_document_type() {
        let err = Error::UnknownDocumentType("application/json".to_string());
        assert_eq!(err.to_string(), "Unknown document type: application/json");
    }

    #[test]
    fn test_error_display_stale_entry() {
        let err = Error::StaleArchiveEntry(EntryId(42));
        assert_eq!(err.to_string(), "Archive entry 42 no longer exists");
    }

    #[test]
    fn test_error_display_sync() {
        let err = Error::sync("resources/doc1", Error::Store("502".into()));
        assert_eq!(
            err.to_string(),
            "Sync of document resources/doc1 failed: Store error: 502"
        );
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing CWS_REPO".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing CWS_REPO");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_not_found_classification() {
        assert!(Error::NotFound("x".into()).is_not_found());
        assert!(Error::StaleArchiveEntry(EntryId(1)).is_not_found());
        assert!(Error::sync("d", Error::NotFound("x".into())).is_not_found());
        assert!(!Error::Store("x".into()).is_not_found());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Store("timeout".into()).is_retryable());
        assert!(Error::Unauthorized("expired".into()).is_retryable());
        assert!(Error::sync("d", Error::Store("500".into())).is_retryable());
        assert!(!Error::Registry("400".into()).is_retryable());
        assert!(!Error::Archive("400".into()).is_retryable());
        assert!(!Error::UnknownDocumentType("x".into()).is_retryable());
        assert!(!Error::InvalidInput("x".into()).is_retryable());
        assert!(!Error::sync("d", Error::UnknownDocumentType("x".into())).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }
}
