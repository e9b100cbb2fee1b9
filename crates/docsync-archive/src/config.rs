//! Archive client configuration.

use docsync_core::defaults::{
    ARCHIVE_API_ROOT, ARCHIVE_BASE_FOLDER, ARCHIVE_TIMEOUT_SECS, ARCHIVE_VOLUME,
};

/// Configuration for [`crate::ArchiveClient`].
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// REST root, e.g. `https://archive.example.com/CWSAPI/`.
    pub api_root: String,
    /// Repository to log into.
    pub repository: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub server_name: Option<String>,
    /// Pre-issued token. Skips the initial login when set.
    pub token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Folder every path is relative to.
    pub base_folder: String,
    /// Volume new documents are stored in.
    pub volume: String,
    /// Skip TLS verification (self-signed deployments).
    pub skip_tls_verify: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            api_root: ARCHIVE_API_ROOT.to_string(),
            repository: String::new(),
            username: None,
            password: None,
            server_name: None,
            token: None,
            timeout_seconds: ARCHIVE_TIMEOUT_SECS,
            base_folder: ARCHIVE_BASE_FOLDER.to_string(),
            volume: ARCHIVE_VOLUME.to_string(),
            skip_tls_verify: false,
        }
    }
}

impl ArchiveConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CWS_API` | `http://localhost/CWSAPI/` | REST root |
    /// | `CWS_REPO` | (empty) | Repository name |
    /// | `CWS_USER` | (none) | Login user |
    /// | `CWS_PASSWORD` | (none) | Login password |
    /// | `CWS_SERVER` | (none) | Archive server name |
    /// | `CWS_TOKEN` | (none) | Pre-issued token |
    /// | `CWS_TIMEOUT_SECS` | `60` | Request timeout |
    /// | `CWS_VOLUME` | `Default` | Volume for new documents |
    /// | `CWS_SKIP_TLS_VERIFY` | `false` | Accept invalid certificates |
    /// | `ARCHIVE_BASE_FOLDER` | `/FSQA` | Base folder |
    pub fn from_env() -> Self {
        Self {
            api_root: std::env::var("CWS_API").unwrap_or_else(|_| ARCHIVE_API_ROOT.to_string()),
            repository: std::env::var("CWS_REPO").unwrap_or_default(),
            username: std::env::var("CWS_USER").ok(),
            password: std::env::var("CWS_PASSWORD").ok(),
            server_name: std::env::var("CWS_SERVER").ok(),
            token: std::env::var("CWS_TOKEN").ok().filter(|t| !t.is_empty()),
            timeout_seconds: std::env::var("CWS_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(ARCHIVE_TIMEOUT_SECS),
            base_folder: std::env::var("ARCHIVE_BASE_FOLDER")
                .unwrap_or_else(|_| ARCHIVE_BASE_FOLDER.to_string()),
            volume: std::env::var("CWS_VOLUME").unwrap_or_else(|_| ARCHIVE_VOLUME.to_string()),
            skip_tls_verify: std::env::var("CWS_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        }
    }

    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self
    }

    pub fn with_login(
        mut self,
        repository: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.repository = repository.into();
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_base_folder(mut self, base_folder: impl Into<String>) -> Self {
        self.base_folder = base_folder.into();
        self
    }

    /// Whether the client can log in on its own.
    pub fn has_login(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}
