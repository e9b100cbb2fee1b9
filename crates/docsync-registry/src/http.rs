//! HTTP client for the path-addressed registry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LOCATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use docsync_core::defaults::{
    ORIGIN_MARKER_SUBPATH, REGISTRY_DOMAIN, REGISTRY_REV_HEADER, REGISTRY_SELF_ORIGIN,
    REGISTRY_TIMEOUT_SECS,
};
use docsync_core::{Blob, Error, ResourceStore, Result};

use crate::paths;

/// Configuration for the registry client.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL, e.g. `https://trellis.example.com`.
    pub domain: String,
    /// Bearer token.
    pub token: Option<String>,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Skip TLS verification (self-signed dev deployments).
    pub skip_tls_verify: bool,
    /// Origin stamped on every write; `None` disables stamping.
    pub origin: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            domain: REGISTRY_DOMAIN.to_string(),
            token: None,
            timeout_seconds: REGISTRY_TIMEOUT_SECS,
            skip_tls_verify: false,
            origin: Some(REGISTRY_SELF_ORIGIN.to_string()),
        }
    }
}

impl RegistryConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `REGISTRY_DOMAIN` | `https://localhost` | Registry base URL |
    /// | `REGISTRY_TOKEN` | (none) | Bearer token |
    /// | `REGISTRY_TIMEOUT_SECS` | `30` | Request timeout |
    /// | `REGISTRY_SKIP_TLS_VERIFY` | `false` | Accept invalid certificates |
    /// | `REGISTRY_SELF_ORIGIN` | `docsync` | Origin stamped on every write |
    pub fn from_env() -> Self {
        let domain = std::env::var("REGISTRY_DOMAIN").unwrap_or_else(|_| REGISTRY_DOMAIN.to_string());
        let domain = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain
        } else {
            format!("https://{}", domain)
        };

        Self {
            domain,
            token: std::env::var("REGISTRY_TOKEN").ok(),
            timeout_seconds: std::env::var("REGISTRY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(REGISTRY_TIMEOUT_SECS),
            skip_tls_verify: std::env::var("REGISTRY_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
            origin: Some(
                std::env::var("REGISTRY_SELF_ORIGIN")
                    .unwrap_or_else(|_| REGISTRY_SELF_ORIGIN.to_string()),
            ),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }
}

/// Registry reached over HTTP.
pub struct HttpRegistry {
    client: Client,
    config: RegistryConfig,
}

impl HttpRegistry {
    /// Create a new registry client with the given configuration.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        if config.token.is_none() {
            return Err(Error::Config("REGISTRY_TOKEN is required".into()));
        }

        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_seconds));
        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }
        let client = client_builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(domain = %config.domain, "Initializing registry client");

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(RegistryConfig::from_env())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.domain.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Build a request with authentication.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.client.request(method, self.url(path));
        if let Some(ref token) = self.config.token {
            req = req.bearer_auth(token);
        }
        req
    }

    async fn send(&self, req: RequestBuilder, path: &str) -> Result<Response> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, path, &body))
    }

    /// Record this client's origin against the resource a write landed on.
    ///
    /// The marker carries the revision the marker write itself produces, so a
    /// change feed can tell the resource was last written by this origin when
    /// the marker revision equals the current one. A failed stamp is logged
    /// and the write still succeeds.
    async fn stamp(&self, resp: &Response) {
        let Some(origin) = self.config.origin.as_deref() else {
            return;
        };
        let (Some(location), Some(rev)) = (location(resp), written_rev(resp)) else {
            debug!("Write response has no location or revision, origin not stamped");
            return;
        };
        let resource = paths::resource_id(&location);
        if !resource.starts_with("resources/") {
            return;
        }
        let path = paths::join(&resource, &[ORIGIN_MARKER_SUBPATH]);
        let marker = json!({ "origin": origin, "rev": rev + 1 });
        if let Err(e) = self
            .send(self.request(Method::PUT, &path).json(&marker), &path)
            .await
        {
            warn!(path = %path, error = %e, "Failed to stamp origin marker");
        }
    }
}

/// Map a failed registry response onto the error taxonomy.
pub(crate) fn status_error(status: StatusCode, path: &str, body: &str) -> Error {
    match status.as_u16() {
        404 => Error::NotFound(path.to_string()),
        401 | 403 => Error::Unauthorized(format!("{} {}", status, path)),
        408 | 429 | 500..=599 => Error::Store(format!("{} {}: {}", status, path, body)),
        _ => Error::Registry(format!("{} {}: {}", status, path, body)),
    }
}

#[async_trait]
impl ResourceStore for HttpRegistry {
    async fn get(&self, path: &str) -> Result<JsonValue> {
        debug!(path, "GET");
        let resp = self.send(self.request(Method::GET, path), path).await?;
        Ok(resp.json().await?)
    }

    async fn put(&self, path: &str, body: JsonValue) -> Result<()> {
        debug!(path, "PUT");
        let resp = self
            .send(self.request(Method::PUT, path).json(&body), path)
            .await?;
        self.stamp(&resp).await;
        Ok(())
    }

    async fn post(&self, path: &str, body: JsonValue) -> Result<String> {
        debug!(path, "POST");
        let resp = self
            .send(self.request(Method::POST, path).json(&body), path)
            .await?;
        self.stamp(&resp).await;
        location(&resp)
            .map(|l| l.rsplit('/').next().unwrap_or_default().to_string())
            .ok_or_else(|| Error::Registry(format!("POST {} returned no Content-Location", path)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        debug!(path, "DELETE");
        let resp = self.send(self.request(Method::DELETE, path), path).await?;
        self.stamp(&resp).await;
        Ok(())
    }

    async fn get_blob(&self, path: &str) -> Result<Blob> {
        debug!(path, "GET (binary)");
        let resp = self.send(self.request(Method::GET, path), path).await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = resp.bytes().await?.to_vec();
        Ok(Blob {
            bytes,
            content_type,
        })
    }

    async fn create_resource(&self, content_type: &str, body: JsonValue) -> Result<String> {
        let bytes = serde_json::to_vec(&body)?;
        self.create(content_type, bytes).await
    }

    async fn create_blob(&self, content_type: &str, bytes: Vec<u8>) -> Result<String> {
        self.create(content_type, bytes).await
    }
}

impl HttpRegistry {
    async fn create(&self, content_type: &str, bytes: Vec<u8>) -> Result<String> {
        let req = self
            .request(Method::POST, "/resources")
            .header(CONTENT_TYPE, content_type)
            .body(bytes);
        let resp = self.send(req, "/resources").await?;
        self.stamp(&resp).await;
        let id = location(&resp)
            .map(|l| paths::resource_id(&l))
            .ok_or_else(|| Error::Registry("POST /resources returned no Content-Location".into()))?;
        debug!(%id, content_type, "Created resource");
        Ok(id)
    }
}

fn location(resp: &Response) -> Option<String> {
    resp.headers()
        .get(CONTENT_LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

fn written_rev(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(REGISTRY_REV_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "/x", ""),
            Error::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "/x", ""),
            Error::Unauthorized(_)
        ));
        assert!(status_error(StatusCode::BAD_GATEWAY, "/x", "").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "/x", "").is_retryable());
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "/x", "bad"),
            Error::Registry(_)
        ));
    }

    #[test]
    fn test_new_requires_token() {
        assert!(matches!(
            HttpRegistry::new(RegistryConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_url_building() {
        let registry = HttpRegistry::new(
            RegistryConfig::default()
                .with_domain("https://trellis.example.com/")
                .with_token("t"),
        )
        .unwrap();
        assert_eq!(
            registry.url("/bookmarks/trellisfw"),
            "https://trellis.example.com/bookmarks/trellisfw"
        );
        assert_eq!(
            registry.url("resources/abc"),
            "https://trellis.example.com/resources/abc"
        );
    }
}
