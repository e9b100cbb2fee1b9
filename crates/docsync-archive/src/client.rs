//! REST client for the archive.
//!
//! Every request carries the current token. A 401 triggers one token refresh
//! and a single retry; concurrent refreshes are serialized so a burst of
//! rejected requests shares one login.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use docsync_core::defaults::ARCHIVE_ENTRY_NOT_FOUND;
use docsync_core::{
    ArchiveEntry, CreateDocumentRequest, DocumentStore, EntryId, Error, FieldMap, Result,
};

use crate::config::ArchiveConfig;
use crate::paths;
use crate::wire::{
    to_field_list, to_field_map, CreateDocumentParameters, CreatedEntry, LoginCredentials,
    LoginResponse, MetadataResponse, MoveRequest, SetMetadataRequest, WireEntry,
};

/// Archive reached over its REST API.
pub struct ArchiveClient {
    client: Client,
    config: ArchiveConfig,
    /// Full `Authorization` header value.
    token: RwLock<Option<String>>,
    refresh: Mutex<()>,
}

impl ArchiveClient {
    /// Create a new archive client with the given configuration.
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        if config.token.is_none() && !config.has_login() {
            return Err(Error::Config(
                "CWS_TOKEN or CWS_USER/CWS_PASSWORD is required".into(),
            ));
        }

        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_seconds));
        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }
        let client = client_builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            api_root = %config.api_root,
            repository = %config.repository,
            base_folder = %config.base_folder,
            "Initializing archive client"
        );

        let token = config.token.as_deref().map(authorization_value);
        Ok(Self {
            client,
            config,
            token: RwLock::new(token),
            refresh: Mutex::new(()),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ArchiveConfig::from_env())
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_root.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.client.request(method, self.url(endpoint))
    }

    fn archive_path(&self, path: &str) -> String {
        paths::to_archive(&self.config.base_folder, path)
    }

    /// Log in with the configured credentials.
    async fn login(&self) -> Result<String> {
        let (Some(username), Some(password)) =
            (self.config.username.as_deref(), self.config.password.as_deref())
        else {
            return Err(Error::Unauthorized(
                "archive token rejected and no login configured".into(),
            ));
        };
        let credentials = LoginCredentials {
            repository_name: &self.config.repository,
            username,
            password,
            server_name: self.config.server_name.as_deref(),
        };
        let encoded = BASE64.encode(serde_json::to_vec(&credentials)?);

        let resp = self
            .request(Method::POST, "api/ConnectionToLaserfiche")
            .header(AUTHORIZATION, format!("basic {}", encoded))
            .form(&[("grant_type", "password")])
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(match status_error(status, "login", &body) {
                Error::Archive(msg) => Error::Unauthorized(msg),
                other => other,
            });
        }
        let login: LoginResponse = resp.json().await?;
        info!("Logged into archive");
        Ok(format!("{} {}", login.token_type, login.access_token))
    }

    async fn authorization(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.refresh_token(None).await
    }

    /// Replace `stale` with a fresh token unless another request already did.
    async fn refresh_token(&self, stale: Option<&str>) -> Result<String> {
        let _guard = self.refresh.lock().await;
        if let Some(current) = self.token.read().await.clone() {
            if Some(current.as_str()) != stale {
                return Ok(current);
            }
        }
        let token = self.login().await?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    /// Send a request, refreshing the token once on 401.
    async fn execute<F>(&self, what: &str, build: F) -> Result<Response>
    where
        F: Fn() -> Result<RequestBuilder> + Send + Sync,
    {
        let auth = self.authorization().await?;
        let resp = build()?.header(AUTHORIZATION, &auth).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check(resp, what).await;
        }

        warn!(what, "Archive token rejected, refreshing");
        let auth = self.refresh_token(Some(&auth)).await?;
        let resp = build()?.header(AUTHORIZATION, &auth).send().await?;
        check(resp, what).await
    }

    async fn execute_json<T, F>(&self, what: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned + Send,
        F: Fn() -> Result<RequestBuilder> + Send + Sync,
    {
        let resp = self.execute(what, build).await?;
        Ok(resp.json().await?)
    }
}

fn authorization_value(token: &str) -> String {
    if token.contains(' ') {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

async fn check(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, what, &body))
}

/// Map a failed archive response onto the error taxonomy.
pub(crate) fn status_error(status: StatusCode, what: &str, body: &str) -> Error {
    if status == StatusCode::NOT_FOUND || body.contains(ARCHIVE_ENTRY_NOT_FOUND) {
        return Error::NotFound(what.to_string());
    }
    match status.as_u16() {
        401 | 403 => Error::Unauthorized(format!("{} {}", status, what)),
        408 | 429 | 500..=599 => Error::Store(format!("{} {}: {}", status, what, body)),
        _ => Error::Archive(format!("{} {}: {}", status, what, body)),
    }
}

#[async_trait]
impl DocumentStore for ArchiveClient {
    #[instrument(skip(self, req), fields(subsystem = "archive", op = "create_document", path = %req.path, name = %req.name, size = req.content.len()))]
    async fn create_document(&self, req: CreateDocumentRequest) -> Result<EntryId> {
        let parameters = CreateDocumentParameters {
            folder_path: self.archive_path(&req.path),
            document_name: req.name.clone(),
            volume_name: self.config.volume.clone(),
            template_name: req.template_name.clone(),
            fields: (!req.fields.is_empty()).then(|| to_field_list(&req.fields)),
        };
        let parameters = serde_json::to_string(&parameters)?;

        let created: CreatedEntry = self
            .execute_json("CreateDocument", || {
                let file = Part::bytes(req.content.clone())
                    .file_name(req.name.clone())
                    .mime_str(&req.mime_type)?;
                let form = Form::new()
                    .text("Parameters", parameters.clone())
                    .part("File", file);
                Ok(self
                    .request(Method::POST, "api/CreateDocument")
                    .multipart(form))
            })
            .await?;
        let entry_id = EntryId(created.entry_id);
        debug!(%entry_id, "Created archive document");
        Ok(entry_id)
    }

    #[instrument(skip(self, fields), fields(subsystem = "archive", op = "set_metadata", field_count = fields.len()))]
    async fn set_metadata(
        &self,
        entry_id: EntryId,
        fields: &FieldMap,
        template_name: Option<&str>,
    ) -> Result<()> {
        let body = SetMetadataRequest {
            entry_id: entry_id.0,
            template_name: template_name.map(String::from),
            fields: to_field_list(fields),
        };
        let what = format!("SetMetadata {}", entry_id);
        match self
            .execute(&what, || {
                Ok(self.request(Method::POST, "api/SetMetadata").json(&body))
            })
            .await
        {
            Err(e) if e.is_not_found() => Err(Error::StaleArchiveEntry(entry_id)),
            other => other.map(|_| ()),
        }
    }

    #[instrument(skip(self), fields(subsystem = "archive", op = "move_entry"))]
    async fn move_entry(&self, entry_id: EntryId, path: &str) -> Result<()> {
        let body = MoveRequest {
            entry_id: entry_id.0,
            destination: self.archive_path(path),
            name: None,
        };
        self.execute(&format!("Move {}", entry_id), || {
            Ok(self.request(Method::PUT, "api/Entry/Move").json(&body))
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = "archive", op = "rename_entry"))]
    async fn rename_entry(&self, entry_id: EntryId, path: &str, name: &str) -> Result<()> {
        let body = MoveRequest {
            entry_id: entry_id.0,
            destination: self.archive_path(path),
            name: Some(name.to_string()),
        };
        self.execute(&format!("Rename {}", entry_id), || {
            Ok(self.request(Method::PUT, "api/Entry/Move").json(&body))
        })
        .await?;
        Ok(())
    }

    async fn retrieve_entry(&self, entry_id: EntryId) -> Result<ArchiveEntry> {
        let endpoint = format!("api/RetrieveEntry/{}", entry_id);
        let wire: WireEntry = self
            .execute_json(&format!("RetrieveEntry {}", entry_id), || {
                Ok(self.request(Method::GET, &endpoint))
            })
            .await?;
        Ok(wire.into_entry(&self.config.base_folder))
    }

    async fn get_metadata(&self, entry_id: EntryId) -> Result<FieldMap> {
        let id = entry_id.to_string();
        let metadata: MetadataResponse = self
            .execute_json(&format!("GetMetadata {}", entry_id), || {
                Ok(self
                    .request(Method::GET, "api/GetMetadata")
                    .query(&[("LaserficheEntryId", id.as_str())]))
            })
            .await?;
        Ok(to_field_map(&metadata.fields))
    }

    #[instrument(skip(self), fields(subsystem = "archive", op = "browse_folder"))]
    async fn browse_folder(&self, path: &str) -> Result<Vec<ArchiveEntry>> {
        let folder = self.archive_path(path);
        let entries: Vec<WireEntry> = self
            .execute_json(&format!("browse {}", path), || {
                Ok(self
                    .request(Method::GET, "api/browse")
                    .query(&[("path", folder.as_str())]))
            })
            .await?;
        debug!(count = entries.len(), "Browsed archive folder");
        Ok(entries
            .into_iter()
            .map(|e| e.into_entry(&self.config.base_folder))
            .collect())
    }

    async fn fetch_content(&self, entry_id: EntryId) -> Result<Vec<u8>> {
        let id = entry_id.to_string();
        let resp = self
            .execute(&format!("RetrieveDocumentContent {}", entry_id), || {
                Ok(self
                    .request(Method::GET, "api/RetrieveDocumentContent")
                    .query(&[("LaserficheEntryId", id.as_str())]))
            })
            .await?;
        Ok(resp.bytes().await?.to_vec())
    }
}
