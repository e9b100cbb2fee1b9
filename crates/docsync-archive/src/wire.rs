//! Request and response bodies of the archive REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use docsync_core::{ArchiveEntry, ArchiveField, EntryId, EntryType, FieldMap, FieldValue};

use crate::paths;

/// Token issued by the login endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Login payload, sent base64 encoded as basic credentials.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginCredentials<'a> {
    pub repository_name: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<&'a str>,
}

/// One field as the archive sends and accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_multi: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<JsonValue>>,
}

impl WireField {
    pub fn to_field_value(&self) -> FieldValue {
        match (&self.values, self.is_multi) {
            (Some(values), _) => FieldValue::Multi(values.iter().map(scalar).collect()),
            (None, Some(true)) => FieldValue::Multi(
                self.value.iter().map(scalar).filter(|v| !v.is_empty()).collect(),
            ),
            (None, _) => FieldValue::Single(self.value.as_ref().map(scalar).unwrap_or_default()),
        }
    }
}

fn scalar(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Field list for a write request.
pub fn to_field_list(fields: &FieldMap) -> Vec<WireField> {
    fields
        .iter()
        .map(|(name, value)| match value {
            FieldValue::Single(v) => WireField {
                name: name.clone(),
                is_multi: None,
                value: Some(JsonValue::String(v.clone())),
                values: None,
            },
            FieldValue::Multi(vs) => WireField {
                name: name.clone(),
                is_multi: None,
                value: None,
                values: Some(vs.iter().cloned().map(JsonValue::String).collect()),
            },
        })
        .collect()
}

/// Field list as a map, keeping only fields with a value.
pub fn to_field_map(fields: &[WireField]) -> FieldMap {
    fields
        .iter()
        .map(|f| (f.name.clone(), f.to_field_value()))
        .filter(|(_, v)| !v.is_empty())
        .collect()
}

/// Entry as returned by retrieve and browse.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireEntry {
    #[serde(alias = "LaserficheEntryID")]
    pub entry_id: u64,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "Type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub field_data_list: Vec<WireField>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub electronic_document_size: Option<u64>,
}

impl WireEntry {
    /// Convert to the domain entry, making `path` the base-relative parent.
    pub fn into_entry(self, base: &str) -> ArchiveEntry {
        let path = paths::parent_folder(base, &self.path, &self.name);
        ArchiveEntry {
            entry_id: EntryId(self.entry_id),
            entry_type: self.entry_type,
            fields: self
                .field_data_list
                .iter()
                .map(|f| ArchiveField {
                    name: f.name.clone(),
                    value: f.to_field_value(),
                })
                .collect(),
            name: self.name,
            path,
            template_name: self.template_name.filter(|t| !t.is_empty()),
            mime_type: self.mime_type.filter(|m| !m.is_empty()),
            size: self.electronic_document_size,
        }
    }
}

/// `GetMetadata` response.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataResponse {
    #[serde(rename = "TemplateName", default)]
    pub template_name: Option<String>,
    #[serde(rename = "LaserficheFieldList", default)]
    pub fields: Vec<WireField>,
}

/// `CreateDocument` multipart `Parameters` part.
#[derive(Debug, Clone, Serialize)]
pub struct CreateDocumentParameters {
    #[serde(rename = "LaserficheFolderPath")]
    pub folder_path: String,
    #[serde(rename = "LaserficheDocumentName")]
    pub document_name: String,
    #[serde(rename = "LaserficheVolumeName")]
    pub volume_name: String,
    #[serde(rename = "LaserficheTemplateName", skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(rename = "LaserficheFieldList", skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<WireField>>,
}

/// Response carrying a new entry id.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedEntry {
    #[serde(rename = "LaserficheEntryID", alias = "LaserficheEntryId")]
    pub entry_id: u64,
}

/// `SetMetadata` body.
#[derive(Debug, Clone, Serialize)]
pub struct SetMetadataRequest {
    #[serde(rename = "LaserficheEntryId")]
    pub entry_id: u64,
    #[serde(rename = "LaserficheTemplateName", skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(rename = "LaserficheFieldList")]
    pub fields: Vec<WireField>,
}

/// `Entry/Move` body. A `Name` renames the entry while moving it.
#[derive(Debug, Clone, Serialize)]
pub struct MoveRequest {
    #[serde(rename = "LaserficheEntryID")]
    pub entry_id: u64,
    #[serde(rename = "DestinationParentPath")]
    pub destination: String,
    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
