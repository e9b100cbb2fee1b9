use serde_json::Value as JsonValue;

use docsync_core::defaults::FIELD_DOCUMENT_TYPE;
use docsync_core::{Document, FieldMap, FieldValue, Result, Transformer};

use super::{format_date, scalar};

/// Registry key -> archive field.
const FIELD_MAPPINGS: &[(&str, &str)] = &[
    ("adjustment_date", "Adjustment Date"),
    ("expire_date", "Expiration Date"),
    ("audit_date", "Audit Date"),
    ("certifying_body", "Certifying Body"),
    ("effective_date", "Effective Date"),
    ("score", "Grade Score"),
    ("initial_term_date", "Initial Term Date"),
    ("is_paaco_certified", "PAACO Certified"),
    ("document_date", "Document Date"),
    ("auditor", "Auditor Name"),
    ("issue_date", "Issue Date"),
];

/// Registry list key -> multi-valued archive field of item names.
const LIST_MAPPINGS: &[(&str, &str)] = &[("products", "Products"), ("locations", "Locations")];

/// Field derivation shared by most trellis document types.
#[derive(Debug, Clone)]
pub struct GenericTransformer {
    document_type: String,
}

impl GenericTransformer {
    pub fn new(document_type: impl Into<String>) -> Self {
        Self {
            document_type: document_type.into(),
        }
    }
}

impl Transformer for GenericTransformer {
    fn document_type(&self) -> &str {
        &self.document_type
    }

    fn document_fields(&self, document: &Document) -> Result<FieldMap> {
        let body = &document.body;
        let mut fields = FieldMap::new();
        fields.insert(
            FIELD_DOCUMENT_TYPE.to_string(),
            FieldValue::from(self.document_type.as_str()),
        );

        for (key, label) in FIELD_MAPPINGS {
            let Some(value) = body.get(*key).and_then(scalar) else {
                continue;
            };
            let value = if label.contains("Date") {
                format_date(&value)
            } else {
                value
            };
            fields.insert(label.to_string(), FieldValue::Single(value));
        }

        for (key, label) in LIST_MAPPINGS {
            let names: Vec<String> = body
                .get(*key)
                .map(item_names)
                .unwrap_or_default();
            if !names.is_empty() {
                fields.insert(label.to_string(), FieldValue::Multi(names));
            }
        }

        Ok(fields)
    }
}

/// `name` of each item in a list (or keyed object) of items.
fn item_names(value: &JsonValue) -> Vec<String> {
    let items: Vec<&JsonValue> = match value {
        JsonValue::Array(items) => items.iter().collect(),
        JsonValue::Object(obj) => obj
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(_, v)| v)
            .collect(),
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| item.get("name").and_then(JsonValue::as_str))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
