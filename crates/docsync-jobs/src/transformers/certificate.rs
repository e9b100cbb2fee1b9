use std::collections::HashMap;

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use docsync_core::defaults::{FIELD_DOCUMENT_DATE, FIELD_DOCUMENT_TYPE, FIELD_EXPIRATION_DATE};
use docsync_core::{parse_date, Document, Error, FieldMap, FieldValue, Result, Transformer};

use super::scalar;

const DOCUMENT_TYPE: &str = "Certificate of Insurance";

/// Policy type, limit key, archive field.
const POLICY_LIMITS: &[(&str, &str, &str)] = &[
    (
        "Commercial General Liability",
        "general_aggregate",
        "General Liability",
    ),
    (
        "Automobile Liability",
        "combined_single_limit",
        "Automotive Liability",
    ),
    (
        "Employers' Liability",
        "el_each_accident",
        "Workers Comp and Employers Liability",
    ),
];

/// Certificates of insurance.
///
/// Dated by the latest policy effective date; expires with the latest
/// policy expiration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateTransformer;

impl Transformer for CertificateTransformer {
    fn document_type(&self) -> &str {
        DOCUMENT_TYPE
    }

    fn document_fields(&self, document: &Document) -> Result<FieldMap> {
        let body = &document.body;
        let policies: HashMap<&str, &JsonValue> = match body.get("policies") {
            Some(JsonValue::Object(obj)) => obj
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .filter_map(|(_, p)| Some((p.get("type")?.as_str()?, p)))
                .collect(),
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|p| Some((p.get("type")?.as_str()?, p)))
                .collect(),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Certificate {} has no policies",
                    document.id
                )))
            }
        };

        let mut fields = FieldMap::new();
        fields.insert(
            FIELD_DOCUMENT_TYPE.to_string(),
            FieldValue::from(DOCUMENT_TYPE),
        );
        if let Some(date) = latest(policies.values().copied(), "effective_date") {
            fields.insert(FIELD_DOCUMENT_DATE.to_string(), day(date));
        }
        if let Some(date) = latest(policies.values().copied(), "expire_date") {
            fields.insert(FIELD_EXPIRATION_DATE.to_string(), day(date));
        }

        for (key, label) in [
            ("producer", "Insurance Producer"),
            ("insured", "Insured Company"),
            ("holder", "Certificate Holder"),
        ] {
            if let Some(name) = body.get(key).and_then(|party| party.get("name")).and_then(scalar) {
                fields.insert(label.to_string(), FieldValue::Single(name));
            }
        }

        for (policy_type, limit, label) in POLICY_LIMITS {
            if let Some(value) = policies
                .get(policy_type)
                .and_then(|p| p.get(*limit))
                .and_then(scalar)
            {
                fields.insert(label.to_string(), FieldValue::Single(value));
            }
        }

        Ok(fields)
    }
}

fn latest<'a>(policies: impl Iterator<Item = &'a JsonValue>, key: &str) -> Option<NaiveDate> {
    policies
        .filter_map(|p| p.get(key).and_then(JsonValue::as_str))
        .filter_map(parse_date)
        .max()
}

fn day(date: NaiveDate) -> FieldValue {
    FieldValue::Single(date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coi(body: JsonValue) -> Document {
        Document {
            id: "resources/coi1".into(),
            content_type: super::super::COI_CONTENT_TYPE.into(),
            body,
        }
    }

    #[test]
    fn test_latest_dates_and_limits() {
        let fields = CertificateTransformer
            .document_fields(&coi(json!({
                "producer": { "name": "Marsh" },
                "insured": { "name": "Acme Foods" },
                "holder": { "name": "Smithfield" },
                "policies": {
                    "p1": {
                        "type": "Commercial General Liability",
                        "effective_date": "2024-01-01T00:00:00Z",
                        "expire_date": "2025-01-01T00:00:00Z",
                        "general_aggregate": 2000000
                    },
                    "p2": {
                        "type": "Automobile Liability",
                        "effective_date": "2024-02-01T00:00:00Z",
                        "expire_date": "2025-02-01T00:00:00Z",
                        "combined_single_limit": 1000000
                    }
                }
            })))
            .unwrap();

        assert_eq!(fields["Document Type"], FieldValue::from("Certificate of Insurance"));
        assert_eq!(fields["Document Date"], FieldValue::from("2024-02-01"));
        assert_eq!(fields["Expiration Date"], FieldValue::from("2025-02-01"));
        assert_eq!(fields["Insurance Producer"], FieldValue::from("Marsh"));
        assert_eq!(fields["Insured Company"], FieldValue::from("Acme Foods"));
        assert_eq!(fields["Certificate Holder"], FieldValue::from("Smithfield"));
        assert_eq!(fields["General Liability"], FieldValue::from("2000000"));
        assert_eq!(fields["Automotive Liability"], FieldValue::from("1000000"));
        assert!(!fields.contains_key("Workers Comp and Employers Liability"));
    }

    #[test]
    fn test_missing_policies_is_invalid() {
        let err = CertificateTransformer
            .document_fields(&coi(json!({ "holder": { "name": "Smithfield" } })))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
