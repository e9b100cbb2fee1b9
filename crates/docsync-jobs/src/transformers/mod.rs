//! Per-content-type field transformers.
//!
//! A [`TransformerRegistry`] maps registry content types to the
//! [`Transformer`] deriving archive fields for them. Content types without
//! an entry are unknown document types and are not synced.

mod certificate;
mod generic;
mod ticket;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use docsync_core::{parse_date, Transformer};

pub use certificate::CertificateTransformer;
pub use generic::GenericTransformer;
pub use ticket::TicketTransformer;

/// Certificate of insurance (ACORD) documents.
pub const COI_CONTENT_TYPE: &str = "application/vnd.trellisfw.coi.accord.1+json";

/// Archived support tickets.
pub const TICKET_CONTENT_TYPE: &str = "application/vnd.zendesk.ticket.1+json";

/// Content types handled by [`GenericTransformer`], with their archive
/// document type label.
pub const GENERIC_DOCUMENT_TYPES: &[(&str, &str)] = &[
    ("application/vnd.trellisfw.ach-form.1+json", "ACH Form"),
    (
        "application/vnd.trellisfw.pfgia.1+json",
        "Pure Food Guaranty and Indemnification Agreement (LOG)",
    ),
    (
        "application/vnd.trellisfw.letter-of-guarantee.1+json",
        "Letter of Guarantee",
    ),
    (
        "application/vnd.trellisfw.emergency-contact-information.1+json",
        "Emergency Contact Information",
    ),
    (
        "application/vnd.trellisfw.sars.1+json",
        "Specifications that indicate acceptable requirements",
    ),
    ("application/vnd.trellisfw.w-9.1+json", "W-9"),
    ("application/vnd.trellisfw.w-8.1+json", "W-8"),
    (
        "application/vnd.trellisfw.nutritional-information.1+json",
        "100g Nutritional Information",
    ),
    (
        "application/vnd.trellisfw.allergen-statement.1+json",
        "Allergen Statement",
    ),
    (
        "application/vnd.trellisfw.be-ingredient-statement.1+json",
        "Bioengineered (BE) Ingredient Statement",
    ),
    (
        "application/vnd.trellisfw.ca-prop-65-statement.1+json",
        "California Prop 65 Statement",
    ),
    (
        "application/vnd.trellisfw.coo-statement.1+json",
        "Country of Origin Statement",
    ),
    (
        "application/vnd.trellisfw.gluten-statement.1+json",
        "Gluten Statement",
    ),
    (
        "application/vnd.trellisfw.ingredient-breakdown.1+json",
        "Ingredient Breakdown Range %",
    ),
    ("application/vnd.trellisfw.product-label.1+json", "Product Label"),
    (
        "application/vnd.trellisfw.product-spec.1+json",
        "Product Specification",
    ),
    ("application/vnd.trellisfw.sds.1+json", "Safety Data Sheet (SDS)"),
    ("application/vnd.trellisfw.gmo-statement.1+json", "GMO Statement"),
    (
        "application/vnd.trellisfw.natural-statement.1+json",
        "Natural Statement",
    ),
    (
        "application/vnd.trellisfw.fsqa-certificates.1+json",
        "GFSI Certificate",
    ),
    (
        "application/vnd.trellisfw.animal-statement.1+json",
        "Non-Ambulatory (3D/4D) Animal Statement",
    ),
    (
        "application/vnd.trellisfw.srm-audit.1+json",
        "Specified Risk Materials (SRM) Audit",
    ),
    (
        "application/vnd.trellisfw.srm-statement.1+json",
        "Specified Risk Materials (SRM) Statement",
    ),
    (
        "application/vnd.trellisfw.srm-corrective-actions.1+json",
        "Specified Risk Materials (SRM) Corrective Actions",
    ),
    (
        "application/vnd.trellisfw.ecoli-audit.1+json",
        "E.Coli 0157:H7 Intervention Audit",
    ),
    (
        "application/vnd.trellisfw.ecoli-statement.1+json",
        "E.Coli 0157:H7 Intervention Statement",
    ),
    (
        "application/vnd.trellisfw.foreign-material-control-plans.1+json",
        "Foreign Material Control Plan",
    ),
    (
        "application/vnd.trellisfw.animal-welfare-audit.1+json",
        "Animal Welfare Audit",
    ),
    (
        "application/vnd.trellisfw.animal-welfare-corrective-actions.1+json",
        "Animal Welfare Corrective Actions",
    ),
    (
        "application/vnd.trellisfw.humane-harvest-statement.1+json",
        "Humane Harvest Statement",
    ),
    (
        "application/vnd.trellisfw.nrp-statement.1+json",
        "National Residue Program (NRP) Statement",
    ),
    (
        "application/vnd.trellisfw.lot-code-explanation.1+json",
        "Lot Code Explanation",
    ),
    (
        "application/vnd.trellisfw.aphis-statement.1+json",
        "APHIS Statement",
    ),
    (
        "application/vnd.trellisfw.bpa-statement.1+json",
        "Bisphenol A (BPA) Statement",
    ),
    (
        "application/vnd.trellisfw.fsqa-audit.1+json",
        "Third Party Food Safety GMP Audit",
    ),
    (
        "application/vnd.trellisfw.fsqa-certificate.1+json",
        "Third Party Food Safety GMP Certificate",
    ),
    (
        "application/vnd.trellisfw.tpa-corrective-actions.1+json",
        "Third Party Food Safety GMP Audit Corrective Actions",
    ),
    (
        "application/vnd.trellisfw.haccp-plan.1+json",
        "HACCP Plan / Flow Chart",
    ),
    (
        "application/vnd.trellisfw.copacker-fsqa-questionnaire.1+json",
        "Co-Packer FSQA Questionnaire (GFSI Certified)",
    ),
    (
        "application/vnd.trellisfw.copack-confidentiality-agreement-form.1+json",
        "Co-Pack Confidentiality Agreement Form",
    ),
    (
        "application/vnd.trellisfw.sba-form.1+json",
        "Small Business Administration (SBA) Form",
    ),
    ("application/vnd.trellisfw.wire-form.1+json", "WIRE Form"),
    (
        "application/vnd.trellisfw.business-license.1+json",
        "Business License",
    ),
    ("application/vnd.trellisfw.rate-sheet.1+json", "Rate Sheet"),
    (
        "application/vnd.trellisfw.msa.1+json",
        "Master Service Agreement (MSA)",
    ),
];

/// Content type -> transformer.
#[derive(Clone, Default)]
pub struct TransformerRegistry {
    transformers: HashMap<String, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in transformer.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(COI_CONTENT_TYPE, CertificateTransformer);
        registry.register(TICKET_CONTENT_TYPE, TicketTransformer);
        for (content_type, label) in GENERIC_DOCUMENT_TYPES {
            registry.register(*content_type, GenericTransformer::new(*label));
        }
        registry
    }

    /// Register (or replace) the transformer for a content type.
    pub fn register<T: Transformer + 'static>(&mut self, content_type: impl Into<String>, transformer: T) {
        self.transformers
            .insert(content_type.into(), Arc::new(transformer));
    }

    pub fn get(&self, content_type: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(content_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

/// `YYYY-MM-DD` for any date the registry stores; unparseable values pass
/// through unchanged.
pub(crate) fn format_date(raw: &str) -> String {
    parse_date(raw)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Scalar JSON as a field string. Objects contribute their `name` or `value`.
pub(crate) fn scalar(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Object(obj) => obj
            .get("name")
            .or_else(|| obj.get("value"))
            .and_then(scalar),
        _ => None,
    }
}
