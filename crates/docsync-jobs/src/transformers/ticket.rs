use serde_json::Value as JsonValue;

use docsync_core::defaults::{
    FIELD_DOCUMENT_DATE, FIELD_DOCUMENT_TYPE, FIELD_ENTITY, FIELD_TICKET_ID, TICKET_DOCUMENT_TYPE,
};
use docsync_core::{Document, Error, FieldMap, FieldValue, Result, Transformer};

use super::{format_date, scalar};

/// Archived support tickets, filed by month and ticket id.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketTransformer;

impl Transformer for TicketTransformer {
    fn document_type(&self) -> &str {
        TICKET_DOCUMENT_TYPE
    }

    fn document_fields(&self, document: &Document) -> Result<FieldMap> {
        let ticket = document.body.get("ticket").ok_or_else(|| {
            Error::InvalidInput(format!("Ticket archive {} has no ticket", document.id))
        })?;
        let ticket_id = ticket.get("id").and_then(scalar).ok_or_else(|| {
            Error::InvalidInput(format!("Ticket archive {} has no ticket id", document.id))
        })?;

        let mut fields = FieldMap::new();
        fields.insert(
            FIELD_DOCUMENT_TYPE.to_string(),
            FieldValue::from(TICKET_DOCUMENT_TYPE),
        );
        fields.insert(FIELD_TICKET_ID.to_string(), FieldValue::Single(ticket_id));
        if let Some(created) = ticket.get("created_at").and_then(JsonValue::as_str) {
            fields.insert(
                FIELD_DOCUMENT_DATE.to_string(),
                FieldValue::Single(format_date(created)),
            );
        }
        if let Some(org) = document
            .body
            .get("org")
            .and_then(|org| org.get("name"))
            .and_then(scalar)
        {
            fields.insert(FIELD_ENTITY.to_string(), FieldValue::Single(org));
        }
        Ok(fields)
    }
}
