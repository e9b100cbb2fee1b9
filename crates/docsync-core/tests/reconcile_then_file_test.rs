//! Reconciliation feeding the filing workflow.
//!
//! Validates that:
//! - a human rename of the Entity in the archive moves the filing location
//!   with it instead of being overwritten by automation
//! - automation still advances untouched fields alongside a frozen one
//! - filing the same merged set twice gives the same location

use docsync_core::{file, reconcile, FieldMap, FieldValue, FilingConfig};

fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn automated(expiration: &str) -> FieldMap {
    fields(&[
        ("Entity", "Acme".into()),
        ("Document Type", "Certificate of Insurance".into()),
        ("Share Mode", "Shared To Smithfield".into()),
        ("Expiration Date", expiration.into()),
        ("Locations", vec!["Plant 1", "Plant 2"].into()),
    ])
}

#[test]
fn test_human_entity_edit_drives_filing() {
    let config = FilingConfig::default().with_root("/root");

    // First cycle: nothing recorded, no archive entry.
    let first = reconcile(&automated("2024-06-01"), &FieldMap::new(), None);
    let filing = file(&first, &config).unwrap();
    assert_eq!(filing.path, "/root/Acme/Shared To Smithfield/Certificate of Insurance");

    // A human renames the entity in the archive.
    let mut archive = first.clone();
    archive.insert("Entity".into(), "Acme Foods, Inc.".into());

    // Next cycle: automation has a new expiration date.
    let second = reconcile(&automated("2025-06-01"), &first, Some(&archive));
    assert_eq!(second["Entity"], FieldValue::from("Acme Foods, Inc."));
    assert_eq!(second["Expiration Date"], FieldValue::from("2025-06-01"));

    let filing = file(&second, &config).unwrap();
    assert_eq!(
        filing.path,
        "/root/Acme Foods, Inc./Shared To Smithfield/Certificate of Insurance"
    );
    assert_eq!(
        filing.filename,
        "[Certificate of Insurance][Acme Foods, Inc.][EXP_2025-06-01][Multi-Location]"
    );

    // Filing the same merged set again lands in the same place.
    assert_eq!(file(&second.clone(), &config).unwrap(), filing);
}
