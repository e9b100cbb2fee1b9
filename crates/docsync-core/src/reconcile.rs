//! Field reconciliation between automation, recorded state and the archive.
//!
//! Automation may only advance a field whose recorded value still matches what
//! the archive reports. Once a human edits a field in the archive the two
//! diverge and the field is frozen at the human value.

use crate::models::{FieldMap, FieldValue};

/// Merge automated field values with the recorded and current archive fields.
///
/// `current` is `None` when the attachment has no archive entry yet, in which
/// case every automated value is taken.
pub fn reconcile(automated: &FieldMap, recorded: &FieldMap, current: Option<&FieldMap>) -> FieldMap {
    let mut merged = recorded.clone();
    if let Some(current) = current {
        for (name, value) in current {
            merged.insert(name.clone(), value.clone());
        }
    }

    for (name, value) in automated {
        if same_value(recorded.get(name), merged.get(name)) {
            merged.insert(name.clone(), value.clone());
        }
    }

    merged
}

/// Field values to record after a reconcile, for the next one to compare to.
///
/// Fields where automation prevailed record the merged value. Fields a human
/// holds keep the value automation last wrote, so the divergence persists
/// and the human value stays frozen on later runs until the two agree again.
pub fn recorded_fields(automated: &FieldMap, recorded: &FieldMap, merged: &FieldMap) -> FieldMap {
    let mut out = merged.clone();
    for (name, value) in automated {
        if same_value(Some(value), merged.get(name)) {
            continue;
        }
        match recorded.get(name) {
            Some(previous) => out.insert(name.clone(), previous.clone()),
            None => out.remove(name),
        };
    }
    out
}

/// True when no field carries a value; such an attachment cannot be filed yet.
pub fn is_unfileable(fields: &FieldMap) -> bool {
    fields.values().all(FieldValue::is_empty)
}

fn same_value(a: Option<&FieldValue>, b: Option<&FieldValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.equivalent(b),
        (Some(v), None) | (None, Some(v)) => v.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_new_attachment_takes_automation() {
        let automated = map(&[("Entity", "Acme".into()), ("Document Type", "W-9".into())]);
        let merged = reconcile(&automated, &FieldMap::new(), None);
        assert_eq!(merged, automated);
    }

    #[test]
    fn test_human_edit_is_frozen() {
        let automated = map(&[("Entity", "Acme Corp".into())]);
        let recorded = map(&[("Entity", "Acme".into())]);
        let archive = map(&[("Entity", "ACME Foods".into())]);

        let merged = reconcile(&automated, &recorded, Some(&archive));
        assert_eq!(merged["Entity"], FieldValue::from("ACME Foods"));
    }

    #[test]
    fn test_unchanged_field_advances() {
        let automated = map(&[("Expiration Date", "2025-01-01".into())]);
        let recorded = map(&[("Expiration Date", "2024-01-01".into())]);
        let archive = map(&[("Expiration Date", "2024-01-01".into())]);

        let merged = reconcile(&automated, &recorded, Some(&archive));
        assert_eq!(merged["Expiration Date"], FieldValue::from("2025-01-01"));
    }

    #[test]
    fn test_field_absent_from_archive_advances() {
        let automated = map(&[("Grade Score", "98".into())]);
        let recorded = map(&[("Grade Score", "90".into())]);
        let archive = FieldMap::new();

        let merged = reconcile(&automated, &recorded, Some(&archive));
        assert_eq!(merged["Grade Score"], FieldValue::from("98"));
    }

    #[test]
    fn test_archive_only_fields_are_kept() {
        let automated = map(&[("Entity", "Acme".into())]);
        let recorded = map(&[("Entity", "Acme".into())]);
        let archive = map(&[("Entity", "Acme".into()), ("Reviewer", "jo".into())]);

        let merged = reconcile(&automated, &recorded, Some(&archive));
        assert_eq!(merged["Reviewer"], FieldValue::from("jo"));
    }

    #[test]
    fn test_field_added_by_human_is_frozen() {
        let automated = map(&[("Certifying Body", "SQF".into())]);
        let archive = map(&[("Certifying Body", "BRC".into())]);

        let merged = reconcile(&automated, &FieldMap::new(), Some(&archive));
        assert_eq!(merged["Certifying Body"], FieldValue::from("BRC"));
    }

    #[test]
    fn test_reordered_list_is_not_a_human_edit() {
        let automated = map(&[("Products", vec!["Widget", "Gadget", "Gizmo"].into())]);
        let recorded = map(&[("Products", vec!["Widget", "Gadget"].into())]);
        let archive = map(&[("Products", vec!["Gadget", "Widget"].into())]);

        let merged = reconcile(&automated, &recorded, Some(&archive));
        assert_eq!(
            merged["Products"],
            FieldValue::from(vec!["Widget", "Gadget", "Gizmo"])
        );
    }

    #[test]
    fn test_singleton_list_matches_single_value() {
        let automated = map(&[("Locations", vec!["Plant 2"].into())]);
        let recorded = map(&[("Locations", vec!["Plant 1"].into())]);
        let archive = map(&[("Locations", "Plant 1".into())]);

        let merged = reconcile(&automated, &recorded, Some(&archive));
        assert_eq!(merged["Locations"], FieldValue::from(vec!["Plant 2"]));
    }

    #[test]
    fn test_freeze_and_advance_over_all_combinations() {
        let values = ["a", "b", "c"];
        for recorded in values {
            for archive in values {
                for automated in values {
                    let merged = reconcile(
                        &map(&[("F", automated.into())]),
                        &map(&[("F", recorded.into())]),
                        Some(&map(&[("F", archive.into())])),
                    );
                    let expected = if recorded == archive { automated } else { archive };
                    assert_eq!(
                        merged["F"],
                        FieldValue::from(expected),
                        "recorded={recorded} archive={archive} automated={automated}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_human_edit_stays_frozen_across_runs() {
        let automated = map(&[("Entity", "Acme".into()), ("Grade Score", "91".into())]);
        let mut recorded = map(&[("Entity", "Acme".into()), ("Grade Score", "90".into())]);
        let mut archive = map(&[("Entity", "Acme Corp".into()), ("Grade Score", "90".into())]);

        for _ in 0..3 {
            let merged = reconcile(&automated, &recorded, Some(&archive));
            assert_eq!(merged["Entity"], FieldValue::from("Acme Corp"));
            assert_eq!(merged["Grade Score"], FieldValue::from("91"));
            recorded = recorded_fields(&automated, &recorded, &merged);
            assert_eq!(recorded["Entity"], FieldValue::from("Acme"));
            assert_eq!(recorded["Grade Score"], FieldValue::from("91"));
            // The merged set is what gets written to the archive.
            archive = merged;
        }
    }

    #[test]
    fn test_recorded_fields_drop_human_only_values() {
        let automated = map(&[("Certifying Body", "SQF".into())]);
        let archive = map(&[("Certifying Body", "BRC".into())]);

        let merged = reconcile(&automated, &FieldMap::new(), Some(&archive));
        let recorded = recorded_fields(&automated, &FieldMap::new(), &merged);
        assert!(!recorded.contains_key("Certifying Body"));
    }

    #[test]
    fn test_agreement_hands_field_back_to_automation() {
        let automated = map(&[("Entity", "Acme Corp".into())]);
        let recorded = map(&[("Entity", "Acme".into())]);
        let archive = map(&[("Entity", "Acme Corp".into())]);

        let merged = reconcile(&automated, &recorded, Some(&archive));
        let recorded = recorded_fields(&automated, &recorded, &merged);
        assert_eq!(recorded["Entity"], FieldValue::from("Acme Corp"));
    }

    #[test]
    fn test_is_unfileable() {
        assert!(is_unfileable(&FieldMap::new()));
        assert!(is_unfileable(&map(&[("Entity", "".into())])));
        assert!(!is_unfileable(&map(&[("Entity", "Acme".into())])));
    }
}
