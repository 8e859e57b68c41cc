//! Multi-role merging.
//!
//! Both merges are least-restrictive: a row is visible when any role's
//! predicate admits it, and a field axis is allowed when any role with an
//! opinion allows it.

use rowgate_core::{FieldAxis, FieldFlags};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::expr::Predicate;
use crate::resolver::FieldRuleMap;

/// OR the per-role predicates. See [`Predicate::or_all`].
pub fn merge_predicates(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::or_all(predicates)
}

/// Merge one axis value: any `true` wins, all `false` stays `false`, no
/// opinion stays unspecified.
pub fn merge_axis(values: impl IntoIterator<Item = Option<bool>>) -> Option<bool> {
    let mut merged = None;
    for value in values.into_iter().flatten() {
        if value {
            return Some(true);
        }
        merged = Some(false);
    }
    merged
}

/// Merge several flag sets axis by axis.
pub fn merge_flags(flags: impl IntoIterator<Item = FieldFlags>) -> FieldFlags {
    let flags: Vec<FieldFlags> = flags.into_iter().collect();
    let mut merged = FieldFlags::default();
    for axis in FieldAxis::ALL {
        merged.set(axis, merge_axis(flags.iter().map(|f| f.get(axis))));
    }
    merged
}

/// Merge per-role field maps.
///
/// A role that has no row for a field has no opinion on it; it does not count
/// as an allow.
pub fn merge_field_rules<'a>(maps: impl IntoIterator<Item = &'a FieldRuleMap>) -> FieldPolicy {
    let mut by_field: BTreeMap<String, Vec<FieldFlags>> = BTreeMap::new();
    for map in maps {
        for (field, flags) in map {
            by_field.entry(field.clone()).or_default().push(*flags);
        }
    }
    FieldPolicy(
        by_field
            .into_iter()
            .map(|(field, flags)| (field, merge_flags(flags)))
            .collect(),
    )
}

/// Merged field rules of a principal on one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldPolicy(FieldRuleMap);

impl FieldPolicy {
    pub fn new(rules: FieldRuleMap) -> Self {
        Self(rules)
    }

    pub fn rules(&self) -> &FieldRuleMap {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merged flags for a field; unknown fields are fully unspecified.
    pub fn flags(&self, field: &str) -> FieldFlags {
        self.0.get(field).copied().unwrap_or_default()
    }

    pub fn allows(&self, field: &str, axis: FieldAxis) -> bool {
        self.flags(field).allows(axis)
    }

    /// Fields explicitly blocked on `axis`, sorted.
    pub fn blocked(&self, axis: FieldAxis) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, flags)| !flags.allows(axis))
            .map(|(field, _)| field.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(entries: &[(&str, FieldFlags)]) -> FieldRuleMap {
        entries
            .iter()
            .map(|(name, flags)| (name.to_string(), *flags))
            .collect()
    }

    #[test]
    fn test_merge_axis() {
        assert_eq!(merge_axis([Some(false), Some(true)]), Some(true));
        assert_eq!(merge_axis([Some(false), None, Some(false)]), Some(false));
        assert_eq!(merge_axis([None, None]), None);
        assert_eq!(merge_axis([]), None);
    }

    #[test]
    fn test_any_true_wins_per_axis() {
        let hidden = FieldFlags::default().with(FieldAxis::Visible, false);
        let shown = FieldFlags::default()
            .with(FieldAxis::Visible, true)
            .with(FieldAxis::Editable, false);
        let policy = merge_field_rules([&map(&[("phone", hidden)]), &map(&[("phone", shown)])]);
        assert!(policy.allows("phone", FieldAxis::Visible));
        assert!(!policy.allows("phone", FieldAxis::Editable));
        assert_eq!(policy.flags("phone").exportable, None);
    }

    #[test]
    fn test_single_role_false_blocks() {
        let hidden = FieldFlags::default().with(FieldAxis::Visible, false);
        let policy = merge_field_rules([&map(&[("phone", hidden)]), &FieldRuleMap::new()]);
        assert_eq!(policy.blocked(FieldAxis::Visible), vec!["phone".to_string()]);
        assert!(policy.allows("email", FieldAxis::Visible));
    }

    #[test]
    fn test_merge_predicates_union() {
        let own = Predicate::eq(crate::expr::Ident::new("created_by").unwrap(), 2);
        assert_eq!(merge_predicates([Predicate::True, own.clone()]), Predicate::True);
        assert_eq!(merge_predicates([own.clone(), own.clone()]), own);
    }
}
