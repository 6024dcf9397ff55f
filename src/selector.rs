// 🎯 Deterministic Selector - one canonical record per (source, entity, year)
//
// Sources can return several candidates for the same period (restated
// filings, duplicated rows in different statement formats). The selector
// filters them through the source's validity predicate and then applies a
// total order:
//
//   1. report date, latest first (records without a date last)
//   2. insertion sequence, highest first (latest received wins)
//   3. content fingerprint, ascending
//
// The order only looks at record content, so any permutation of the same
// candidates picks the same record.

use crate::records::NormalizedRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// SELECTION POLICY
// ============================================================================

/// Source-defined validity predicate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    /// Attribute values a candidate must carry (e.g. statement_type = "INDL").
    /// Compared case-insensitively; a missing attribute fails the filter.
    #[serde(default)]
    pub required_attributes: BTreeMap<String, String>,

    /// Reject candidates with no recognized fields
    #[serde(default)]
    pub reject_empty: bool,
}

impl SelectionPolicy {
    /// Builder: require an attribute value
    pub fn require(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.required_attributes.insert(key.into(), value.into());
        self
    }

    pub fn accepts(&self, record: &NormalizedRecord) -> bool {
        if self.reject_empty && record.is_empty() {
            return false;
        }
        self.required_attributes.iter().all(|(key, wanted)| {
            record
                .attributes
                .get(key)
                .map_or(false, |actual| actual.trim().eq_ignore_ascii_case(wanted.trim()))
        })
    }
}

// ============================================================================
// SELECTION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    /// The canonical record, if any candidate survived the filter
    pub chosen: Option<&'a NormalizedRecord>,
    /// Candidates rejected by the validity predicate
    pub filtered_out: usize,
    /// Valid candidates that lost on the total order
    pub superseded: usize,
}

// ============================================================================
// SELECTOR
// ============================================================================

pub struct DeterministicSelector<'p> {
    policy: &'p SelectionPolicy,
}

impl<'p> DeterministicSelector<'p> {
    pub fn new(policy: &'p SelectionPolicy) -> Self {
        DeterministicSelector { policy }
    }

    /// Pick exactly one record among candidates for the same (source, entity, fiscal year)
    pub fn select<'a>(&self, candidates: &'a [NormalizedRecord]) -> Selection<'a> {
        let valid: Vec<&NormalizedRecord> = candidates
            .iter()
            .filter(|r| self.policy.accepts(r))
            .collect();
        let filtered_out = candidates.len() - valid.len();

        let chosen = valid.iter().copied().min_by(|a, b| selection_order(a, b));

        if let Some(record) = chosen {
            if valid.len() > 1 {
                debug!(
                    source = %record.source,
                    entity = %record.entity,
                    fiscal_year = record.fiscal_year,
                    candidates = valid.len(),
                    sequence = record.sequence,
                    "selected canonical record among duplicates"
                );
            }
        }

        Selection {
            chosen,
            filtered_out,
            superseded: valid.len().saturating_sub(1),
        }
    }
}

/// Total order: `Less` means "preferred"
pub fn selection_order(a: &NormalizedRecord, b: &NormalizedRecord) -> Ordering {
    let by_date = match (a.report_date, b.report_date) {
        (Some(da), Some(db)) => db.cmp(&da),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_date
        .then_with(|| b.sequence.cmp(&a.sequence))
        .then_with(|| a.fingerprint.cmp(&b.fingerprint))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Field, FieldData};
    use chrono::NaiveDate;

    fn candidate(date: Option<(i32, u32, u32)>, sequence: u64, revenue: f64, fmt: &str) -> NormalizedRecord {
        let mut fields = BTreeMap::new();
        fields.insert(Field::Revenue, FieldData::Number(revenue));
        let mut attributes = BTreeMap::new();
        attributes.insert("data_format".to_string(), fmt.to_string());

        NormalizedRecord {
            source: "compustat".to_string(),
            entity: "ACME".to_string(),
            fiscal_year: 2023,
            report_date: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            sequence,
            fingerprint: format!("{:064}", revenue as u64),
            attributes,
            fields,
            notes: vec![],
        }
    }

    #[test]
    fn test_latest_report_date_wins() {
        let policy = SelectionPolicy::default();
        let selector = DeterministicSelector::new(&policy);
        let candidates = vec![
            candidate(Some((2024, 3, 1)), 5, 100.0, "STD"),
            candidate(Some((2024, 9, 1)), 1, 110.0, "STD"), // restatement
        ];

        let selection = selector.select(&candidates);

        assert_eq!(selection.chosen.unwrap().number(Field::Revenue), Some(110.0));
        assert_eq!(selection.superseded, 1);
        assert_eq!(selection.filtered_out, 0);
    }

    #[test]
    fn test_sequence_breaks_date_ties() {
        let policy = SelectionPolicy::default();
        let selector = DeterministicSelector::new(&policy);
        let candidates = vec![
            candidate(Some((2024, 3, 1)), 7, 120.0, "STD"),
            candidate(Some((2024, 3, 1)), 2, 100.0, "STD"),
        ];

        assert_eq!(selector.select(&candidates).chosen.unwrap().sequence, 7);
    }

    #[test]
    fn test_undated_records_sort_last() {
        let policy = SelectionPolicy::default();
        let selector = DeterministicSelector::new(&policy);
        let candidates = vec![
            candidate(None, 99, 1.0, "STD"),
            candidate(Some((2020, 1, 1)), 0, 2.0, "STD"),
        ];

        assert_eq!(selector.select(&candidates).chosen.unwrap().number(Field::Revenue), Some(2.0));
    }

    #[test]
    fn test_validity_predicate_filters() {
        let policy = SelectionPolicy::default().require("data_format", "std");
        let selector = DeterministicSelector::new(&policy);
        let candidates = vec![
            candidate(Some((2024, 9, 1)), 1, 999.0, "SUMM_STD"),
            candidate(Some((2024, 3, 1)), 1, 100.0, "STD"),
        ];

        let selection = selector.select(&candidates);
        assert_eq!(selection.chosen.unwrap().number(Field::Revenue), Some(100.0));
        assert_eq!(selection.filtered_out, 1);
    }

    #[test]
    fn test_no_survivor_means_absent() {
        let policy = SelectionPolicy::default().require("data_format", "STD");
        let selector = DeterministicSelector::new(&policy);
        let candidates = vec![candidate(Some((2024, 9, 1)), 1, 5.0, "OTHER")];

        let selection = selector.select(&candidates);
        assert!(selection.chosen.is_none());
        assert_eq!(selection.superseded, 0);

        let empty: Vec<NormalizedRecord> = vec![];
        assert!(selector.select(&empty).chosen.is_none());
    }

    #[test]
    fn test_reject_empty_candidates() {
        let policy = SelectionPolicy {
            reject_empty: true,
            ..Default::default()
        };
        let mut empty = candidate(Some((2025, 1, 1)), 9, 0.0, "STD");
        empty.fields.clear();
        let candidates = vec![empty, candidate(Some((2024, 1, 1)), 1, 3.0, "STD")];

        let selection = DeterministicSelector::new(&policy).select(&candidates);
        assert_eq!(selection.chosen.unwrap().number(Field::Revenue), Some(3.0));
    }

    #[test]
    fn test_selection_independent_of_input_order() {
        let policy = SelectionPolicy::default();
        let selector = DeterministicSelector::new(&policy);
        let mut candidates = vec![
            candidate(Some((2024, 3, 1)), 1, 1.0, "STD"),
            candidate(Some((2024, 3, 1)), 1, 2.0, "STD"),
            candidate(Some((2023, 3, 1)), 9, 3.0, "STD"),
        ];

        let first = selector.select(&candidates).chosen.unwrap().clone();
        candidates.reverse();
        let second = selector.select(&candidates).chosen.unwrap().clone();

        assert_eq!(first, second);
        println!("✅ Selector stable across orderings: {}", first.fingerprint);
    }
}
