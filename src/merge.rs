// ⚖️ Field Merge Engine - one authoritative value per field, per entity
//
// Sources are walked in precedence order. With mixed sources off, the first
// source that supplies anything for an entity owns every field of it; with
// mixed sources on, each field goes to the highest-precedence source that
// has it. Exactly one source wins a field: values are never blended.

use crate::config::ReconciliationConfig;
use crate::fields::{Field, FieldData, FieldKey, FieldKind};
use crate::records::NormalizedRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Selected record per (entity, fiscal year), per source
pub type SelectedRecords = BTreeMap<String, BTreeMap<(String, i32), NormalizedRecord>>;

// ============================================================================
// PROVENANCE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRef {
    Source(String),
    Override,
}

impl SourceRef {
    pub fn source_id(&self) -> Option<&str> {
        match self {
            SourceRef::Source(id) => Some(id),
            SourceRef::Override => None,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Source(id) => f.write_str(id),
            SourceRef::Override => f.write_str("override"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Resolved,
    Missing,
    Overridden,
    /// Resolved, but another source disagreed beyond the conflict tolerance
    Conflicting,
}

impl FieldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldStatus::Resolved => "resolved",
            FieldStatus::Missing => "missing",
            FieldStatus::Overridden => "overridden",
            FieldStatus::Conflicting => "conflicting",
        }
    }
}

/// A value some source offered for a field, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source: SourceRef,
    pub value: FieldData,
    pub as_of: Option<NaiveDate>,
}

// ============================================================================
// FIELD VALUE
// ============================================================================

/// The resolved value of one field of one entity. Never mutated: an override
/// produces a new FieldValue that supersedes this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub key: FieldKey,
    pub value: Option<FieldData>,
    pub kind: FieldKind,
    pub source: Option<SourceRef>,
    pub as_of: Option<NaiveDate>,
    pub status: FieldStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl FieldValue {
    pub fn missing(key: FieldKey) -> Self {
        FieldValue {
            key,
            value: None,
            kind: key.field.kind(),
            source: None,
            as_of: None,
            status: FieldStatus::Missing,
            alternatives: Vec::new(),
            note: None,
        }
    }

    pub fn resolved(key: FieldKey, value: FieldData, source: &str, as_of: Option<NaiveDate>) -> Self {
        FieldValue {
            key,
            value: Some(value),
            kind: key.field.kind(),
            source: Some(SourceRef::Source(source.to_string())),
            as_of,
            status: FieldStatus::Resolved,
            alternatives: Vec::new(),
            note: None,
        }
    }

    /// New value superseding `previous` by manual override
    pub fn overridden(previous: &FieldValue, value: FieldData, note: &str, as_of: Option<NaiveDate>) -> Self {
        let mut alternatives = Vec::new();
        if let (Some(source), Some(old)) = (&previous.source, &previous.value) {
            alternatives.push(Candidate {
                source: source.clone(),
                value: old.clone(),
                as_of: previous.as_of,
            });
        }
        // A re-override keeps the whole trail back to the merged value
        if previous.status == FieldStatus::Overridden {
            alternatives.extend(previous.alternatives.iter().cloned());
        }

        FieldValue {
            key: previous.key,
            value: Some(value),
            kind: previous.kind,
            source: Some(SourceRef::Override),
            as_of,
            status: FieldStatus::Overridden,
            alternatives,
            note: if note.is_empty() { None } else { Some(note.to_string()) },
        }
    }

    pub fn number(&self) -> Option<f64> {
        self.value.as_ref().and_then(FieldData::as_f64)
    }

    pub fn is_missing(&self) -> bool {
        self.status == FieldStatus::Missing
    }

    /// Source id that supplied the value (None for overrides and missing)
    pub fn source_id(&self) -> Option<&str> {
        self.source.as_ref().and_then(SourceRef::source_id)
    }
}

// ============================================================================
// PEER FIELDS
// ============================================================================

/// Every FieldValue of one entity after merge (and, later, overrides)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerFields {
    pub entity: String,
    /// Sole source when mixed sources is off and some source had data
    pub primary_source: Option<String>,
    pub values: BTreeMap<FieldKey, FieldValue>,
}

impl PeerFields {
    pub fn get(&self, field: Field, fiscal_year: i32) -> Option<&FieldValue> {
        self.values.get(&FieldKey::new(field, fiscal_year))
    }

    pub fn number(&self, field: Field, fiscal_year: i32) -> Option<f64> {
        self.get(field, fiscal_year).and_then(FieldValue::number)
    }

    pub fn missing(&self) -> impl Iterator<Item = &FieldValue> {
        self.values.values().filter(|v| v.is_missing())
    }

    /// Replace one value wholesale (override application)
    pub(crate) fn supersede(&mut self, value: FieldValue) {
        self.values.insert(value.key, value);
    }
}

// ============================================================================
// MERGE ENGINE
// ============================================================================

pub struct MergeEngine<'c> {
    precedence: &'c [String],
    years: Vec<i32>,
    mixed_sources: bool,
    conflict_tolerance: Option<f64>,
}

impl<'c> MergeEngine<'c> {
    pub fn new(config: &'c ReconciliationConfig) -> Self {
        MergeEngine {
            precedence: &config.precedence,
            years: config.years(),
            mixed_sources: config.mixed_sources,
            conflict_tolerance: config.conflict_tolerance,
        }
    }

    /// Merge every field of `entity` across sources
    pub fn merge_entity(&self, entity: &str, selected: &SelectedRecords) -> PeerFields {
        let record_for = |source: &str, year: i32| lookup(selected, source, entity, year);

        let eligible: Vec<&str> = if self.mixed_sources {
            self.precedence.iter().map(String::as_str).collect()
        } else {
            self.precedence
                .iter()
                .map(String::as_str)
                .find(|source| {
                    self.years
                        .iter()
                        .any(|y| record_for(source, *y).map_or(false, |r| !r.is_empty()))
                })
                .into_iter()
                .collect()
        };

        let primary_source = if self.mixed_sources {
            None
        } else {
            eligible.first().map(|s| s.to_string())
        };

        let mut values = BTreeMap::new();
        for &year in &self.years {
            for field in Field::ALL {
                let key = FieldKey::new(field, year);

                let winner = eligible.iter().find_map(|source| {
                    record_for(source, year)
                        .and_then(|r| r.get(field).map(|data| (*source, r, data)))
                });

                let value = match winner {
                    None => FieldValue::missing(key),
                    Some((source, record, data)) => {
                        let mut value = FieldValue::resolved(key, data.clone(), source, record.report_date);

                        if let Some(tolerance) = self.conflict_tolerance {
                            // Only sources allowed to supply this entity can conflict
                            value.alternatives = eligible
                                .iter()
                                .filter(|other| **other != source)
                                .filter_map(|other| {
                                    let r = record_for(other, year)?;
                                    let alt = r.get(field)?;
                                    data.differs_from(alt, tolerance).then(|| Candidate {
                                        source: SourceRef::Source(other.to_string()),
                                        value: alt.clone(),
                                        as_of: r.report_date,
                                    })
                                })
                                .collect();
                            if !value.alternatives.is_empty() {
                                value.status = FieldStatus::Conflicting;
                            }
                        }
                        value
                    }
                };

                values.insert(key, value);
            }
        }

        PeerFields {
            entity: entity.to_string(),
            primary_source,
            values,
        }
    }
}

fn lookup<'a>(
    selected: &'a SelectedRecords,
    source: &str,
    entity: &str,
    year: i32,
) -> Option<&'a NormalizedRecord> {
    selected
        .get(source)
        .and_then(|by_key| by_key.get(&(entity.to_string(), year)))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, entity: &str, year: i32, fields: &[(Field, f64)]) -> NormalizedRecord {
        NormalizedRecord {
            source: source.to_string(),
            entity: entity.to_string(),
            fiscal_year: year,
            report_date: NaiveDate::from_ymd_opt(year + 1, 3, 1),
            sequence: 0,
            fingerprint: String::new(),
            attributes: BTreeMap::new(),
            fields: fields
                .iter()
                .map(|(f, v)| (*f, FieldData::Number(*v)))
                .collect(),
            notes: vec![],
        }
    }

    fn selected(records: Vec<NormalizedRecord>) -> SelectedRecords {
        let mut out = SelectedRecords::new();
        for r in records {
            out.entry(r.source.clone())
                .or_default()
                .insert((r.entity.clone(), r.fiscal_year), r);
        }
        out
    }

    fn config(mixed: bool) -> ReconciliationConfig {
        let mut config = ReconciliationConfig::new(vec!["wrds", "yahoo"], vec![2023, 2024]);
        config.mixed_sources = mixed;
        config.conflict_tolerance = None;
        config
    }

    #[test]
    fn test_every_field_has_a_value() {
        let config = config(true);
        let merged = MergeEngine::new(&config).merge_entity("ACME", &SelectedRecords::new());

        assert_eq!(merged.values.len(), Field::ALL.len() * 2);
        assert!(merged.values.values().all(|v| v.is_missing() && v.source.is_none()));
        assert_eq!(merged.primary_source, None);
    }

    #[test]
    fn test_single_source_when_mixed_off() {
        let config = config(false);
        let data = selected(vec![
            record("wrds", "ACME", 2024, &[(Field::Revenue, 100.0)]),
            record("yahoo", "ACME", 2024, &[(Field::Revenue, 90.0), (Field::MarketCap, 500.0)]),
        ]);

        let merged = MergeEngine::new(&config).merge_entity("ACME", &data);

        assert_eq!(merged.primary_source.as_deref(), Some("wrds"));
        assert_eq!(merged.number(Field::Revenue, 2024), Some(100.0));
        // Yahoo has market cap, but wrds owns the entity
        assert!(merged.get(Field::MarketCap, 2024).unwrap().is_missing());
        assert!(merged
            .values
            .values()
            .filter_map(FieldValue::source_id)
            .all(|s| s == "wrds"));
    }

    #[test]
    fn test_fallback_source_owns_entity_when_primary_empty() {
        let config = config(false);
        let data = selected(vec![
            record("wrds", "ACME", 2024, &[]),
            record("yahoo", "ACME", 2023, &[(Field::Ebit, 7.0)]),
        ]);

        let merged = MergeEngine::new(&config).merge_entity("ACME", &data);

        assert_eq!(merged.primary_source.as_deref(), Some("yahoo"));
        assert_eq!(merged.number(Field::Ebit, 2023), Some(7.0));
    }

    #[test]
    fn test_mixed_sources_fill_gaps_per_field() {
        let config = config(true);
        let data = selected(vec![
            record("wrds", "ACME", 2024, &[(Field::Revenue, 100.0)]),
            record("yahoo", "ACME", 2024, &[(Field::Revenue, 90.0), (Field::MarketCap, 500.0)]),
        ]);

        let merged = MergeEngine::new(&config).merge_entity("ACME", &data);

        let revenue = merged.get(Field::Revenue, 2024).unwrap();
        let market_cap = merged.get(Field::MarketCap, 2024).unwrap();
        assert_eq!(revenue.source_id(), Some("wrds"));
        assert_eq!(revenue.number(), Some(100.0));
        assert_eq!(market_cap.source_id(), Some("yahoo"));
        assert_eq!(market_cap.as_of, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(revenue.status, FieldStatus::Resolved);
    }

    #[test]
    fn test_conflicting_sources_are_flagged_not_blended() {
        let mut config = config(true);
        config.conflict_tolerance = Some(0.05);
        let data = selected(vec![
            record("wrds", "ACME", 2024, &[(Field::Revenue, 100.0), (Field::Ebit, 10.0)]),
            record("yahoo", "ACME", 2024, &[(Field::Revenue, 130.0), (Field::Ebit, 10.2)]),
        ]);

        let merged = MergeEngine::new(&config).merge_entity("ACME", &data);

        let revenue = merged.get(Field::Revenue, 2024).unwrap();
        assert_eq!(revenue.status, FieldStatus::Conflicting);
        assert_eq!(revenue.number(), Some(100.0));
        assert_eq!(revenue.source_id(), Some("wrds"));
        assert_eq!(revenue.alternatives.len(), 1);
        assert_eq!(revenue.alternatives[0].value, FieldData::Number(130.0));

        // 2% apart: within tolerance
        assert_eq!(merged.get(Field::Ebit, 2024).unwrap().status, FieldStatus::Resolved);
    }

    #[test]
    fn test_overridden_value_keeps_superseded_candidate() {
        let key = FieldKey::new(Field::NetDebt, 2024);
        let merged = FieldValue::resolved(key, FieldData::Number(20.0), "wrds", None);

        let value = FieldValue::overridden(&merged, FieldData::Number(25.0), "IFRS16 leases", None);

        assert_eq!(value.status, FieldStatus::Overridden);
        assert_eq!(value.source, Some(SourceRef::Override));
        assert_eq!(value.source_id(), None);
        assert_eq!(value.alternatives[0].source, SourceRef::Source("wrds".to_string()));
        assert_eq!(value.note.as_deref(), Some("IFRS16 leases"));
    }

    #[test]
    fn test_second_override_keeps_full_trail() {
        let key = FieldKey::new(Field::NetDebt, 2024);
        let merged = FieldValue::resolved(key, FieldData::Number(20.0), "wrds", None);

        let first = FieldValue::overridden(&merged, FieldData::Number(25.0), "leases", None);
        let second = FieldValue::overridden(&first, FieldData::Number(30.0), "pensions", None);

        assert_eq!(second.number(), Some(30.0));
        assert_eq!(second.alternatives.len(), 2);
        assert_eq!(second.alternatives[0].source, SourceRef::Override);
        assert_eq!(second.alternatives[0].value, FieldData::Number(25.0));
        assert_eq!(second.alternatives[1].source, SourceRef::Source("wrds".to_string()));
        assert_eq!(second.alternatives[1].value, FieldData::Number(20.0));
    }

    #[test]
    fn test_ineligible_source_never_conflicts_when_mixed_off() {
        let mut config = config(false);
        config.conflict_tolerance = Some(0.05);
        let data = selected(vec![
            record("wrds", "ACME", 2024, &[(Field::Revenue, 100.0)]),
            record("yahoo", "ACME", 2024, &[(Field::Revenue, 200.0)]),
        ]);

        let merged = MergeEngine::new(&config).merge_entity("ACME", &data);

        let revenue = merged.get(Field::Revenue, 2024).unwrap();
        assert_eq!(revenue.source_id(), Some("wrds"));
        assert_eq!(revenue.status, FieldStatus::Resolved);
        assert!(revenue.alternatives.is_empty());
    }
}
