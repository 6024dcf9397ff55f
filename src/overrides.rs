// ✍️ Overrides & Explanations - manual inputs applied after merge, before QC
//
// An override always wins over source data. Overrides that match no entity
// or no configured fiscal year are handed back, never silently dropped.

use crate::fields::{Field, FieldData, FieldKey};
use crate::merge::{FieldValue, PeerFields};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// OVERRIDE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Override {
    pub entity: String,
    pub field: Field,
    /// Defaults to the valuation year
    #[serde(default)]
    pub fiscal_year: Option<i32>,
    /// Already in canonical units
    pub value: FieldData,
    #[serde(default)]
    pub note: String,
    /// When the overriding figure was established
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

impl Override {
    pub fn new(entity: impl Into<String>, field: Field, value: FieldData, note: impl Into<String>) -> Self {
        Override {
            entity: entity.into(),
            field,
            fiscal_year: None,
            value,
            note: note.into(),
            as_of: None,
        }
    }

    /// Builder: pin the fiscal year
    pub fn for_year(mut self, fiscal_year: i32) -> Self {
        self.fiscal_year = Some(fiscal_year);
        self
    }

    pub fn key(&self, valuation_year: i32) -> FieldKey {
        FieldKey::new(self.field, self.fiscal_year.unwrap_or(valuation_year))
    }

    /// Value as the normalizer would have produced it (text upper-cased)
    pub fn canonical_value(&self) -> FieldData {
        match &self.value {
            FieldData::Text(s) => FieldData::Text(s.trim().to_uppercase()),
            other => other.clone(),
        }
    }

    fn value_fits_field(&self) -> bool {
        match &self.value {
            FieldData::Number(n) => self.field.is_numeric() && n.is_finite(),
            FieldData::Text(_) => !self.field.is_numeric(),
        }
    }
}

/// Marks a year-over-year movement as known; silences that rule for the key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub entity: String,
    pub field: Field,
    pub fiscal_year: i32,
    #[serde(default)]
    pub note: String,
}

impl Explanation {
    pub fn new(entity: impl Into<String>, field: Field, fiscal_year: i32, note: impl Into<String>) -> Self {
        Explanation {
            entity: entity.into(),
            field,
            fiscal_year,
            note: note.into(),
        }
    }

    pub fn covers(&self, entity: &str, key: FieldKey) -> bool {
        self.entity.eq_ignore_ascii_case(entity) && self.field == key.field && self.fiscal_year == key.fiscal_year
    }
}

// ============================================================================
// APPLICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedOverride {
    pub entry: Override,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideOutcome {
    pub applied: usize,
    pub unmatched: Vec<UnmatchedOverride>,
}

/// Apply overrides in list order; a later override on the same key supersedes an earlier one
pub fn apply_overrides(
    merged: Vec<PeerFields>,
    overrides: &[Override],
    valuation_year: i32,
) -> (Vec<PeerFields>, OverrideOutcome) {
    let mut records = merged;
    let mut outcome = OverrideOutcome::default();

    for entry in overrides {
        let reject = |reason: String| UnmatchedOverride {
            entry: entry.clone(),
            reason,
        };

        if !entry.value_fits_field() {
            outcome
                .unmatched
                .push(reject(format!("value {} does not fit field {}", entry.value, entry.field)));
            continue;
        }

        let record = match records
            .iter_mut()
            .find(|r| r.entity.eq_ignore_ascii_case(entry.entity.trim()))
        {
            Some(r) => r,
            None => {
                outcome
                    .unmatched
                    .push(reject(format!("unknown entity {}", entry.entity)));
                continue;
            }
        };

        let key = entry.key(valuation_year);
        let previous = match record.values.get(&key) {
            Some(v) => v.clone(),
            None => {
                outcome
                    .unmatched
                    .push(reject(format!("fiscal year {} not configured", key.fiscal_year)));
                continue;
            }
        };

        record.supersede(FieldValue::overridden(
            &previous,
            entry.canonical_value(),
            &entry.note,
            entry.as_of,
        ));
        outcome.applied += 1;
    }

    for unmatched in &outcome.unmatched {
        warn!(
            entity = %unmatched.entry.entity,
            field = %unmatched.entry.field,
            reason = %unmatched.reason,
            "override not applied"
        );
    }

    (records, outcome)
}

// ============================================================================
// TESTS
// ============================================================================
