// 📥 Source Records - what upstream collaborators hand to the core
//
// Raw records arrive already materialized, one list per source. A source that
// could not be reached is an explicit `Unavailable` value, never an error.

use crate::fields::{Field, FieldData};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// ============================================================================
// RAW RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawScalar {
    Number(f64),
    Text(String),
}

impl RawScalar {
    fn canonical(&self) -> String {
        match self {
            RawScalar::Number(n) => format!("n:{}", n),
            RawScalar::Text(s) => format!("t:{}", s),
        }
    }
}

/// One (field name → value, unit) pair as the source spelled it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawValue {
    pub name: String,
    pub value: RawScalar,
    #[serde(default)]
    pub unit: Option<String>,
}

impl RawValue {
    pub fn number(name: impl Into<String>, value: f64, unit: Option<&str>) -> Self {
        RawValue {
            name: name.into(),
            value: RawScalar::Number(value),
            unit: unit.map(str::to_string),
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        RawValue {
            name: name.into(),
            value: RawScalar::Text(value.into()),
            unit: None,
        }
    }

    /// Builder: attach the unit the source declared for this value
    pub fn with_unit(mut self, unit: Option<&str>) -> Self {
        self.unit = unit.map(str::to_string);
        self
    }
}

/// One source's report of some fields for one (entity, fiscal year) candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Peer id or the source's own key for the peer
    pub entity_key: String,

    pub fiscal_year: i32,

    /// Filing / report date; restatements carry later dates
    #[serde(default)]
    pub report_date: Option<NaiveDate>,

    /// Insertion order assigned by the collaborator that fetched the record
    #[serde(default)]
    pub sequence: u64,

    /// Free-form attributes used by validity predicates (statement type, format, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    pub values: Vec<RawValue>,
}

impl RawRecord {
    pub fn new(entity_key: impl Into<String>, fiscal_year: i32) -> Self {
        RawRecord {
            entity_key: entity_key.into(),
            fiscal_year,
            report_date: None,
            sequence: 0,
            attributes: BTreeMap::new(),
            values: Vec::new(),
        }
    }

    /// Builder: set report date
    pub fn reported(mut self, date: NaiveDate) -> Self {
        self.report_date = Some(date);
        self
    }

    /// Builder: set insertion sequence
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Builder: add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder: add a value
    pub fn with_value(mut self, value: RawValue) -> Self {
        self.values.push(value);
        self
    }

    /// Builder: add a number in the source's default unit
    pub fn with_number(self, name: &str, value: f64) -> Self {
        self.with_value(RawValue::number(name, value, None))
    }

    /// Content hash used as the selector's last tie-break.
    /// Depends only on record content, never on where the record sits in a list.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.entity_key.trim().to_uppercase().as_bytes());
        hasher.update(self.fiscal_year.to_le_bytes());
        hasher.update(
            self.report_date
                .map(|d| d.to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update(self.sequence.to_le_bytes());
        for (k, v) in &self.attributes {
            hasher.update(format!("{}={};", k, v).as_bytes());
        }
        for value in &self.values {
            hasher.update(
                format!(
                    "{}|{}|{};",
                    value.name,
                    value.value.canonical(),
                    value.unit.as_deref().unwrap_or("")
                )
                .as_bytes(),
            );
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// SOURCE DATA
// ============================================================================

/// What one upstream source delivered for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceData {
    Available { records: Vec<RawRecord> },
    /// No credentials, connectivity failure, ... Treated as "returned nothing".
    Unavailable { reason: String },
}

impl SourceData {
    pub fn available(records: Vec<RawRecord>) -> Self {
        SourceData::Available { records }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        SourceData::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn records(&self) -> &[RawRecord] {
        match self {
            SourceData::Available { records } => records,
            SourceData::Unavailable { .. } => &[],
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SourceData::Available { .. })
    }
}

// ============================================================================
// NORMALIZED RECORD
// ============================================================================

/// A raw record after alias mapping and unit scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub source: String,
    pub entity: String,
    pub fiscal_year: i32,
    pub report_date: Option<NaiveDate>,
    pub sequence: u64,
    pub fingerprint: String,
    pub attributes: BTreeMap<String, String>,
    pub fields: BTreeMap<Field, FieldData>,
    /// Dropped labels, unparseable values, derivations
    pub notes: Vec<String>,
}

impl NormalizedRecord {
    pub fn get(&self, field: Field) -> Option<&FieldData> {
        self.fields.get(&field)
    }

    pub fn number(&self, field: Field) -> Option<f64> {
        self.fields.get(&field).and_then(FieldData::as_f64)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_content_based() {
        let a = RawRecord::new("ACME", 2023)
            .with_sequence(1)
            .with_attribute("statement_type", "INDL")
            .with_number("Revenue", 10.0);
        let b = a.clone();
        let c = a.clone().with_number("EBIT", 1.0);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_unavailable_source_has_no_records() {
        let data = SourceData::unavailable("WRDS_USERNAME missing");
        assert!(!data.is_available());
        assert!(data.records().is_empty());

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["status"], "unavailable");
    }
}
