// 🔧 Record Normalizer - source labels/units → internal vocabulary/canonical units
//
// Each source gets a NormalizationTable: its field aliases, the unit it
// reports each field in, and the validity predicate its selector uses.

use crate::error::NormalizationError;
use crate::fields::{Field, FieldData, FieldKind, Unit};
use crate::records::{NormalizedRecord, RawRecord, RawScalar};
use crate::selector::SelectionPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

// ============================================================================
// NORMALIZATION TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationTable {
    /// Source identifier this table belongs to
    pub source: String,

    /// Source label → internal field (matched case-insensitively)
    #[serde(default)]
    pub aliases: BTreeMap<String, Field>,

    /// Unit the source reports a field in, when the value carries none
    #[serde(default)]
    pub units: BTreeMap<Field, Unit>,

    /// Fallback unit for monetary fields without a per-field entry
    #[serde(default)]
    pub default_unit: Option<Unit>,

    /// Fill EBITDA from EBIT + D&A and net debt from gross debt - cash
    #[serde(default)]
    pub derive_missing: bool,

    /// Validity predicate for the selector
    #[serde(default)]
    pub selection: SelectionPolicy,
}

impl NormalizationTable {
    pub fn new(source: impl Into<String>) -> Self {
        NormalizationTable {
            source: source.into(),
            aliases: BTreeMap::new(),
            units: BTreeMap::new(),
            default_unit: None,
            derive_missing: false,
            selection: SelectionPolicy::default(),
        }
    }

    /// Builder: map a source label to a field
    pub fn with_alias(mut self, label: impl Into<String>, field: Field) -> Self {
        self.aliases.insert(label.into(), field);
        self
    }

    /// Builder: declare the unit of a field
    pub fn with_unit(mut self, field: Field, unit: Unit) -> Self {
        self.units.insert(field, unit);
        self
    }

    /// Builder: declare the fallback unit for monetary fields
    pub fn with_default_unit(mut self, unit: Unit) -> Self {
        self.default_unit = Some(unit);
        self
    }

    /// Builder: enable derivations
    pub fn deriving(mut self) -> Self {
        self.derive_missing = true;
        self
    }

    /// Builder: set the selector's validity predicate
    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Load a list of tables from a JSON file
    pub fn load_all<P: AsRef<Path>>(path: P) -> Result<Vec<NormalizationTable>> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read normalization tables: {:?}", path.as_ref()))?;

        let tables: Vec<NormalizationTable> =
            serde_json::from_str(&content).context("Failed to parse normalization tables JSON")?;

        Ok(tables)
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct Normalizer<'t> {
    table: &'t NormalizationTable,
    /// lowercased label → field
    labels: HashMap<String, Field>,
}

impl<'t> Normalizer<'t> {
    pub fn new(table: &'t NormalizationTable) -> Self {
        let mut labels = HashMap::new();

        // Lowest priority first; later inserts overwrite
        for field in Field::ALL {
            for label in field.common_labels() {
                labels.insert(label.to_lowercase(), field);
            }
        }
        for field in Field::ALL {
            labels.insert(field.name().to_string(), field);
        }
        for (label, field) in &table.aliases {
            labels.insert(label.trim().to_lowercase(), *field);
        }

        Normalizer { table, labels }
    }

    pub fn source(&self) -> &str {
        &self.table.source
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.table.selection
    }

    /// Map a source label to the internal vocabulary
    pub fn lookup(&self, label: &str) -> Option<Field> {
        self.labels.get(&label.trim().to_lowercase()).copied()
    }

    /// Normalize one raw record for `entity` (the resolved peer id)
    pub fn normalize(
        &self,
        raw: &RawRecord,
        entity: &str,
    ) -> std::result::Result<NormalizedRecord, NormalizationError> {
        let mut fields = BTreeMap::new();
        let mut notes = Vec::new();

        for value in &raw.values {
            let field = match self.lookup(&value.name) {
                Some(f) => f,
                None => {
                    notes.push(format!("dropped unknown field '{}'", value.name));
                    continue;
                }
            };

            let unit = match value.unit.as_deref().map(str::trim) {
                Some(label) if !label.is_empty() => {
                    Unit::parse(label).ok_or_else(|| NormalizationError::UnknownUnit {
                        source_id: self.table.source.clone(),
                        entity: entity.to_string(),
                        field: value.name.clone(),
                        unit: label.to_string(),
                    })?
                }
                _ => self.declared_unit(field),
            };

            if fields.contains_key(&field) {
                notes.push(format!(
                    "ignored '{}': {} already supplied by another label",
                    value.name, field
                ));
                continue;
            }

            match to_field_data(field, &value.value, unit) {
                Some(data) => {
                    fields.insert(field, data);
                }
                None => notes.push(format!(
                    "dropped unparseable value for {} ('{}')",
                    field, value.name
                )),
            }
        }

        if self.table.derive_missing {
            derive_missing_fields(&mut fields, &mut notes);
        }

        Ok(NormalizedRecord {
            source: self.table.source.clone(),
            entity: entity.to_string(),
            fiscal_year: raw.fiscal_year,
            report_date: raw.report_date,
            sequence: raw.sequence,
            fingerprint: raw.fingerprint(),
            attributes: raw.attributes.clone(),
            fields,
            notes,
        })
    }

    fn declared_unit(&self, field: Field) -> Unit {
        if let Some(unit) = self.table.units.get(&field) {
            return *unit;
        }
        match (field.kind(), self.table.default_unit) {
            (FieldKind::Monetary, Some(unit)) => unit,
            _ => field.default_unit(),
        }
    }
}

fn to_field_data(field: Field, raw: &RawScalar, unit: Unit) -> Option<FieldData> {
    if field.kind() == FieldKind::Text {
        return match raw {
            RawScalar::Text(s) if !s.trim().is_empty() => Some(FieldData::Text(s.trim().to_uppercase())),
            _ => None,
        };
    }

    let number = match raw {
        RawScalar::Number(n) => *n,
        RawScalar::Text(s) => parse_number(s)?,
    };
    if !number.is_finite() {
        return None;
    }
    Some(FieldData::Number(number * unit.scale()))
}

/// Accepts thousands separators and surrounding whitespace
fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn derive_missing_fields(fields: &mut BTreeMap<Field, FieldData>, notes: &mut Vec<String>) {
    let number = |fields: &BTreeMap<Field, FieldData>, f: Field| fields.get(&f).and_then(FieldData::as_f64);

    if !fields.contains_key(&Field::Ebitda) {
        if let (Some(ebit), Some(da)) = (
            number(fields, Field::Ebit),
            number(fields, Field::DepreciationAmortization),
        ) {
            fields.insert(Field::Ebitda, FieldData::Number(ebit + da));
            notes.push("derived ebitda = ebit + depreciation_amortization".to_string());
        }
    }

    if !fields.contains_key(&Field::NetDebt) {
        if let (Some(debt), Some(cash)) = (number(fields, Field::GrossDebt), number(fields, Field::Cash)) {
            fields.insert(Field::NetDebt, FieldData::Number(debt - cash));
            notes.push("derived net_debt = gross_debt - cash".to_string());
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
