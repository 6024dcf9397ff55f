// 📂 CSV Loaders - peer universe, source records, overrides, explanations
//
// Collaborator code: everything here runs before the pipeline and reports
// failures through anyhow. Each loader has a reader variant for tests and a
// path variant for the binary.

use crate::config::ReconciliationConfig;
use crate::fields::{Field, FieldData, Unit};
use crate::overrides::{Explanation, Override};
use crate::peers::{Peer, PeerRegistry, FLAG_CORE, FLAG_SELECTED};
use crate::pipeline::RunInput;
use crate::records::{RawRecord, RawValue, SourceData};
use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

// ============================================================================
// PEER UNIVERSE
// ============================================================================

#[derive(Debug, Deserialize)]
struct PeerRow {
    #[serde(alias = "ticker")]
    id: String,
    #[serde(default, alias = "company")]
    label: String,
    /// "source=key;source=key"
    #[serde(default)]
    external_ids: String,
    /// "selected;core;sensitivity"
    #[serde(default)]
    flags: String,
    #[serde(default, alias = "selection_rationale")]
    rationale: String,
    /// Boolean columns as peer universe sheets carry them
    #[serde(default)]
    selected: Option<String>,
    #[serde(default)]
    core_set: Option<String>,
}

fn truthy(value: &Option<String>) -> bool {
    matches!(
        value.as_deref().map(|v| v.trim().to_lowercase()).as_deref(),
        Some("true" | "yes" | "y" | "1" | "x")
    )
}

/// Split "a=b;c=d" into pairs; blank entries are skipped
fn key_values(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("expected key=value, got '{}'", pair))?;
            Ok((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

pub fn read_peers<R: Read>(reader: R) -> Result<PeerRegistry> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut peers = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: PeerRow = result.with_context(|| format!("Failed to parse peer row {}", line + 1))?;

        let id = row.id.trim().to_string();
        if id.is_empty() {
            bail!("Peer row {} has no id", line + 1);
        }
        let label = if row.label.trim().is_empty() {
            id.clone()
        } else {
            row.label.trim().to_string()
        };

        let mut peer = Peer::new(id, label).with_rationale(row.rationale.trim());
        for (source, key) in key_values(&row.external_ids)
            .with_context(|| format!("Bad external_ids on peer row {}", line + 1))?
        {
            peer = peer.with_external_id(source, key);
        }
        for flag in row.flags.split(';').map(str::trim).filter(|f| !f.is_empty()) {
            peer = peer.with_flag(flag);
        }
        if truthy(&row.selected) {
            peer = peer.with_flag(FLAG_SELECTED);
        }
        if truthy(&row.core_set) {
            peer = peer.with_flag(FLAG_CORE);
        }

        peers.push(peer);
    }

    Ok(PeerRegistry::new(peers)?)
}

pub fn load_peers(path: &Path) -> Result<PeerRegistry> {
    let file = File::open(path).with_context(|| format!("Failed to open peer file: {:?}", path))?;
    read_peers(file)
}

// ============================================================================
// SOURCE RECORDS (long format: one row per record field)
// ============================================================================

#[derive(Debug, Deserialize)]
struct RecordRow {
    record_id: String,
    entity: String,
    fiscal_year: i32,
    #[serde(default)]
    report_date: Option<NaiveDate>,
    #[serde(default)]
    attributes: String,
    field: String,
    value: String,
    #[serde(default)]
    unit: Option<String>,
}

/// Rows sharing a record_id form one RawRecord; sequence follows first appearance
pub fn read_source_records<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut records: Vec<RawRecord> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: RecordRow = result.with_context(|| format!("Failed to parse record row {}", line + 1))?;

        let position = match index.get(&row.record_id) {
            Some(&i) => {
                let existing = &records[i];
                if !existing.entity_key.eq_ignore_ascii_case(row.entity.trim())
                    || existing.fiscal_year != row.fiscal_year
                {
                    bail!(
                        "Record {} changes entity or fiscal year on row {}",
                        row.record_id,
                        line + 1
                    );
                }
                i
            }
            None => {
                let mut record = RawRecord::new(row.entity.trim(), row.fiscal_year)
                    .with_sequence(records.len() as u64);
                record.report_date = row.report_date;
                for (k, v) in key_values(&row.attributes)
                    .with_context(|| format!("Bad attributes on record row {}", line + 1))?
                {
                    record = record.with_attribute(k, v);
                }
                index.insert(row.record_id.clone(), records.len());
                records.push(record);
                records.len() - 1
            }
        };

        let unit = row.unit.as_deref().map(str::trim).filter(|u| !u.is_empty());
        let raw = row.value.trim();
        let value = match raw.replace(',', "").parse::<f64>() {
            Ok(n) if n.is_finite() => RawValue::number(row.field.trim(), n, unit),
            // Keep the declared unit; the normalizer parses looser number formats
            _ => RawValue::text(row.field.trim(), raw).with_unit(unit),
        };
        records[position].values.push(value);
    }

    Ok(records)
}

pub fn load_source_records(path: &Path) -> Result<Vec<RawRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open source file: {:?}", path))?;
    read_source_records(file)
}

// ============================================================================
// OVERRIDES & EXPLANATIONS
// ============================================================================

#[derive(Debug, Deserialize)]
struct OverrideRow {
    #[serde(alias = "ticker")]
    entity: String,
    field: String,
    #[serde(default, alias = "year")]
    fiscal_year: Option<i32>,
    value: String,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    note: String,
    #[serde(default)]
    as_of: Option<NaiveDate>,
}

pub fn read_overrides<R: Read>(reader: R) -> Result<Vec<Override>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut overrides = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: OverrideRow = result.with_context(|| format!("Failed to parse override row {}", line + 1))?;
        let field: Field = row
            .field
            .parse()
            .with_context(|| format!("Override row {}", line + 1))?;

        let value = if field.is_numeric() {
            let unit = match row.unit.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
                Some(label) => Unit::parse(label)
                    .ok_or_else(|| anyhow!("Override row {}: unrecognized unit '{}'", line + 1, label))?,
                None => Unit::Units,
            };
            let n: f64 = row
                .value
                .trim()
                .replace(',', "")
                .parse()
                .with_context(|| format!("Override row {}: '{}' is not a number", line + 1, row.value))?;
            FieldData::Number(n * unit.scale())
        } else {
            FieldData::Text(row.value.trim().to_uppercase())
        };

        let mut entry = Override::new(row.entity.trim(), field, value, row.note.trim());
        entry.fiscal_year = row.fiscal_year;
        entry.as_of = row.as_of;
        overrides.push(entry);
    }

    Ok(overrides)
}

pub fn load_overrides(path: &Path) -> Result<Vec<Override>> {
    let file = File::open(path).with_context(|| format!("Failed to open overrides file: {:?}", path))?;
    read_overrides(file)
}

#[derive(Debug, Deserialize)]
struct ExplanationRow {
    #[serde(alias = "ticker")]
    entity: String,
    field: String,
    #[serde(alias = "year")]
    fiscal_year: i32,
    #[serde(default)]
    note: String,
}

pub fn read_explanations<R: Read>(reader: R) -> Result<Vec<Explanation>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut explanations = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: ExplanationRow =
            result.with_context(|| format!("Failed to parse explanation row {}", line + 1))?;
        let field: Field = row
            .field
            .parse()
            .with_context(|| format!("Explanation row {}", line + 1))?;
        explanations.push(Explanation::new(row.entity.trim(), field, row.fiscal_year, row.note.trim()));
    }

    Ok(explanations)
}

pub fn load_explanations(path: &Path) -> Result<Vec<Explanation>> {
    let file = File::open(path).with_context(|| format!("Failed to open explanations file: {:?}", path))?;
    read_explanations(file)
}

// ============================================================================
// DATA DIRECTORY
// ============================================================================

/// Load `peers.csv`, `sources/<source>.csv` per precedence source and the
/// optional `overrides.csv` / `explanations.csv`. A missing source file makes
/// that source unavailable for the run.
pub fn load_data_dir(dir: &Path, config: &ReconciliationConfig) -> Result<RunInput> {
    let peers = load_peers(&dir.join("peers.csv"))?;
    let mut input = RunInput::new(peers);

    for source in &config.precedence {
        let path = dir.join("sources").join(format!("{}.csv", source));
        let data = if path.exists() {
            let records = load_source_records(&path)?;
            info!(source = %source, records = records.len(), "loaded source records");
            SourceData::available(records)
        } else {
            warn!(source = %source, path = ?path, "no source file");
            SourceData::unavailable(format!("no file at {}", path.display()))
        };
        input.sources.insert(source.clone(), data);
    }

    let overrides_path = dir.join("overrides.csv");
    if overrides_path.exists() {
        input.overrides = load_overrides(&overrides_path)?;
    }
    let explanations_path = dir.join("explanations.csv");
    if explanations_path.exists() {
        input.explanations = load_explanations(&explanations_path)?;
    }

    info!(
        peers = input.peers.len(),
        overrides = input.overrides.len(),
        explanations = input.explanations.len(),
        "data directory loaded"
    );
    Ok(input)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RawScalar;

    #[test]
    fn test_read_peers_with_flags_and_external_ids() {
        let csv = "\
ticker,company,external_ids,flags,selected,core_set,selection_rationale
ASMI.AS,ASM International,compustat=100432;yahoo=ASM.AS,sensitivity,yes,true,ALD leader
AMAT,Applied Materials,,,no,,
";
        let registry = read_peers(csv.as_bytes()).unwrap();

        assert_eq!(registry.len(), 2);
        let asm = registry.get("ASMI.AS").unwrap();
        assert!(asm.is_selected());
        assert!(asm.is_core());
        assert!(asm.has_flag("sensitivity"));
        assert_eq!(asm.rationale, "ALD leader");
        assert_eq!(registry.resolve("compustat", "100432").unwrap().id, "ASMI.AS");
        assert!(!registry.get("AMAT").unwrap().is_selected());
    }

    #[test]
    fn test_read_peers_rejects_duplicates() {
        let csv = "id,label\nACME,Acme\nacme,Acme again\n";
        assert!(read_peers(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_read_source_records_groups_rows() {
        let csv = "\
record_id,entity,fiscal_year,report_date,attributes,field,value,unit
r1,ACME,2024,2025-03-01,statement_type=INDL;format=STD,revenue,\"1,200\",m
r1,ACME,2024,2025-03-01,statement_type=INDL;format=STD,currency,eur,
r2,ACME,2024,,,revenue,1250,m
";
        let records = read_source_records(csv.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 0);
        assert_eq!(records[1].sequence, 1);
        assert_eq!(records[0].values.len(), 2);
        assert_eq!(records[0].values[0].value, RawScalar::Number(1200.0));
        assert_eq!(records[0].values[0].unit.as_deref(), Some("m"));
        assert_eq!(records[0].values[1].value, RawScalar::Text("eur".to_string()));
        assert_eq!(records[0].attributes["statement_type"], "INDL");
        assert_eq!(records[0].report_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(records[1].report_date, None);
    }

    #[test]
    fn test_text_values_keep_their_unit() {
        use crate::error::NormalizationError;
        use crate::normalizer::{NormalizationTable, Normalizer};

        let csv = "\
record_id,entity,fiscal_year,report_date,attributes,field,value,unit
r1,ACME,2024,,,revenue,1 200,m
r2,ACME,2023,,,revenue,1 200,furlongs
";
        let records = read_source_records(csv.as_bytes()).unwrap();
        assert_eq!(records[0].values[0].value, RawScalar::Text("1 200".to_string()));
        assert_eq!(records[0].values[0].unit.as_deref(), Some("m"));

        let table = NormalizationTable::new("wrds").with_default_unit(Unit::Units);
        let normalizer = Normalizer::new(&table);

        let scaled = normalizer.normalize(&records[0], "ACME").unwrap();
        assert_eq!(scaled.number(Field::Revenue), Some(1.2e9));

        let rejected = normalizer.normalize(&records[1], "ACME");
        assert!(matches!(rejected, Err(NormalizationError::UnknownUnit { .. })));
    }

    #[test]
    fn test_read_source_records_rejects_inconsistent_rows() {
        let csv = "\
record_id,entity,fiscal_year,report_date,attributes,field,value,unit
r1,ACME,2024,,,revenue,1,
r1,ACME,2023,,,ebit,1,
";
        assert!(read_source_records(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_read_overrides_scales_units() {
        let csv = "\
ticker,field,year,value,unit,note,as_of
ACME,net_debt,2024,35,m,IFRS16 leases,2025-04-30
ACME,currency,,usd,,reporting currency,
";
        let overrides = read_overrides(csv.as_bytes()).unwrap();

        assert_eq!(overrides[0].value, FieldData::Number(35_000_000.0));
        assert_eq!(overrides[0].fiscal_year, Some(2024));
        assert_eq!(overrides[0].as_of, NaiveDate::from_ymd_opt(2025, 4, 30));
        assert_eq!(overrides[1].value, FieldData::Text("USD".to_string()));
        assert_eq!(overrides[1].fiscal_year, None);
    }

    #[test]
    fn test_read_overrides_rejects_unknown_field() {
        let csv = "entity,field,value\nACME,net_income,5\n";
        assert!(read_overrides(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_read_explanations() {
        let csv = "entity,field,fiscal_year,note\nACME,ebitda,2024,acquisition of Foo\n";
        let explanations = read_explanations(csv.as_bytes()).unwrap();
        assert_eq!(explanations[0].field, Field::Ebitda);
        assert_eq!(explanations[0].note, "acquisition of Foo");
    }
}
