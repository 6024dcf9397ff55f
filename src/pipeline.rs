// 🔄 Reconciliation Pipeline - normalize → select → merge → override → QC → report
//
// One run, one immutable configuration. All upstream I/O has happened before
// `run` is called; a source that is unavailable or absent simply contributes
// nothing.

use crate::config::ReconciliationConfig;
use crate::error::{ConfigError, Result};
use crate::fields::Field;
use crate::merge::{MergeEngine, PeerFields, SelectedRecords};
use crate::metrics::EvBasis;
use crate::normalizer::{NormalizationTable, Normalizer};
use crate::overrides::{apply_overrides, Explanation, Override};
use crate::peers::{Peer, PeerRegistry};
use crate::qc::{GroupStats, QcEngine, RuleContext};
use crate::records::{NormalizedRecord, RawRecord, SourceData};
use crate::report::{CoverageGap, ReconciledPeerRecord, ReconciliationReport, SourceCoverage};
use crate::selector::DeterministicSelector;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Everything one run reads besides its configuration
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub peers: PeerRegistry,
    pub sources: BTreeMap<String, SourceData>,
    pub overrides: Vec<Override>,
    pub explanations: Vec<Explanation>,
}

impl RunInput {
    pub fn new(peers: PeerRegistry) -> Self {
        RunInput {
            peers,
            ..Default::default()
        }
    }

    /// Builder: add one source's delivery
    pub fn with_source(mut self, source: impl Into<String>, data: SourceData) -> Self {
        self.sources.insert(source.into(), data);
        self
    }

    pub fn with_overrides(mut self, overrides: Vec<Override>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_explanations(mut self, explanations: Vec<Explanation>) -> Self {
        self.explanations = explanations;
        self
    }
}

/// Per-source outcome of normalization + selection
struct SourcePass {
    coverage: SourceCoverage,
    selected: BTreeMap<(String, i32), NormalizedRecord>,
    gaps: Vec<CoverageGap>,
}

pub struct Reconciler {
    config: ReconciliationConfig,
    tables: BTreeMap<String, NormalizationTable>,
    years: Vec<i32>,
    valuation_year: i32,
}

impl Reconciler {
    /// Validate the configuration against the available normalization tables
    pub fn new(config: ReconciliationConfig, tables: Vec<NormalizationTable>) -> Result<Self> {
        let tables: BTreeMap<String, NormalizationTable> = tables
            .into_iter()
            .map(|t| (t.source.clone(), t))
            .collect();

        config.validate(tables.keys().map(String::as_str))?;

        let years = config.years();
        let valuation_year = config.valuation_year().ok_or(ConfigError::NoFiscalYears)?;

        Ok(Reconciler {
            config,
            tables,
            years,
            valuation_year,
        })
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub fn valuation_year(&self) -> i32 {
        self.valuation_year
    }

    /// Run the whole pipeline. Never fails: bad records become coverage gaps,
    /// data problems become issues.
    pub fn run(&self, input: &RunInput) -> ReconciliationReport {
        info!(
            peers = input.peers.len(),
            sources = input.sources.len(),
            years = ?self.years,
            mixed_sources = self.config.mixed_sources,
            "starting reconciliation run"
        );

        // 1. Normalize + select, per source in precedence order
        let mut selected = SelectedRecords::new();
        let mut coverage = Vec::new();
        let mut gaps: BTreeMap<String, Vec<CoverageGap>> = BTreeMap::new();

        for source in &self.config.precedence {
            let pass = self.source_pass(source, input);
            for gap in pass.gaps {
                gaps.entry(gap.entity.clone()).or_default().push(gap);
            }
            selected.insert(source.clone(), pass.selected);
            coverage.push(pass.coverage);
        }

        // 2. Merge
        let engine = MergeEngine::new(&self.config);
        let merged: Vec<PeerFields> = input
            .peers
            .peers()
            .iter()
            .map(|peer| engine.merge_entity(&peer.id, &selected))
            .collect();

        // 3. Overrides
        let (merged, override_outcome) = apply_overrides(merged, &input.overrides, self.valuation_year);

        for entry in &mut coverage {
            entry.fields_won = merged
                .iter()
                .flat_map(|f| f.values.values())
                .filter(|v| v.source_id() == Some(entry.source.as_str()))
                .count();
        }

        // 4. Peer-group statistics, then QC
        let basis = EvBasis::from_config(&self.config);
        let pairs: Vec<(&Peer, &PeerFields)> = input.peers.peers().iter().zip(merged.iter()).collect();
        let stats = GroupStats::compute(&pairs, &basis, self.valuation_year);
        let population = stats.qc_population(self.config.stats_selected_only);

        let qc = QcEngine::new();
        let records: Vec<ReconciledPeerRecord> = pairs
            .iter()
            .map(|&(peer, fields)| {
                let ctx = RuleContext {
                    peer,
                    fields,
                    config: &self.config,
                    basis,
                    stats: population,
                    years: &self.years,
                    valuation_year: self.valuation_year,
                    explanations: &input.explanations,
                };
                let issues = qc.evaluate(&ctx);

                ReconciledPeerRecord::new(
                    peer.clone(),
                    fields.clone(),
                    issues,
                    gaps.remove(&peer.id).unwrap_or_default(),
                    &basis,
                    &self.years,
                )
            })
            .collect();

        // 5. Report
        let report = ReconciliationReport::assemble(
            &self.config,
            self.valuation_year,
            records,
            coverage,
            override_outcome,
            stats,
        );

        info!(fingerprint = %report.fingerprint, "{}", report.headline());
        report
    }

    fn source_pass(&self, source: &str, input: &RunInput) -> SourcePass {
        let mut pass = SourcePass {
            coverage: SourceCoverage::new(source),
            selected: BTreeMap::new(),
            gaps: Vec::new(),
        };

        let records: &[RawRecord] = match input.sources.get(source) {
            Some(SourceData::Available { records }) => records.as_slice(),
            Some(SourceData::Unavailable { reason }) => {
                warn!(source = %source, reason = %reason, "source unavailable, treated as empty");
                pass.coverage = SourceCoverage::unavailable(source, reason.clone());
                &[]
            }
            None => {
                warn!(source = %source, "source absent from input, treated as empty");
                pass.coverage = SourceCoverage::unavailable(source, "not supplied");
                &[]
            }
        };

        // Every precedence source has a table: checked in `new`
        let table = match self.tables.get(source) {
            Some(t) => t,
            None => return pass,
        };
        let normalizer = Normalizer::new(table);

        let mut candidates: BTreeMap<(String, i32), Vec<NormalizedRecord>> = BTreeMap::new();
        let mut seen_peers = BTreeSet::new();

        for raw in records {
            let peer = match input.peers.resolve(source, &raw.entity_key) {
                Some(p) => p,
                None => {
                    pass.coverage.unmatched_records += 1;
                    if !pass.coverage.unmatched_keys.contains(&raw.entity_key) {
                        pass.coverage.unmatched_keys.push(raw.entity_key.clone());
                    }
                    continue;
                }
            };
            seen_peers.insert(peer.id.clone());

            if self.years.binary_search(&raw.fiscal_year).is_err() {
                pass.coverage.records_out_of_scope += 1;
                continue;
            }

            match normalizer.normalize(raw, &peer.id) {
                Ok(record) => {
                    candidates
                        .entry((peer.id.clone(), raw.fiscal_year))
                        .or_default()
                        .push(record);
                }
                Err(e) => {
                    warn!(source = %source, entity = %peer.id, error = %e, "record skipped");
                    pass.gaps.push(CoverageGap {
                        entity: peer.id.clone(),
                        source: source.to_string(),
                        fiscal_year: raw.fiscal_year,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !pass.coverage.unmatched_keys.is_empty() {
            warn!(
                source = %source,
                count = pass.coverage.unmatched_records,
                keys = ?pass.coverage.unmatched_keys,
                "records matched no peer"
            );
        }

        let selector = DeterministicSelector::new(normalizer.policy());
        for (key, group) in &candidates {
            let selection = selector.select(group);
            pass.coverage.records_filtered_out += selection.filtered_out;
            pass.coverage.records_superseded += selection.superseded;
            if let Some(record) = selection.chosen {
                pass.selected.insert(key.clone(), record.clone());
            }
        }

        self.tally_resolution(&mut pass, input, &seen_peers);

        debug!(
            source = %source,
            selected = pass.selected.len(),
            filtered_out = pass.coverage.records_filtered_out,
            superseded = pass.coverage.records_superseded,
            "source pass complete"
        );
        pass
    }

    /// Fully / partially / not resolved, judged on the required FieldKeys
    fn tally_resolution(&self, pass: &mut SourcePass, input: &RunInput, seen_peers: &BTreeSet<String>) {
        let required: Vec<(Field, i32)> = self
            .config
            .qc
            .required_fields
            .iter()
            .flat_map(|r| {
                let years = if r.field.is_periodic() {
                    self.years.clone()
                } else {
                    vec![self.valuation_year]
                };
                years.into_iter().map(move |y| (r.field, y))
            })
            .collect();

        for peer in input.peers.peers() {
            if peer.external_ids.contains_key(&pass.coverage.source) || seen_peers.contains(&peer.id) {
                pass.coverage.peers_mapped += 1;
            }

            let supplied = required
                .iter()
                .filter(|(field, year)| {
                    pass.selected
                        .get(&(peer.id.clone(), *year))
                        .map_or(false, |r| r.get(*field).is_some())
                })
                .count();

            if !required.is_empty() && supplied == required.len() {
                pass.coverage.fully_resolved += 1;
            } else if supplied > 0 {
                pass.coverage.partially_resolved += 1;
            } else {
                pass.coverage.not_resolved += 1;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldData, Unit};
    use crate::merge::FieldStatus;
    use crate::qc::{RuleKind, Severity};
    use crate::records::RawValue;

    fn tables() -> Vec<NormalizationTable> {
        vec![
            NormalizationTable::new("wrds")
                .with_alias("mkvalt", Field::MarketCap)
                .with_default_unit(Unit::Millions),
            NormalizationTable::new("yahoo").with_default_unit(Unit::Units),
        ]
    }

    fn peers() -> PeerRegistry {
        PeerRegistry::new(vec![
            Peer::new("ACME", "Acme Corp").with_external_id("wrds", "001"),
            Peer::new("BETA", "Beta Industries"),
        ])
        .unwrap()
    }

    #[test]
    fn test_new_rejects_source_without_table() {
        let config = ReconciliationConfig::new(vec!["wrds", "capiq"], vec![2024]);
        let err = Reconciler::new(config, tables()).err().unwrap();
        assert!(err.to_string().contains("capiq"));
    }

    #[test]
    fn test_run_resolves_external_ids_and_scales_units() {
        let config = ReconciliationConfig::new(vec!["wrds", "yahoo"], vec![2024]);
        let reconciler = Reconciler::new(config, tables()).unwrap();

        let input = RunInput::new(peers())
            .with_source(
                "wrds",
                SourceData::available(vec![RawRecord::new("001", 2024).with_number("mkvalt", 1.5)]),
            )
            .with_source("yahoo", SourceData::unavailable("no credentials"));

        let report = reconciler.run(&input);

        let acme = report.record("ACME").unwrap();
        assert_eq!(acme.number(Field::MarketCap, 2024), Some(1_500_000.0));
        assert_eq!(acme.source_of(Field::MarketCap, 2024).as_deref(), Some("wrds"));

        let yahoo = &report.summary.sources[1];
        assert!(!yahoo.available);
        assert_eq!(yahoo.fields_won, 0);
        assert_eq!(report.summary.sources[0].peers_mapped, 1);
        assert_eq!(report.summary.sources[0].fields_won, 1);
    }

    #[test]
    fn test_unmatched_and_out_of_scope_records_are_counted() {
        let config = ReconciliationConfig::new(vec!["wrds"], vec![2024]);
        let reconciler = Reconciler::new(config, vec![NormalizationTable::new("wrds")]).unwrap();

        let input = RunInput::new(peers()).with_source(
            "wrds",
            SourceData::available(vec![
                RawRecord::new("ZZZ", 2024).with_number("revenue", 1.0),
                RawRecord::new("ACME", 2019).with_number("revenue", 1.0),
            ]),
        );

        let report = reconciler.run(&input);
        let wrds = &report.summary.sources[0];

        assert_eq!(wrds.unmatched_records, 1);
        assert_eq!(wrds.unmatched_keys, vec!["ZZZ".to_string()]);
        assert_eq!(wrds.records_out_of_scope, 1);
        assert_eq!(wrds.not_resolved, 2);
    }

    #[test]
    fn test_bad_unit_becomes_coverage_gap() {
        let config = ReconciliationConfig::new(vec!["wrds"], vec![2024]);
        let reconciler = Reconciler::new(config, vec![NormalizationTable::new("wrds")]).unwrap();

        let input = RunInput::new(peers()).with_source(
            "wrds",
            SourceData::available(vec![
                RawRecord::new("ACME", 2024).with_value(RawValue::number("revenue", 5.0, Some("furlongs"))),
                RawRecord::new("BETA", 2024).with_number("revenue", 7.0),
            ]),
        );

        let report = reconciler.run(&input);

        let acme = report.record("ACME").unwrap();
        assert_eq!(acme.coverage_gaps.len(), 1);
        assert!(acme.coverage_gaps[0].reason.contains("furlongs"));
        assert_eq!(report.record("BETA").unwrap().number(Field::Revenue, 2024), Some(7.0));
        assert_eq!(report.summary.coverage_gaps, 1);
    }

    #[test]
    fn test_override_precedes_qc() {
        let config = ReconciliationConfig::new(vec!["wrds"], vec![2024]);
        let reconciler = Reconciler::new(config, vec![NormalizationTable::new("wrds")]).unwrap();

        let input = RunInput::new(peers())
            .with_source("wrds", SourceData::available(vec![]))
            .with_overrides(vec![Override::new("BETA", Field::NetDebt, FieldData::Number(12.0), "10-K")]);

        let report = reconciler.run(&input);
        let beta = report.record("BETA").unwrap();

        assert_eq!(beta.get(Field::NetDebt, 2024).unwrap().status, FieldStatus::Overridden);
        assert!(!beta
            .issues_for(RuleKind::MissingRequiredField)
            .any(|i| i.field.map(|k| k.field) == Some(Field::NetDebt)));
        assert!(beta
            .issues_for(RuleKind::MissingRequiredField)
            .all(|i| i.severity == Severity::Error));
        assert_eq!(report.summary.overrides_applied, 1);
    }
}
