// 🧾 Provenance & Report Assembly - read-only output of one run
//
// Joins every FieldValue (with source and as-of) and Issue per peer, and
// summarizes coverage across sources. The fingerprint hashes the serialized
// per-peer output, so identical inputs give an identical fingerprint.

use crate::config::{EvMode, ReconciliationConfig};
use crate::fields::{Field, FieldKey};
use crate::merge::{FieldStatus, FieldValue, PeerFields};
use crate::metrics::{in_eur, EvBasis, Multiple};
use crate::overrides::{OverrideOutcome, UnmatchedOverride};
use crate::peers::Peer;
use crate::qc::{GroupStats, Issue, RuleKind, Severity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::warn;

// ============================================================================
// PER-PEER OUTPUT
// ============================================================================

/// A normalization failure isolated to one (source, entity, record)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageGap {
    pub entity: String,
    pub source: String,
    pub fiscal_year: i32,
    pub reason: String,
}

/// Derived figures for one fiscal year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMetrics {
    pub provider_ev: Option<f64>,
    pub computed_ev: Option<f64>,
    /// Market cap and net debt at the year's FX rate to EUR
    #[serde(default)]
    pub market_cap_eur: Option<f64>,
    #[serde(default)]
    pub net_debt_eur: Option<f64>,
    /// Multiples on the EV selected by the EV mode
    pub multiples: BTreeMap<Multiple, Option<f64>>,
}

impl PeerMetrics {
    pub fn compute(fields: &PeerFields, basis: &EvBasis, year: i32) -> Self {
        PeerMetrics {
            provider_ev: basis.provider_ev(fields, year),
            computed_ev: basis.computed_ev(fields, year),
            market_cap_eur: in_eur(fields, Field::MarketCap, year),
            net_debt_eur: in_eur(fields, Field::NetDebt, year),
            multiples: Multiple::ALL
                .iter()
                .map(|m| (*m, basis.multiple(fields, *m, year)))
                .collect(),
        }
    }
}

/// The unit of output: one peer, all its fields, its issues and gaps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledPeerRecord {
    pub peer: Peer,
    pub fields: PeerFields,
    pub metrics: BTreeMap<i32, PeerMetrics>,
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coverage_gaps: Vec<CoverageGap>,
}

impl ReconciledPeerRecord {
    pub fn new(
        peer: Peer,
        fields: PeerFields,
        issues: Vec<Issue>,
        coverage_gaps: Vec<CoverageGap>,
        basis: &EvBasis,
        years: &[i32],
    ) -> Self {
        let metrics = years
            .iter()
            .map(|&y| (y, PeerMetrics::compute(&fields, basis, y)))
            .collect();

        ReconciledPeerRecord {
            peer,
            fields,
            metrics,
            issues,
            coverage_gaps,
        }
    }

    pub fn entity(&self) -> &str {
        &self.fields.entity
    }

    pub fn get(&self, field: Field, fiscal_year: i32) -> Option<&FieldValue> {
        self.fields.get(field, fiscal_year)
    }

    pub fn number(&self, field: Field, fiscal_year: i32) -> Option<f64> {
        self.fields.number(field, fiscal_year)
    }

    /// "wrds", "override", or None when missing
    pub fn source_of(&self, field: Field, fiscal_year: i32) -> Option<String> {
        self.get(field, fiscal_year)
            .and_then(|v| v.source.as_ref())
            .map(ToString::to_string)
    }

    /// Market cap + net debt (+ toggles); never stored as a FieldValue
    pub fn computed_enterprise_value(&self, fiscal_year: i32) -> Option<f64> {
        self.metrics.get(&fiscal_year).and_then(|m| m.computed_ev)
    }

    pub fn multiple(&self, multiple: Multiple, fiscal_year: i32) -> Option<f64> {
        self.metrics
            .get(&fiscal_year)
            .and_then(|m| m.multiples.get(&multiple).copied().flatten())
    }

    pub fn issues_for(&self, rule: RuleKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.rule == rule)
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }
}

// ============================================================================
// COVERAGE SUMMARY
// ============================================================================

/// How one source contributed to the run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCoverage {
    pub source: String,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
    /// Peers with an external id for this source or any record from it
    pub peers_mapped: usize,
    /// Supplied every required FieldKey
    pub fully_resolved: usize,
    pub partially_resolved: usize,
    pub not_resolved: usize,
    /// Final values this source supplied
    pub fields_won: usize,
    /// Rejected by the validity predicate
    pub records_filtered_out: usize,
    /// Valid duplicates that lost on the selection order
    pub records_superseded: usize,
    /// Outside the configured fiscal years
    pub records_out_of_scope: usize,
    pub unmatched_records: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmatched_keys: Vec<String>,
}

impl SourceCoverage {
    pub fn new(source: &str) -> Self {
        SourceCoverage {
            source: source.to_string(),
            available: true,
            ..Default::default()
        }
    }

    pub fn unavailable(source: &str, reason: impl Into<String>) -> Self {
        SourceCoverage {
            source: source.to_string(),
            available: false,
            unavailable_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub valuation_year: i32,
    pub fiscal_years: Vec<i32>,
    pub ev_mode: EvMode,
    pub mixed_sources: bool,
    pub peers: usize,
    pub sources: Vec<SourceCoverage>,
    pub missing_fields: usize,
    pub missing_by_field: BTreeMap<FieldKey, usize>,
    pub issues_by_severity: BTreeMap<Severity, usize>,
    pub issues_by_rule: BTreeMap<RuleKind, usize>,
    pub overrides_applied: usize,
    pub unmatched_overrides: Vec<UnmatchedOverride>,
    pub coverage_gaps: usize,
    pub stats: GroupStats,
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub records: Vec<ReconciledPeerRecord>,
    pub summary: CoverageSummary,
    /// SHA-256 of the serialized records
    pub fingerprint: String,
}

impl ReconciliationReport {
    pub fn assemble(
        config: &ReconciliationConfig,
        valuation_year: i32,
        records: Vec<ReconciledPeerRecord>,
        sources: Vec<SourceCoverage>,
        overrides: OverrideOutcome,
        stats: GroupStats,
    ) -> Self {
        let mut missing_by_field = BTreeMap::new();
        let mut issues_by_severity = BTreeMap::new();
        let mut issues_by_rule = BTreeMap::new();

        for record in &records {
            for value in record.fields.missing() {
                *missing_by_field.entry(value.key).or_insert(0) += 1;
            }
            for issue in &record.issues {
                *issues_by_severity.entry(issue.severity).or_insert(0) += 1;
                *issues_by_rule.entry(issue.rule).or_insert(0) += 1;
            }
        }

        let summary = CoverageSummary {
            valuation_year,
            fiscal_years: config.years(),
            ev_mode: config.ev_mode,
            mixed_sources: config.mixed_sources,
            peers: records.len(),
            sources,
            missing_fields: missing_by_field.values().sum(),
            missing_by_field,
            issues_by_severity,
            issues_by_rule,
            overrides_applied: overrides.applied,
            unmatched_overrides: overrides.unmatched,
            coverage_gaps: records.iter().map(|r| r.coverage_gaps.len()).sum(),
            stats,
        };

        let fingerprint = fingerprint(&records);

        ReconciliationReport {
            records,
            summary,
            fingerprint,
        }
    }

    pub fn record(&self, entity: &str) -> Option<&ReconciledPeerRecord> {
        self.records
            .iter()
            .find(|r| r.entity().eq_ignore_ascii_case(entity))
    }

    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.records.iter().flat_map(|r| r.issues.iter())
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.summary
            .issues_by_severity
            .get(&severity)
            .copied()
            .unwrap_or(0)
    }

    pub fn overridden(&self) -> impl Iterator<Item = &FieldValue> {
        self.records
            .iter()
            .flat_map(|r| r.fields.values.values())
            .filter(|v| v.status == FieldStatus::Overridden)
    }

    /// One-line overview for logs
    pub fn headline(&self) -> String {
        format!(
            "{} peers, {} missing fields, issues: {} error / {} warning / {} info",
            self.summary.peers,
            self.summary.missing_fields,
            self.count(Severity::Error),
            self.count(Severity::Warning),
            self.count(Severity::Info),
        )
    }
}

fn fingerprint(records: &[ReconciledPeerRecord]) -> String {
    let bytes = match serde_json::to_vec(records) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "could not serialize records for fingerprint");
            Vec::new()
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
