// ✅ Quality Control Engine - deterministic checks over reconciled peers
//
// Every rule reads the merged (and overridden) fields, the peer-group
// statistics and its own thresholds. Rules never see each other's output,
// so disabling one leaves the rest byte-identical.

pub mod rules;
pub mod stats;

use crate::config::ReconciliationConfig;
use crate::fields::FieldKey;
use crate::merge::PeerFields;
use crate::metrics::EvBasis;
use crate::overrides::Explanation;
use crate::peers::Peer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use stats::{GroupStats, MultipleStats, PeerGroupStats};

// ============================================================================
// SEVERITY & RULE KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,    // Worth a look, valuation still usable
    Warning, // Likely data problem
    Error,   // Valuation input unusable
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    EvReconciliation,
    ScalingOutlier,
    MissingRequiredField,
    DenominatorCheck,
    YearOverYear,
    LossMaking,
}

impl RuleKind {
    /// Evaluation order
    pub const ALL: [RuleKind; 6] = [
        RuleKind::EvReconciliation,
        RuleKind::ScalingOutlier,
        RuleKind::MissingRequiredField,
        RuleKind::DenominatorCheck,
        RuleKind::YearOverYear,
        RuleKind::LossMaking,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::EvReconciliation => "ev_reconciliation",
            RuleKind::ScalingOutlier => "scaling_outlier",
            RuleKind::MissingRequiredField => "missing_required_field",
            RuleKind::DenominatorCheck => "denominator_check",
            RuleKind::YearOverYear => "year_over_year",
            RuleKind::LossMaking => "loss_making",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// ISSUE
// ============================================================================

/// One QC finding. `values` carries the numbers behind the message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub entity: String,
    pub field: Option<FieldKey>,
    pub rule: RuleKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, f64>,
}

impl Issue {
    pub fn new(
        entity: &str,
        field: Option<FieldKey>,
        rule: RuleKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Issue {
            entity: entity.to_string(),
            field,
            rule,
            severity,
            message: message.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder: attach a supporting number
    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }
}

// ============================================================================
// RULE CONTEXT & TRAIT
// ============================================================================

/// Everything a rule may read about one peer
pub struct RuleContext<'a> {
    pub peer: &'a Peer,
    pub fields: &'a PeerFields,
    pub config: &'a ReconciliationConfig,
    pub basis: EvBasis,
    pub stats: &'a PeerGroupStats,
    /// Sorted fiscal years in scope
    pub years: &'a [i32],
    pub valuation_year: i32,
    pub explanations: &'a [Explanation],
}

impl<'a> RuleContext<'a> {
    pub fn entity(&self) -> &str {
        &self.fields.entity
    }

    pub fn is_explained(&self, key: FieldKey) -> bool {
        self.explanations
            .iter()
            .any(|e| e.covers(self.entity(), key))
    }

    /// Whether this peer's own multiples feed the group statistics
    pub fn in_stats_group(&self) -> bool {
        self.stats.includes(self.peer)
    }
}

pub trait QcRule {
    fn kind(&self) -> RuleKind;

    /// Pure: same context, same issues, same order
    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Issue>;
}

// ============================================================================
// QC ENGINE
// ============================================================================

pub struct QcEngine {
    rules: Vec<Box<dyn QcRule>>,
}

impl QcEngine {
    pub fn new() -> Self {
        QcEngine {
            rules: vec![
                Box::new(rules::EvReconciliationRule),
                Box::new(rules::ScalingOutlierRule),
                Box::new(rules::MissingRequiredFieldRule),
                Box::new(rules::DenominatorRule),
                Box::new(rules::YearOverYearRule),
                Box::new(rules::LossMakingRule),
            ],
        }
    }

    /// Run every enabled rule, in fixed order
    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Issue> {
        self.rules
            .iter()
            .filter(|rule| ctx.config.qc.is_enabled(rule.kind()))
            .flat_map(|rule| rule.evaluate(ctx))
            .collect()
    }
}

impl Default for QcEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_orders_by_gravity() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_rule_names_match_serde() {
        for rule in RuleKind::ALL {
            let json = serde_json::to_string(&rule).unwrap();
            assert_eq!(json, format!("\"{}\"", rule.name()));
        }
    }

    #[test]
    fn test_engine_runs_rules_in_fixed_order() {
        let engine = QcEngine::new();
        let kinds: Vec<RuleKind> = engine.rules.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, RuleKind::ALL.to_vec());
    }
}
