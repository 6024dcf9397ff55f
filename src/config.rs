// ⚙️ Run Configuration - one immutable object passed to every stage
//
// Loaded from JSON, validated once before any data is touched. A config that
// fails validation aborts the run: there is no safe partial result.

use crate::error::ConfigError;
use crate::fields::Field;
use crate::qc::RuleKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

// ============================================================================
// EV MODE
// ============================================================================

/// Which enterprise value the EV reconciliation treats as ground truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvMode {
    /// EV as reported by the provider
    #[default]
    ProviderTruth,
    /// Market cap + net debt (+ toggles)
    ComputedTruth,
}

impl EvMode {
    pub fn name(&self) -> &'static str {
        match self {
            EvMode::ProviderTruth => "provider_truth",
            EvMode::ComputedTruth => "computed_truth",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EvMode::ProviderTruth => "Provider EV as truth",
            EvMode::ComputedTruth => "Computed EV = Market Cap + Net Debt (+ toggles)",
        }
    }
}

// ============================================================================
// QC THRESHOLDS
// ============================================================================

/// A field QC requires, and what it is needed for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredField {
    pub field: Field,
    #[serde(default)]
    pub purpose: String,
}

impl RequiredField {
    pub fn new(field: Field, purpose: impl Into<String>) -> Self {
        RequiredField {
            field,
            purpose: purpose.into(),
        }
    }
}

/// A ratio whose denominator QC checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioCheck {
    pub name: String,
    pub denominator: Field,
    /// Negative denominators make the ratio meaningless
    #[serde(default)]
    pub negative_invalid: bool,
}

impl RatioCheck {
    pub fn new(name: impl Into<String>, denominator: Field, negative_invalid: bool) -> Self {
        RatioCheck {
            name: name.into(),
            denominator,
            negative_invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingThresholds {
    /// Absolute sanity bands on EV multiples
    pub max_ev_sales: f64,
    pub max_ev_ebitda: f64,
    pub max_ev_ebit: f64,
    /// Distance from the peer-group mean, in standard deviations
    pub max_std_devs: f64,
    /// Below this many peers the statistical test is skipped
    pub min_peers_for_stats: usize,
}

impl Default for ScalingThresholds {
    fn default() -> Self {
        ScalingThresholds {
            max_ev_sales: 20.0,
            max_ev_ebitda: 50.0,
            max_ev_ebit: 80.0,
            max_std_devs: 3.0,
            min_peers_for_stats: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoyThresholds {
    /// Relative change that earns an info finding
    pub info_change: f64,
    /// current/prior ratio (or its inverse) that earns a warning
    pub warning_factor: f64,
    pub fields: Vec<Field>,
}

impl Default for YoyThresholds {
    fn default() -> Self {
        YoyThresholds {
            info_change: 0.5,
            warning_factor: 10.0,
            fields: vec![Field::Revenue, Field::Ebitda, Field::Ebit],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    pub disabled_rules: BTreeSet<RuleKind>,
    /// Relative EV tolerance (0.05 = 5%)
    pub ev_tolerance: f64,
    pub scaling: ScalingThresholds,
    pub required_fields: Vec<RequiredField>,
    pub ratios: Vec<RatioCheck>,
    pub yoy: YoyThresholds,
    pub loss_fields: Vec<Field>,
}

impl Default for QcConfig {
    fn default() -> Self {
        QcConfig {
            disabled_rules: BTreeSet::new(),
            ev_tolerance: 0.05,
            scaling: ScalingThresholds::default(),
            required_fields: vec![
                RequiredField::new(Field::MarketCap, "equity value / computed EV"),
                RequiredField::new(Field::EnterpriseValue, "EV multiples"),
                RequiredField::new(Field::NetDebt, "computed EV and leverage"),
                RequiredField::new(Field::EquityBeta, "cost of equity inputs"),
                RequiredField::new(Field::Revenue, "EV/Sales"),
                RequiredField::new(Field::Ebitda, "EV/EBITDA"),
                RequiredField::new(Field::Ebit, "EV/EBIT"),
            ],
            ratios: vec![
                RatioCheck::new("EV/Sales", Field::Revenue, true),
                RatioCheck::new("EV/EBITDA", Field::Ebitda, false),
                RatioCheck::new("EV/EBIT", Field::Ebit, false),
                RatioCheck::new("Net Debt/Market Cap", Field::MarketCap, true),
            ],
            yoy: YoyThresholds::default(),
            loss_fields: vec![Field::Ebitda, Field::Ebit],
        }
    }
}

impl QcConfig {
    pub fn is_enabled(&self, rule: RuleKind) -> bool {
        !self.disabled_rules.contains(&rule)
    }

    /// Builder: switch a rule off
    pub fn without(mut self, rule: RuleKind) -> Self {
        self.disabled_rules.insert(rule);
        self
    }
}

// ============================================================================
// RECONCILIATION CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Source identifiers, highest priority first
    pub precedence: Vec<String>,

    /// Resolve each field independently across sources
    #[serde(default)]
    pub mixed_sources: bool,

    /// Fiscal years in scope; the latest is the valuation year
    pub fiscal_years: Vec<i32>,

    #[serde(default)]
    pub ev_mode: EvMode,

    /// Add minority interest to the computed EV
    #[serde(default)]
    pub include_minority_interest: bool,

    /// Add lease liabilities to the computed EV
    #[serde(default)]
    pub include_leases: bool,

    /// Relative disagreement between sources that marks a field `conflicting`
    #[serde(default = "default_conflict_tolerance")]
    pub conflict_tolerance: Option<f64>,

    /// Compute peer-group statistics over `selected` peers only
    #[serde(default)]
    pub stats_selected_only: bool,

    #[serde(default)]
    pub qc: QcConfig,
}

fn default_conflict_tolerance() -> Option<f64> {
    Some(0.10)
}

impl ReconciliationConfig {
    pub fn new(precedence: Vec<&str>, fiscal_years: Vec<i32>) -> Self {
        ReconciliationConfig {
            precedence: precedence.into_iter().map(str::to_string).collect(),
            mixed_sources: false,
            fiscal_years,
            ev_mode: EvMode::default(),
            include_minority_interest: false,
            include_leases: false,
            conflict_tolerance: default_conflict_tolerance(),
            stats_selected_only: false,
            qc: QcConfig::default(),
        }
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: ReconciliationConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        Ok(config)
    }

    /// Sorted, de-duplicated fiscal years
    pub fn years(&self) -> Vec<i32> {
        let set: BTreeSet<i32> = self.fiscal_years.iter().copied().collect();
        set.into_iter().collect()
    }

    /// Latest configured fiscal year
    pub fn valuation_year(&self) -> Option<i32> {
        self.fiscal_years.iter().copied().max()
    }

    /// Check internal consistency against the sources that have a normalization table
    pub fn validate<'a, I>(&self, known_sources: I) -> std::result::Result<(), ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.precedence.is_empty() {
            return Err(ConfigError::EmptyPrecedence);
        }

        let known: BTreeSet<&str> = known_sources.into_iter().collect();
        let mut seen = BTreeSet::new();
        for source in &self.precedence {
            if !seen.insert(source.as_str()) {
                return Err(ConfigError::DuplicateSource(source.clone()));
            }
            if !known.contains(source.as_str()) {
                return Err(ConfigError::UnknownSource(source.clone()));
            }
        }

        if self.fiscal_years.is_empty() {
            return Err(ConfigError::NoFiscalYears);
        }

        if let Some(tol) = self.conflict_tolerance {
            check_threshold("conflict_tolerance", tol, 0.0)?;
        }

        let qc = &self.qc;
        check_positive("qc.ev_tolerance", qc.ev_tolerance)?;
        check_positive("qc.scaling.max_ev_sales", qc.scaling.max_ev_sales)?;
        check_positive("qc.scaling.max_ev_ebitda", qc.scaling.max_ev_ebitda)?;
        check_positive("qc.scaling.max_ev_ebit", qc.scaling.max_ev_ebit)?;
        check_positive("qc.scaling.max_std_devs", qc.scaling.max_std_devs)?;
        check_positive("qc.yoy.info_change", qc.yoy.info_change)?;
        if !(qc.yoy.warning_factor.is_finite() && qc.yoy.warning_factor > 1.0) {
            return Err(ConfigError::InvalidThreshold {
                name: "qc.yoy.warning_factor".to_string(),
                value: qc.yoy.warning_factor,
            });
        }

        Ok(())
    }
}

fn check_positive(name: &str, value: f64) -> std::result::Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            name: name.to_string(),
            value,
        })
    }
}

fn check_threshold(name: &str, value: f64, min: f64) -> std::result::Result<(), ConfigError> {
    if value.is_finite() && value >= min {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold {
            name: name.to_string(),
            value,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_known_sources() {
        let config = ReconciliationConfig::new(vec!["wrds", "yahoo"], vec![2023, 2024]);
        assert!(config.validate(["yahoo", "wrds"]).is_ok());
        assert_eq!(config.valuation_year(), Some(2024));
    }

    #[test]
    fn test_validate_rejects_unknown_and_duplicate_sources() {
        let config = ReconciliationConfig::new(vec!["wrds", "bloomberg"], vec![2024]);
        assert_eq!(
            config.validate(["wrds"]),
            Err(ConfigError::UnknownSource("bloomberg".to_string()))
        );

        let config = ReconciliationConfig::new(vec!["wrds", "wrds"], vec![2024]);
        assert_eq!(
            config.validate(["wrds"]),
            Err(ConfigError::DuplicateSource("wrds".to_string()))
        );

        let config = ReconciliationConfig::new(vec![], vec![2024]);
        assert_eq!(config.validate(["wrds"]), Err(ConfigError::EmptyPrecedence));
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = ReconciliationConfig::new(vec!["wrds"], vec![2024]);
        config.qc.ev_tolerance = 0.0;
        assert!(matches!(
            config.validate(["wrds"]),
            Err(ConfigError::InvalidThreshold { .. })
        ));

        let mut config = ReconciliationConfig::new(vec!["wrds"], vec![2024]);
        config.qc.yoy.warning_factor = 0.5;
        assert!(config.validate(["wrds"]).is_err());

        let config = ReconciliationConfig::new(vec!["wrds"], vec![]);
        assert_eq!(config.validate(["wrds"]), Err(ConfigError::NoFiscalYears));
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "precedence": ["wrds", "yahoo"],
            "fiscal_years": [2024, 2023, 2024],
            "ev_mode": "computed_truth",
            "qc": { "ev_tolerance": 0.1, "disabled_rules": ["loss_making"] }
        }"#;

        let config: ReconciliationConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.ev_mode, EvMode::ComputedTruth);
        assert!(!config.mixed_sources);
        assert_eq!(config.conflict_tolerance, Some(0.10));
        assert_eq!(config.years(), vec![2023, 2024]);
        assert_eq!(config.qc.ev_tolerance, 0.1);
        assert_eq!(config.qc.scaling.max_ev_ebitda, 50.0);
        assert!(!config.qc.is_enabled(RuleKind::LossMaking));
        assert!(config.qc.is_enabled(RuleKind::EvReconciliation));
        assert_eq!(config.qc.required_fields.len(), 7);
    }

    #[test]
    fn test_json_rejects_unknown_field_names() {
        let json = r#"{
            "precedence": ["wrds"],
            "fiscal_years": [2024],
            "qc": { "loss_fields": ["net_income"] }
        }"#;
        assert!(serde_json::from_str::<ReconciliationConfig>(json).is_err());
    }
}
