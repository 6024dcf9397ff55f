// 🔎 QC Rules - one struct per check
//
// Each rule reads only its own thresholds from QcConfig. Output order within
// a rule follows configuration order, then fiscal year.

use super::{Issue, QcRule, RuleContext, RuleKind, Severity};
use crate::config::EvMode;
use crate::fields::{Field, FieldKey};
use crate::metrics::Multiple;

// ============================================================================
// EV RECONCILIATION
// ============================================================================

/// Provider EV vs market cap + net debt (+ toggles)
pub struct EvReconciliationRule;

impl QcRule for EvReconciliationRule {
    fn kind(&self) -> RuleKind {
        RuleKind::EvReconciliation
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Issue> {
        let year = ctx.valuation_year;
        let provider = ctx.basis.provider_ev(ctx.fields, year);
        let computed = ctx.basis.computed_ev(ctx.fields, year);

        let (provider, computed) = match (provider, computed) {
            (Some(p), Some(c)) => (p, c),
            _ => return vec![],
        };

        let truth = match ctx.basis.mode {
            EvMode::ProviderTruth => provider,
            EvMode::ComputedTruth => computed,
        };
        if truth == 0.0 {
            return vec![];
        }

        let delta = provider - computed;
        let pct = delta / truth.abs();
        let tolerance = ctx.config.qc.ev_tolerance;
        if pct.abs() <= tolerance {
            return vec![];
        }

        vec![Issue::new(
            ctx.entity(),
            Some(FieldKey::new(Field::EnterpriseValue, year)),
            self.kind(),
            Severity::Warning,
            format!(
                "Provider EV {:.2} vs computed EV {:.2}: {:+.1}% apart (tolerance {:.1}%, {})",
                provider,
                computed,
                pct * 100.0,
                tolerance * 100.0,
                ctx.basis.mode.label()
            ),
        )
        .with_value("provider_ev", provider)
        .with_value("computed_ev", computed)
        .with_value("delta", delta)
        .with_value("pct_delta", pct)
        .with_value("tolerance", tolerance)]
    }
}

// ============================================================================
// SCALING OUTLIER
// ============================================================================

/// EV multiples outside a sanity band, or far from the peer group
pub struct ScalingOutlierRule;

impl QcRule for ScalingOutlierRule {
    fn kind(&self) -> RuleKind {
        RuleKind::ScalingOutlier
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Issue> {
        let thresholds = &ctx.config.qc.scaling;
        let year = ctx.valuation_year;
        let mut issues = Vec::new();

        for multiple in Multiple::ALL {
            let value = match ctx.basis.multiple(ctx.fields, multiple, year) {
                Some(v) if v.is_finite() => v,
                _ => continue,
            };
            let key = Some(FieldKey::new(multiple.denominator(), year));

            let band = match multiple {
                Multiple::EvSales => thresholds.max_ev_sales,
                Multiple::EvEbitda => thresholds.max_ev_ebitda,
                Multiple::EvEbit => thresholds.max_ev_ebit,
            };

            if value.abs() > band {
                issues.push(
                    Issue::new(
                        ctx.entity(),
                        key,
                        self.kind(),
                        Severity::Warning,
                        format!(
                            "{} of {:.1}x is outside the sanity band of {:.0}x: check units of {}",
                            multiple,
                            value,
                            band,
                            multiple.denominator()
                        ),
                    )
                    .with_value("multiple", value)
                    .with_value("band", band),
                );
                continue;
            }

            let stats = match ctx.stats.get(multiple) {
                Some(s) => s,
                None => continue,
            };
            let z = match stats.z_score(value, ctx.in_stats_group(), thresholds.min_peers_for_stats) {
                Some(z) => z,
                None => continue,
            };
            if z.abs() > thresholds.max_std_devs {
                let mut issue = Issue::new(
                    ctx.entity(),
                    key,
                    self.kind(),
                    Severity::Warning,
                    format!(
                        "{} of {:.1}x is {:.1} standard deviations from the peer group: check units of {}",
                        multiple,
                        value,
                        z.abs(),
                        multiple.denominator()
                    ),
                )
                .with_value("multiple", value)
                .with_value("z_score", z);
                if let Some(median) = stats.median {
                    issue = issue.with_value("group_median", median);
                }
                issues.push(issue);
            }
        }

        issues
    }
}

// ============================================================================
// MISSING REQUIRED FIELD
// ============================================================================

pub struct MissingRequiredFieldRule;

impl QcRule for MissingRequiredFieldRule {
    fn kind(&self) -> RuleKind {
        RuleKind::MissingRequiredField
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Issue> {
        let mut issues = Vec::new();

        for required in &ctx.config.qc.required_fields {
            for year in years_for(ctx, required.field) {
                let missing = ctx
                    .fields
                    .get(required.field, year)
                    .map_or(true, |v| v.is_missing());
                if !missing {
                    continue;
                }

                let purpose = if required.purpose.is_empty() {
                    String::new()
                } else {
                    format!(" (needed for {})", required.purpose)
                };
                issues.push(Issue::new(
                    ctx.entity(),
                    Some(FieldKey::new(required.field, year)),
                    self.kind(),
                    Severity::Error,
                    format!("MISSING SOURCE: {} {}{}", required.field, year, purpose),
                ));
            }
        }

        issues
    }
}

// ============================================================================
// DENOMINATOR CHECK
// ============================================================================

pub struct DenominatorRule;

impl QcRule for DenominatorRule {
    fn kind(&self) -> RuleKind {
        RuleKind::DenominatorCheck
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Issue> {
        let mut issues = Vec::new();

        for ratio in &ctx.config.qc.ratios {
            for year in years_for(ctx, ratio.denominator) {
                let key = FieldKey::new(ratio.denominator, year);
                let problem = match ctx.fields.number(ratio.denominator, year) {
                    None => Some(("missing", None)),
                    Some(v) if v == 0.0 => Some(("zero", Some(v))),
                    Some(v) if v < 0.0 && ratio.negative_invalid => Some(("negative", Some(v))),
                    Some(_) => None,
                };

                if let Some((what, value)) = problem {
                    let mut issue = Issue::new(
                        ctx.entity(),
                        Some(key),
                        self.kind(),
                        Severity::Error,
                        format!(
                            "{} undefined for {}: denominator {} is {}",
                            ratio.name, year, ratio.denominator, what
                        ),
                    );
                    if let Some(v) = value {
                        issue = issue.with_value("denominator", v);
                    }
                    issues.push(issue);
                }
            }
        }

        issues
    }
}

// ============================================================================
// YEAR OVER YEAR
// ============================================================================

/// Large movements between consecutive fiscal years; a gap in the
/// configured years is not compared across
pub struct YearOverYearRule;

impl QcRule for YearOverYearRule {
    fn kind(&self) -> RuleKind {
        RuleKind::YearOverYear
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Issue> {
        let thresholds = &ctx.config.qc.yoy;
        let mut issues = Vec::new();

        for &field in &thresholds.fields {
            for pair in ctx.years.windows(2) {
                let (prior_year, year) = (pair[0], pair[1]);
                if year - prior_year != 1 {
                    continue;
                }
                let key = FieldKey::new(field, year);
                if ctx.is_explained(key) {
                    continue;
                }

                let (prior, current) = match (ctx.fields.number(field, prior_year), ctx.fields.number(field, year)) {
                    (Some(p), Some(c)) if p != 0.0 => (p, c),
                    _ => continue,
                };

                let ratio = current / prior;
                let change = (current - prior) / prior.abs();

                let severity = if ratio.abs() > thresholds.warning_factor
                    || ratio.abs() < 1.0 / thresholds.warning_factor
                {
                    Severity::Warning
                } else if change.abs() > thresholds.info_change {
                    Severity::Info
                } else {
                    continue;
                };

                issues.push(
                    Issue::new(
                        ctx.entity(),
                        Some(key),
                        self.kind(),
                        severity,
                        format!(
                            "{} moved {:+.1}% from {} to {} ({:.2} -> {:.2})",
                            field,
                            change * 100.0,
                            prior_year,
                            year,
                            prior,
                            current
                        ),
                    )
                    .with_value("prior", prior)
                    .with_value("current", current)
                    .with_value("ratio", ratio),
                );
            }
        }

        issues
    }
}

// ============================================================================
// LOSS MAKING
// ============================================================================

pub struct LossMakingRule;

impl QcRule for LossMakingRule {
    fn kind(&self) -> RuleKind {
        RuleKind::LossMaking
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Issue> {
        let mut issues = Vec::new();

        for &field in &ctx.config.qc.loss_fields {
            for &year in ctx.years {
                if let Some(v) = ctx.fields.number(field, year) {
                    if v < 0.0 {
                        issues.push(
                            Issue::new(
                                ctx.entity(),
                                Some(FieldKey::new(field, year)),
                                self.kind(),
                                Severity::Info,
                                format!("Negative {} in {}: EV/{} is not meaningful", field, year, field),
                            )
                            .with_value("value", v),
                        );
                    }
                }
            }
        }

        issues
    }
}

/// Periodic fields are checked in every year, point-in-time ones in the valuation year only
fn years_for(ctx: &RuleContext<'_>, field: Field) -> Vec<i32> {
    if field.is_periodic() {
        ctx.years.to_vec()
    } else {
        vec![ctx.valuation_year]
    }
}

// ============================================================================
// TESTS
// ============================================================================
