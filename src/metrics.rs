// 📐 Derived Metrics - computed EV and EV multiples
//
// Read-only helpers over merged fields. Nothing here is stored back as a
// FieldValue: the provider EV stays the EV field, the computed EV is derived
// on demand.

use crate::config::{EvMode, ReconciliationConfig};
use crate::fields::Field;
use crate::merge::PeerFields;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How to build and pick the enterprise value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvBasis {
    pub mode: EvMode,
    pub include_minority_interest: bool,
    pub include_leases: bool,
}

impl EvBasis {
    pub fn from_config(config: &ReconciliationConfig) -> Self {
        EvBasis {
            mode: config.ev_mode,
            include_minority_interest: config.include_minority_interest,
            include_leases: config.include_leases,
        }
    }

    /// Market cap + net debt (+ minority interest, + leases when enabled).
    /// Toggled components that are missing count as zero.
    pub fn computed_ev(&self, fields: &PeerFields, year: i32) -> Option<f64> {
        let market_cap = fields.number(Field::MarketCap, year)?;
        let net_debt = fields.number(Field::NetDebt, year)?;

        let mut ev = market_cap + net_debt;
        if self.include_minority_interest {
            ev += fields.number(Field::MinorityInterest, year).unwrap_or(0.0);
        }
        if self.include_leases {
            ev += fields.number(Field::LeaseLiabilities, year).unwrap_or(0.0);
        }
        Some(ev)
    }

    pub fn provider_ev(&self, fields: &PeerFields, year: i32) -> Option<f64> {
        fields.number(Field::EnterpriseValue, year)
    }

    /// The EV treated as truth: feeds the multiples
    pub fn valuation_ev(&self, fields: &PeerFields, year: i32) -> Option<f64> {
        match self.mode {
            EvMode::ProviderTruth => self.provider_ev(fields, year),
            EvMode::ComputedTruth => self.computed_ev(fields, year),
        }
    }

    pub fn multiple(&self, fields: &PeerFields, multiple: Multiple, year: i32) -> Option<f64> {
        metric_multiple(
            self.valuation_ev(fields, year),
            fields.number(multiple.denominator(), year),
        )
    }
}

/// A reported amount converted with the peer's FX rate to EUR for that year
pub fn in_eur(fields: &PeerFields, field: Field, year: i32) -> Option<f64> {
    let amount = fields.number(field, year)?;
    let fx = fields.number(Field::FxToEur, year)?;
    Some(amount * fx)
}

// ============================================================================
// MULTIPLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Multiple {
    #[serde(rename = "EV/Sales")]
    EvSales,
    #[serde(rename = "EV/EBITDA")]
    EvEbitda,
    #[serde(rename = "EV/EBIT")]
    EvEbit,
}

impl Multiple {
    pub const ALL: [Multiple; 3] = [Multiple::EvSales, Multiple::EvEbitda, Multiple::EvEbit];

    pub fn denominator(&self) -> Field {
        match self {
            Multiple::EvSales => Field::Revenue,
            Multiple::EvEbitda => Field::Ebitda,
            Multiple::EvEbit => Field::Ebit,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Multiple::EvSales => "EV/Sales",
            Multiple::EvEbitda => "EV/EBITDA",
            Multiple::EvEbit => "EV/EBIT",
        }
    }
}

impl fmt::Display for Multiple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// EV / denominator; undefined when either side is missing or the denominator is zero
pub fn metric_multiple(ev: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (ev, denominator) {
        (Some(ev), Some(d)) if d != 0.0 => Some(ev / d),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldData, FieldKey};
    use crate::merge::FieldValue;
    use std::collections::BTreeMap;

    fn fields(values: &[(Field, f64)]) -> PeerFields {
        let mut map = BTreeMap::new();
        for field in Field::ALL {
            let key = FieldKey::new(field, 2024);
            map.insert(key, FieldValue::missing(key));
        }
        for (field, v) in values {
            let key = FieldKey::new(*field, 2024);
            map.insert(key, FieldValue::resolved(key, FieldData::Number(*v), "src", None));
        }
        PeerFields {
            entity: "ACME".to_string(),
            primary_source: None,
            values: map,
        }
    }

    fn basis(mode: EvMode) -> EvBasis {
        EvBasis {
            mode,
            include_minority_interest: false,
            include_leases: false,
        }
    }

    #[test]
    fn test_computed_ev_with_toggles() {
        let f = fields(&[
            (Field::MarketCap, 100.0),
            (Field::NetDebt, 20.0),
            (Field::MinorityInterest, 5.0),
        ]);

        assert_eq!(basis(EvMode::ComputedTruth).computed_ev(&f, 2024), Some(120.0));

        let with_mi = EvBasis {
            include_minority_interest: true,
            include_leases: true,
            ..basis(EvMode::ComputedTruth)
        };
        assert_eq!(with_mi.computed_ev(&f, 2024), Some(125.0));
    }

    #[test]
    fn test_valuation_ev_follows_mode() {
        let f = fields(&[
            (Field::MarketCap, 100.0),
            (Field::NetDebt, 20.0),
            (Field::EnterpriseValue, 125.0),
            (Field::Ebitda, 10.0),
        ]);

        assert_eq!(basis(EvMode::ProviderTruth).valuation_ev(&f, 2024), Some(125.0));
        assert_eq!(basis(EvMode::ComputedTruth).valuation_ev(&f, 2024), Some(120.0));
        assert_eq!(basis(EvMode::ComputedTruth).multiple(&f, Multiple::EvEbitda, 2024), Some(12.0));
        assert_eq!(basis(EvMode::ComputedTruth).multiple(&f, Multiple::EvEbit, 2024), None);
    }

    #[test]
    fn test_eur_conversion_needs_fx_rate() {
        let f = fields(&[(Field::MarketCap, 100.0), (Field::NetDebt, 20.0), (Field::FxToEur, 0.5)]);
        assert_eq!(in_eur(&f, Field::MarketCap, 2024), Some(50.0));
        assert_eq!(in_eur(&f, Field::NetDebt, 2024), Some(10.0));

        let no_fx = fields(&[(Field::MarketCap, 100.0)]);
        assert_eq!(in_eur(&no_fx, Field::MarketCap, 2024), None);
    }

    #[test]
    fn test_metric_multiple_zero_denominator() {
        assert_eq!(metric_multiple(Some(10.0), Some(0.0)), None);
        assert_eq!(metric_multiple(None, Some(2.0)), None);
        assert_eq!(metric_multiple(Some(10.0), Some(-2.0)), Some(-5.0));
    }
}
