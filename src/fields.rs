// 🏛️ Field Vocabulary - the fixed internal set of fields the engine consumes
// Every source maps its own labels onto these names; nothing else survives
// normalization.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// FIELD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    SharePrice,
    MarketCap,
    EnterpriseValue,
    GrossDebt,
    Cash,
    NetDebt,
    MinorityInterest,
    LeaseLiabilities,
    Revenue,
    Ebitda,
    Ebit,
    DepreciationAmortization,
    EquityBeta,
    FxToEur,
    Currency,
}

/// How a field's value is expressed once normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Currency amount, always in units (not thousands/millions)
    Monetary,
    /// Currency per share
    PerShare,
    /// Dimensionless number (beta, FX rate)
    Scalar,
    /// Free text (ISO currency code)
    Text,
}

impl Field {
    pub const ALL: [Field; 15] = [
        Field::SharePrice,
        Field::MarketCap,
        Field::EnterpriseValue,
        Field::GrossDebt,
        Field::Cash,
        Field::NetDebt,
        Field::MinorityInterest,
        Field::LeaseLiabilities,
        Field::Revenue,
        Field::Ebitda,
        Field::Ebit,
        Field::DepreciationAmortization,
        Field::EquityBeta,
        Field::FxToEur,
        Field::Currency,
    ];

    /// Canonical snake_case name
    pub fn name(&self) -> &'static str {
        match self {
            Field::SharePrice => "share_price",
            Field::MarketCap => "market_cap",
            Field::EnterpriseValue => "enterprise_value",
            Field::GrossDebt => "gross_debt",
            Field::Cash => "cash",
            Field::NetDebt => "net_debt",
            Field::MinorityInterest => "minority_interest",
            Field::LeaseLiabilities => "lease_liabilities",
            Field::Revenue => "revenue",
            Field::Ebitda => "ebitda",
            Field::Ebit => "ebit",
            Field::DepreciationAmortization => "depreciation_amortization",
            Field::EquityBeta => "equity_beta",
            Field::FxToEur => "fx_to_eur",
            Field::Currency => "currency",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::SharePrice => FieldKind::PerShare,
            Field::EquityBeta | Field::FxToEur => FieldKind::Scalar,
            Field::Currency => FieldKind::Text,
            _ => FieldKind::Monetary,
        }
    }

    /// Income-statement fields that differ per fiscal year. The rest are
    /// point-in-time figures that only matter in the valuation year.
    pub fn is_periodic(&self) -> bool {
        matches!(
            self,
            Field::Revenue | Field::Ebitda | Field::Ebit | Field::DepreciationAmortization
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.kind() != FieldKind::Text
    }

    /// Default unit when neither the value nor the source table declares one
    pub fn default_unit(&self) -> Unit {
        match self.kind() {
            FieldKind::Monetary | FieldKind::PerShare => Unit::Units,
            FieldKind::Scalar => Unit::Ratio,
            FieldKind::Text => Unit::Text,
        }
    }

    /// Labels commonly used by providers for this field. Matched
    /// case-insensitively by the normalizer before any source-specific alias.
    pub fn common_labels(&self) -> &'static [&'static str] {
        match self {
            Field::SharePrice => &["Share Price", "Last Close", "Close", "prcc_f"],
            Field::MarketCap => &["Market Cap", "marketCap", "Market Capitalization"],
            Field::EnterpriseValue => &["Enterprise Value", "enterpriseValue", "EV"],
            Field::GrossDebt => &["Total Debt", "Gross Debt", "totalDebt"],
            Field::Cash => &[
                "Cash",
                "Cash And Cash Equivalents",
                "Cash And Cash Equivalents Including Short Term Investments",
            ],
            Field::NetDebt => &["Net Debt", "netDebt"],
            Field::MinorityInterest => &["Minority Interest", "Noncontrolling Interest"],
            Field::LeaseLiabilities => &["Lease Liabilities", "Operating Lease Liabilities"],
            Field::Revenue => &["Revenue", "Total Revenue", "TotalRevenue", "Sales", "revt"],
            Field::Ebitda => &["EBITDA", "Normalized EBITDA", "ebitda"],
            Field::Ebit => &["EBIT", "Operating Income", "OperatingIncome", "ebit"],
            Field::DepreciationAmortization => &[
                "Depreciation And Amortization",
                "Depreciation & Amortization",
                "D&A",
                "dp",
            ],
            Field::EquityBeta => &["Beta", "Equity Beta", "beta"],
            Field::FxToEur => &["FX to EUR", "fx_rate"],
            Field::Currency => &["Currency", "curcd"],
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownField(s.to_string()))
    }
}

// ============================================================================
// FIELD KEY
// ============================================================================

/// One field in one fiscal year. Serialized as `field:year` so it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FieldKey {
    pub field: Field,
    pub fiscal_year: i32,
}

impl FieldKey {
    pub fn new(field: Field, fiscal_year: i32) -> Self {
        FieldKey { field, fiscal_year }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.field, self.fiscal_year)
    }
}

impl From<FieldKey> for String {
    fn from(key: FieldKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for FieldKey {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (field, year) = value
            .split_once(':')
            .ok_or_else(|| ConfigError::UnknownField(value.clone()))?;
        let fiscal_year = year
            .trim()
            .parse::<i32>()
            .map_err(|_| ConfigError::UnknownField(value.clone()))?;
        Ok(FieldKey::new(field.parse()?, fiscal_year))
    }
}

// ============================================================================
// FIELD DATA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldData {
    Number(f64),
    Text(String),
}

impl FieldData {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldData::Number(n) => Some(*n),
            FieldData::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldData::Text(s) => Some(s),
            FieldData::Number(_) => None,
        }
    }

    /// Whether `other` disagrees with `self` beyond a relative tolerance.
    /// Numbers are compared relative to `self`; text case-insensitively.
    pub fn differs_from(&self, other: &FieldData, tolerance: f64) -> bool {
        match (self, other) {
            (FieldData::Number(a), FieldData::Number(b)) => {
                if a == b {
                    return false;
                }
                if *a == 0.0 {
                    return true;
                }
                ((a - b) / a).abs() > tolerance
            }
            (FieldData::Text(a), FieldData::Text(b)) => !a.trim().eq_ignore_ascii_case(b.trim()),
            _ => true,
        }
    }
}

impl fmt::Display for FieldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldData::Number(n) => write!(f, "{}", n),
            FieldData::Text(s) => f.write_str(s),
        }
    }
}

// ============================================================================
// UNITS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Unit {
    Units,
    Thousands,
    Millions,
    Billions,
    Ratio,
    Percent,
    Text,
}

impl Unit {
    /// Parse a unit label as providers spell it
    pub fn parse(label: &str) -> Option<Unit> {
        let normalized = label.trim().to_lowercase();
        let unit = match normalized.as_str() {
            "" | "1" | "unit" | "units" | "ones" | "ccy" => Unit::Units,
            "k" | "thousand" | "thousands" | "000" | "000s" | "ccy k" => Unit::Thousands,
            "m" | "mm" | "mn" | "mio" | "million" | "millions" | "ccy m" => Unit::Millions,
            "b" | "bn" | "billion" | "billions" | "ccy bn" => Unit::Billions,
            "x" | "ratio" | "pure" | "scalar" => Unit::Ratio,
            "%" | "pct" | "percent" => Unit::Percent,
            "text" | "string" | "code" => Unit::Text,
            _ => return None,
        };
        Some(unit)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Unit::Units => "units",
            Unit::Thousands => "thousands",
            Unit::Millions => "millions",
            Unit::Billions => "billions",
            Unit::Ratio => "ratio",
            Unit::Percent => "percent",
            Unit::Text => "text",
        }
    }

    /// Multiplier that brings a value in this unit to canonical scale
    pub fn scale(&self) -> f64 {
        match self {
            Unit::Units | Unit::Ratio | Unit::Text => 1.0,
            Unit::Thousands => 1e3,
            Unit::Millions => 1e6,
            Unit::Billions => 1e9,
            Unit::Percent => 0.01,
        }
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.name().to_string()
    }
}

impl TryFrom<String> for Unit {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Unit::parse(&value).ok_or(ConfigError::UnknownUnit(value))
    }
}

// ============================================================================
// TESTS
// ============================================================================
