use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{Money, Rate};

// ---------------------------------------------------------------------------
// Rule data model
// ---------------------------------------------------------------------------

/// How an incentive's face value is converted to usable cash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonetizationMethod {
    /// Refundable credit paid directly by the tax authority
    DirectRefund,
    /// Credit sold to a third party at a discount
    TransferSale,
    /// Credit applied against the production entity's own tax liability
    TaxOffset,
    /// Credit pledged as collateral for a bridge loan
    LoanCollateralized,
}

impl fmt::Display for MonetizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MonetizationMethod::DirectRefund => "direct_refund",
            MonetizationMethod::TransferSale => "transfer_sale",
            MonetizationMethod::TaxOffset => "tax_offset",
            MonetizationMethod::LoanCollateralized => "loan_collateralized",
        };
        f.write_str(s)
    }
}

/// Cost and timing terms for one supported monetization method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonetizationTerms {
    pub method: MonetizationMethod,
    /// Fraction of the gross credit lost to broker/transfer discount
    pub discount_rate: Rate,
    /// Fraction of the gross credit lost to tax on the benefit itself
    pub tax_cost_rate: Rate,
    /// Months from qualifying spend to cash receipt
    pub months_to_cash: u32,
}

/// A single band of a tiered rate schedule. `up_to` is the cumulative spend
/// ceiling for the band; the final band leaves it open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateBand {
    pub up_to: Option<Money>,
    pub rate: Rate,
}

/// Credit rate: a flat rate or a tiered schedule where lower bands fill first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateSchedule {
    Flat { rate: Rate },
    Tiered { bands: Vec<RateBand> },
}

impl RateSchedule {
    /// Gross credit earned on `basis` before caps. Tiered bands are applied
    /// bottom-up: spend fills the lowest band, then the next, and so on.
    pub fn gross_credit(&self, basis: Money) -> Money {
        match self {
            RateSchedule::Flat { rate } => basis * rate,
            RateSchedule::Tiered { bands } => {
                let mut credit = Decimal::ZERO;
                let mut prev_ceiling = Decimal::ZERO;
                for band in bands {
                    let ceiling = band.up_to.unwrap_or(Money::MAX);
                    if basis <= prev_ceiling {
                        break;
                    }
                    let band_spend = basis.min(ceiling) - prev_ceiling;
                    credit += band_spend * band.rate;
                    prev_ceiling = ceiling;
                }
                credit
            }
        }
    }

    /// Marginal (top-band) rate, used for reporting.
    pub fn headline_rate(&self) -> Rate {
        match self {
            RateSchedule::Flat { rate } => *rate,
            RateSchedule::Tiered { bands } => {
                bands.last().map(|b| b.rate).unwrap_or(Decimal::ZERO)
            }
        }
    }
}

/// Per-rule ceiling on the gross credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CreditCap {
    None,
    Absolute { amount: Money },
    PctOfBudget { pct: Rate },
}

impl CreditCap {
    /// Clamp `credit` to the cap, resolving percentage caps against `budget`.
    pub fn clamp(&self, credit: Money, budget: Money) -> Money {
        match self {
            CreditCap::None => credit,
            CreditCap::Absolute { amount } => credit.min(*amount),
            CreditCap::PctOfBudget { pct } => credit.min(budget * pct),
        }
    }
}

/// Which spend figure the rate applies to. Some programs credit only local
/// qualifying spend; others credit the full production budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditBasis {
    JurisdictionSpend,
    TotalBudget,
}

/// Outcome of a rule's qualification test. Uncertain does not block the
/// calculation; it surfaces as a warning on the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationStatus {
    Passed,
    Failed,
    Uncertain,
}

/// The cultural/content test a production must pass to qualify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualificationTest {
    pub name: String,
    pub status: QualificationStatus,
}

/// A jurisdictional subsidy program. Immutable once loaded; owned by the
/// external policy store and borrowed read-only by the calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsidyRule {
    pub id: String,
    pub jurisdiction: String,
    pub schedule: RateSchedule,
    pub cap: CreditCap,
    pub basis: CreditBasis,
    pub minimum_spend: Money,
    pub qualification: QualificationTest,
    pub methods: Vec<MonetizationTerms>,
}

impl SubsidyRule {
    pub fn terms_for(&self, method: MonetizationMethod) -> Option<&MonetizationTerms> {
        self.methods.iter().find(|t| t.method == method)
    }
}

// ---------------------------------------------------------------------------
// Per-jurisdiction spend input
// ---------------------------------------------------------------------------

/// Qualifying spend in a single jurisdiction, broken down by category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionSpend {
    pub jurisdiction: String,
    pub labor: Money,
    pub goods_services: Money,
    pub post_production: Money,
}

impl JurisdictionSpend {
    pub fn total(&self) -> Money {
        self.labor + self.goods_services + self.post_production
    }
}

// ---------------------------------------------------------------------------
// Policy store interface
// ---------------------------------------------------------------------------

/// Read-only access to subsidy-rule records. The authoritative store lives
/// outside the core; the core only needs lookup by id and by jurisdiction.
/// Stores are shared across parallel evaluation workers, hence `Sync`.
pub trait PolicyStore: Sync {
    fn rule(&self, id: &str) -> Option<&SubsidyRule>;
    fn rules_in(&self, jurisdiction: &str) -> Vec<&SubsidyRule>;
}

/// Policy store backed by a pre-materialized rule collection, used for tests
/// and for callers that load rules up front.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPolicyStore {
    rules: BTreeMap<String, SubsidyRule>,
}

impl InMemoryPolicyStore {
    pub fn from_rules(rules: Vec<SubsidyRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn rule(&self, id: &str) -> Option<&SubsidyRule> {
        self.rules.get(id)
    }

    fn rules_in(&self, jurisdiction: &str) -> Vec<&SubsidyRule> {
        self.rules
            .values()
            .filter(|r| r.jurisdiction == jurisdiction)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
