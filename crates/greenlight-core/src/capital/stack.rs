use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GreenlightError;
use crate::types::{Money, Rate};
use crate::GreenlightResult;

/// Relative tolerance for component amounts summing to the budget.
const BUDGET_TOLERANCE_RATIO: Decimal = dec!(0.0001);

// ---------------------------------------------------------------------------
// Instrument kinds
// ---------------------------------------------------------------------------

/// Closed set of financing instrument kinds. Adding a kind is a
/// compile-time-checked change: every match over this enum is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    SeniorDebt,
    MezzanineDebt,
    GapFinancing,
    Equity,
    PreSale,
    Incentive,
}

impl InstrumentKind {
    pub const ALL: [InstrumentKind; 6] = [
        InstrumentKind::SeniorDebt,
        InstrumentKind::MezzanineDebt,
        InstrumentKind::GapFinancing,
        InstrumentKind::Equity,
        InstrumentKind::PreSale,
        InstrumentKind::Incentive,
    ];

    pub fn is_debt(&self) -> bool {
        matches!(
            self,
            InstrumentKind::SeniorDebt
                | InstrumentKind::MezzanineDebt
                | InstrumentKind::GapFinancing
        )
    }

    /// Default recoupment priority for waterfall construction. Incentive
    /// proceeds are a funding source, not a recouping claim.
    pub fn default_priority(&self) -> Option<u32> {
        match self {
            InstrumentKind::SeniorDebt => Some(1),
            InstrumentKind::GapFinancing => Some(2),
            InstrumentKind::MezzanineDebt => Some(3),
            InstrumentKind::PreSale => Some(4),
            InstrumentKind::Equity => Some(5),
            InstrumentKind::Incentive => None,
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstrumentKind::SeniorDebt => "senior_debt",
            InstrumentKind::MezzanineDebt => "mezzanine_debt",
            InstrumentKind::GapFinancing => "gap_financing",
            InstrumentKind::Equity => "equity",
            InstrumentKind::PreSale => "pre_sale",
            InstrumentKind::Incentive => "incentive",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Components and stack
// ---------------------------------------------------------------------------

/// One financing instrument in a capital stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalComponent {
    pub name: String,
    pub kind: InstrumentKind,
    pub principal: Money,
    /// Annual interest rate (zero for equity-like components)
    pub interest_rate: Rate,
    /// One-off premium over principal owed at recoupment
    pub premium: Rate,
    /// Origination fee as a fraction of principal
    pub origination_fee: Rate,
    /// Ownership/participation fraction for equity-like components
    pub ownership_fraction: Rate,
    /// Recoupment tier this component is assigned to
    pub tier_priority: Option<u32>,
}

impl CapitalComponent {
    /// Total amount the component must recoup: principal plus premium and
    /// fees, grossed up for simple interest over the expected term.
    pub fn recoupment_target(&self, expected_term_years: Decimal) -> Money {
        let interest = self.principal * self.interest_rate * expected_term_years;
        let premium = self.principal * self.premium;
        let fee = self.principal * self.origination_fee;
        self.principal + interest + premium + fee
    }
}

/// An ordered collection of capital components funding a budget.
///
/// Invariant: component principals sum to the budget within a small relative
/// tolerance, checked at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalStack {
    budget: Money,
    components: Vec<CapitalComponent>,
}

impl CapitalStack {
    pub fn new(budget: Money, components: Vec<CapitalComponent>) -> GreenlightResult<Self> {
        if budget <= Decimal::ZERO {
            return Err(GreenlightError::InvalidInput {
                field: "budget".into(),
                reason: "Budget must be positive".into(),
            });
        }
        if components.is_empty() {
            return Err(GreenlightError::InsufficientData(
                "A capital stack requires at least one component".into(),
            ));
        }
        for c in &components {
            if c.principal < Decimal::ZERO {
                return Err(GreenlightError::InvalidInput {
                    field: "principal".into(),
                    reason: format!("Component {} has negative principal", c.name),
                });
            }
        }
        let total: Money = components.iter().map(|c| c.principal).sum();
        let tolerance = (budget * BUDGET_TOLERANCE_RATIO).max(dec!(0.01));
        if (total - budget).abs() > tolerance {
            return Err(GreenlightError::InvalidInput {
                field: "components".into(),
                reason: format!(
                    "Component amounts sum to {total}, budget is {budget} (tolerance {tolerance})"
                ),
            });
        }
        Ok(Self { budget, components })
    }

    pub fn budget(&self) -> Money {
        self.budget
    }

    pub fn components(&self) -> &[CapitalComponent] {
        &self.components
    }

    pub fn amount_of(&self, kind: InstrumentKind) -> Money {
        self.components
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.principal)
            .sum()
    }

    pub fn fraction_of(&self, kind: InstrumentKind) -> Rate {
        self.amount_of(kind) / self.budget
    }

    pub fn debt_total(&self) -> Money {
        self.components
            .iter()
            .filter(|c| c.kind.is_debt())
            .map(|c| c.principal)
            .sum()
    }

    pub fn equity_total(&self) -> Money {
        self.amount_of(InstrumentKind::Equity)
    }

    /// Total ownership fraction sold to outside equity participants.
    pub fn dilution(&self) -> Rate {
        self.components
            .iter()
            .map(|c| c.ownership_fraction)
            .sum()
    }

    /// Blended annual cost of capital across the stack: interest, premium,
    /// and fees weighted by principal. Equity carries the supplied cost.
    pub fn blended_cost(&self, cost_of_equity: Rate, expected_term_years: Decimal) -> Rate {
        if expected_term_years <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let mut cost = Decimal::ZERO;
        for c in &self.components {
            let annualized = if c.kind == InstrumentKind::Equity {
                cost_of_equity
            } else {
                c.interest_rate + (c.premium + c.origination_fee) / expected_term_years
            };
            cost += c.principal * annualized;
        }
        cost / self.budget
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
