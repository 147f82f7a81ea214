use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::capital::stack::{CapitalComponent, CapitalStack, InstrumentKind};
use crate::error::GreenlightError;
use crate::types::*;
use crate::GreenlightResult;

const TARGET_TOLERANCE: Decimal = dec!(0.000001);

// ---------------------------------------------------------------------------
// Template types
// ---------------------------------------------------------------------------

/// Percentage allocation target for one instrument kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub kind: InstrumentKind,
    pub pct: Rate,
}

/// A named capital-structure template: percentage targets per instrument
/// kind, expandable to a concrete stack at any budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationTemplate {
    pub name: String,
    pub targets: Vec<AllocationTarget>,
}

impl AllocationTemplate {
    pub fn new(name: &str, targets: Vec<(InstrumentKind, Rate)>) -> GreenlightResult<Self> {
        let total: Decimal = targets.iter().map(|(_, pct)| *pct).sum();
        if (total - Decimal::ONE).abs() > TARGET_TOLERANCE {
            return Err(GreenlightError::InvalidInput {
                field: "targets".into(),
                reason: format!("Allocation targets sum to {total}, expected 1"),
            });
        }
        if targets.iter().any(|(_, pct)| *pct < Decimal::ZERO) {
            return Err(GreenlightError::InvalidInput {
                field: "targets".into(),
                reason: "Allocation targets cannot be negative".into(),
            });
        }
        Ok(Self {
            name: name.into(),
            targets: targets
                .into_iter()
                .map(|(kind, pct)| AllocationTarget { kind, pct })
                .collect(),
        })
    }
}

/// Default cost terms applied when expanding a template into components.
/// Explicit configuration, substitutable in tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostAssumptions {
    pub senior_interest: Rate,
    pub mezzanine_interest: Rate,
    pub gap_interest: Rate,
    pub gap_premium: Rate,
    pub origination_fee: Rate,
    /// Discount given on pre-sold territory value
    pub presale_premium: Rate,
    /// Ownership fraction sold per fraction of the budget funded by equity
    pub equity_ownership_ratio: Rate,
}

impl Default for CostAssumptions {
    fn default() -> Self {
        Self {
            senior_interest: dec!(0.075),
            mezzanine_interest: dec!(0.12),
            gap_interest: dec!(0.15),
            gap_premium: dec!(0.03),
            origination_fee: dec!(0.02),
            presale_premium: dec!(0.05),
            equity_ownership_ratio: dec!(1.0),
        }
    }
}

/// Named template collection with the standard allocation mixes.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, AllocationTemplate>,
}

impl TemplateSet {
    pub fn new(templates: Vec<AllocationTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }

    pub fn standard() -> Self {
        let mk = |name: &str, targets: Vec<(InstrumentKind, Rate)>| {
            AllocationTemplate::new(name, targets).expect("standard template targets sum to 1")
        };
        Self::new(vec![
            mk(
                "conservative",
                vec![
                    (InstrumentKind::SeniorDebt, dec!(0.25)),
                    (InstrumentKind::Equity, dec!(0.45)),
                    (InstrumentKind::PreSale, dec!(0.20)),
                    (InstrumentKind::Incentive, dec!(0.10)),
                ],
            ),
            mk(
                "balanced",
                vec![
                    (InstrumentKind::SeniorDebt, dec!(0.30)),
                    (InstrumentKind::MezzanineDebt, dec!(0.10)),
                    (InstrumentKind::Equity, dec!(0.30)),
                    (InstrumentKind::PreSale, dec!(0.15)),
                    (InstrumentKind::Incentive, dec!(0.15)),
                ],
            ),
            mk(
                "aggressive",
                vec![
                    (InstrumentKind::SeniorDebt, dec!(0.35)),
                    (InstrumentKind::MezzanineDebt, dec!(0.15)),
                    (InstrumentKind::GapFinancing, dec!(0.10)),
                    (InstrumentKind::Equity, dec!(0.20)),
                    (InstrumentKind::PreSale, dec!(0.10)),
                    (InstrumentKind::Incentive, dec!(0.10)),
                ],
            ),
            mk(
                "incentive_maximized",
                vec![
                    (InstrumentKind::SeniorDebt, dec!(0.25)),
                    (InstrumentKind::Equity, dec!(0.30)),
                    (InstrumentKind::PreSale, dec!(0.20)),
                    (InstrumentKind::Incentive, dec!(0.25)),
                ],
            ),
        ])
    }

    pub fn get(&self, name: &str) -> GreenlightResult<&AllocationTemplate> {
        self.templates
            .get(name)
            .ok_or_else(|| GreenlightError::UnknownTemplate(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }
}

// ---------------------------------------------------------------------------
// Stack generation
// ---------------------------------------------------------------------------

fn component_for(
    kind: InstrumentKind,
    principal: Money,
    budget: Money,
    costs: &CostAssumptions,
) -> CapitalComponent {
    let (interest_rate, premium, origination_fee) = match kind {
        InstrumentKind::SeniorDebt => (costs.senior_interest, Decimal::ZERO, costs.origination_fee),
        InstrumentKind::MezzanineDebt => {
            (costs.mezzanine_interest, Decimal::ZERO, costs.origination_fee)
        }
        InstrumentKind::GapFinancing => {
            (costs.gap_interest, costs.gap_premium, costs.origination_fee)
        }
        InstrumentKind::PreSale => (Decimal::ZERO, costs.presale_premium, Decimal::ZERO),
        InstrumentKind::Equity | InstrumentKind::Incentive => {
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        }
    };
    let ownership_fraction = if kind == InstrumentKind::Equity && budget > Decimal::ZERO {
        (principal / budget) * costs.equity_ownership_ratio
    } else {
        Decimal::ZERO
    };
    CapitalComponent {
        name: kind.to_string(),
        kind,
        principal,
        interest_rate,
        premium,
        origination_fee,
        ownership_fraction,
        tier_priority: kind.default_priority(),
    }
}

/// Expand an allocation template into a concrete capital stack scaled to the
/// requested budget, applying default cost terms per instrument kind.
pub fn build_stack(
    template: &AllocationTemplate,
    budget: Money,
    costs: &CostAssumptions,
) -> GreenlightResult<ComputationOutput<CapitalStack>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    if budget <= Decimal::ZERO {
        return Err(GreenlightError::InvalidInput {
            field: "budget".into(),
            reason: "Budget must be positive".into(),
        });
    }

    let components: Vec<CapitalComponent> = template
        .targets
        .iter()
        .filter(|t| t.pct > Decimal::ZERO)
        .map(|t| component_for(t.kind, budget * t.pct, budget, costs))
        .collect();

    let stack = CapitalStack::new(budget, components)?;

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Capital Stack Generation",
        &serde_json::json!({
            "template": template.name,
            "budget": budget.to_string(),
            "num_targets": template.targets.len(),
        }),
        warnings,
        elapsed,
        stack,
    ))
}

/// Build a stack from a named template.
pub fn build_stack_named(
    template_name: &str,
    set: &TemplateSet,
    budget: Money,
    costs: &CostAssumptions,
) -> GreenlightResult<ComputationOutput<CapitalStack>> {
    let template = set.get(template_name)?;
    build_stack(template, budget, costs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
