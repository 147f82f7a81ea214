use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::capital::stack::{CapitalStack, InstrumentKind};
use crate::error::GreenlightError;
use crate::types::*;
use crate::GreenlightResult;

// ---------------------------------------------------------------------------
// Hard constraints
// ---------------------------------------------------------------------------

/// Structural rules a capital stack must satisfy to be considered at all.
/// Any violation makes the scenario invalid regardless of score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardConstraints {
    /// Minimum equity as a fraction of the budget
    pub min_equity_share: Rate,
    /// Maximum total debt over total equity
    pub max_debt_to_equity: Decimal,
    /// Gap financing is only available behind a senior facility
    pub gap_requires_senior: bool,
    /// Subordinate (mezzanine) principal must not exceed senior principal
    pub subordinate_leq_senior: bool,
}

impl Default for HardConstraints {
    fn default() -> Self {
        Self {
            min_equity_share: dec!(0.15),
            max_debt_to_equity: dec!(1.5),
            gap_requires_senior: true,
            subordinate_leq_senior: true,
        }
    }
}

/// One broken hard constraint, with enough detail to identify the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub constraint: String,
    pub detail: String,
}

/// Outcome of hard-constraint validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub violations: Vec<ConstraintViolation>,
}

/// Check a stack against the hard constraint set.
///
/// The sum-to-budget rule is enforced by `CapitalStack::new` itself; this
/// covers the share and structural rules.
pub fn validate_structure(
    stack: &CapitalStack,
    hard: &HardConstraints,
) -> GreenlightResult<ComputationOutput<ValidationReport>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();
    let mut violations: Vec<ConstraintViolation> = Vec::new();

    let equity_share = stack.fraction_of(InstrumentKind::Equity);
    if equity_share < hard.min_equity_share {
        violations.push(ConstraintViolation {
            constraint: "min_equity_share".into(),
            detail: format!(
                "Equity share {equity_share} is below the minimum {}",
                hard.min_equity_share
            ),
        });
    }

    let debt = stack.debt_total();
    let equity = stack.equity_total();
    if equity.is_zero() {
        if !debt.is_zero() {
            violations.push(ConstraintViolation {
                constraint: "max_debt_to_equity".into(),
                detail: "Stack carries debt with no equity".into(),
            });
        }
    } else {
        let dte = debt / equity;
        if dte > hard.max_debt_to_equity {
            violations.push(ConstraintViolation {
                constraint: "max_debt_to_equity".into(),
                detail: format!(
                    "Debt-to-equity {dte} exceeds the maximum {}",
                    hard.max_debt_to_equity
                ),
            });
        }
    }

    let gap = stack.amount_of(InstrumentKind::GapFinancing);
    let senior = stack.amount_of(InstrumentKind::SeniorDebt);
    if hard.gap_requires_senior && gap > Decimal::ZERO && senior.is_zero() {
        violations.push(ConstraintViolation {
            constraint: "gap_requires_senior".into(),
            detail: "Gap financing is present without a senior facility".into(),
        });
    }

    let mezz = stack.amount_of(InstrumentKind::MezzanineDebt);
    if hard.subordinate_leq_senior && mezz > senior {
        violations.push(ConstraintViolation {
            constraint: "subordinate_leq_senior".into(),
            detail: format!("Mezzanine principal {mezz} exceeds senior principal {senior}"),
        });
    }

    let report = ValidationReport {
        is_valid: violations.is_empty(),
        violations,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Hard-Constraint Validation",
        &serde_json::json!({
            "budget": stack.budget().to_string(),
            "min_equity_share": hard.min_equity_share.to_string(),
            "max_debt_to_equity": hard.max_debt_to_equity.to_string(),
        }),
        warnings,
        elapsed,
        report,
    ))
}

// ---------------------------------------------------------------------------
// Soft constraints
// ---------------------------------------------------------------------------

/// Summary metrics of one evaluated scenario, shared by the soft-constraint
/// scorer, the evaluator, and the comparator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Annualized equity IRR; None when the solver did not resolve
    pub equity_irr: Option<Rate>,
    /// Net incentive benefit as a fraction of budget
    pub incentive_capture: Rate,
    /// Ownership fraction sold to financing participants
    pub dilution: Rate,
    pub debt_to_equity: Decimal,
    /// Blended annual cost of capital
    pub cost_of_capital: Rate,
    /// Probability every stakeholder fully recoups (1 for deterministic runs)
    pub recoupment_probability: Rate,
    /// Fraction of debt recoupment targets actually repaid
    pub debt_recovery: Rate,
}

/// The soft-constraint kinds. Penalties rank scenarios; they never
/// invalidate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftConstraintKind {
    /// Penalize equity IRR shortfall against a target rate
    TargetEquityIrr,
    /// Penalize ownership dilution above a target ceiling
    MinimizeDilution,
    /// Penalize incentive capture below a target fraction of budget
    IncentiveCaptureTarget,
    /// Penalize deviation from a target debt-to-equity ratio
    BalancedLeverage,
}

/// A weighted soft constraint with its target value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftConstraint {
    pub kind: SoftConstraintKind,
    pub weight: Decimal,
    pub target: Decimal,
}

/// Penalty contribution of one soft constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftPenalty {
    pub kind: SoftConstraintKind,
    pub weight: Decimal,
    /// Normalized shortfall in [0, 1]-ish scale (deviation / target)
    pub shortfall: Decimal,
    pub penalty: Decimal,
}

/// Aggregate soft-constraint score for ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftPenaltyReport {
    pub items: Vec<SoftPenalty>,
    pub total_penalty: Decimal,
}

fn shortfall_for(kind: SoftConstraintKind, target: Decimal, metrics: &ScenarioMetrics) -> Decimal {
    let safe_target = if target.is_zero() { dec!(0.0001) } else { target };
    match kind {
        SoftConstraintKind::TargetEquityIrr => match metrics.equity_irr {
            // Unresolved IRR counts as a full miss
            None => Decimal::ONE,
            Some(irr) => ((target - irr) / safe_target).max(Decimal::ZERO),
        },
        SoftConstraintKind::MinimizeDilution => {
            ((metrics.dilution - target) / safe_target).max(Decimal::ZERO)
        }
        SoftConstraintKind::IncentiveCaptureTarget => {
            ((target - metrics.incentive_capture) / safe_target).max(Decimal::ZERO)
        }
        SoftConstraintKind::BalancedLeverage => {
            ((metrics.debt_to_equity - target) / safe_target).abs()
        }
    }
}

/// Score a scenario's soft constraints: each contributes weight × normalized
/// shortfall; the sum ranks scenarios and never invalidates them.
pub fn soft_penalty(metrics: &ScenarioMetrics, constraints: &[SoftConstraint]) -> SoftPenaltyReport {
    let items: Vec<SoftPenalty> = constraints
        .iter()
        .map(|c| {
            let shortfall = shortfall_for(c.kind, c.target, metrics);
            SoftPenalty {
                kind: c.kind,
                weight: c.weight,
                shortfall,
                penalty: c.weight * shortfall,
            }
        })
        .collect();
    let total_penalty = items.iter().map(|i| i.penalty).sum();
    SoftPenaltyReport {
        items,
        total_penalty,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
