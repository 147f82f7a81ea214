use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::capital::stack::{CapitalStack, InstrumentKind};
use crate::error::GreenlightError;
use crate::types::*;
use crate::waterfall::engine::WaterfallResult;
use crate::waterfall::tiers::{PaymentRule, WaterfallSpec, WaterfallTier};
use crate::GreenlightResult;

// ---------------------------------------------------------------------------
// Solver configuration
// ---------------------------------------------------------------------------

/// Newton-Raphson settings for the IRR solver. Exposed as configuration so
/// tests can run at tight or loose tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    pub max_iterations: u32,
    /// Convergence tolerance on NPV, relative to the series' total magnitude
    pub tolerance: Decimal,
    pub initial_guess: Rate,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: dec!(0.00001),
            initial_guess: dec!(0.10),
        }
    }
}

/// Discounting and solver settings for stakeholder-return derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnConfig {
    pub discount_rate: Rate,
    pub periods_per_year: u32,
    pub solver: SolverConfig,
}

impl Default for ReturnConfig {
    fn default() -> Self {
        Self {
            discount_rate: dec!(0.12),
            periods_per_year: PERIODS_PER_YEAR,
            solver: SolverConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// NPV / IRR
// ---------------------------------------------------------------------------

/// Net present value with calendar-fractional periods:
/// `Σ CF_t / (1 + r)^(t / periods_per_year)`.
pub fn npv(
    flows: &[(Quarter, Money)],
    rate: Rate,
    periods_per_year: u32,
) -> GreenlightResult<Money> {
    if rate <= dec!(-1) {
        return Err(GreenlightError::InvalidInput {
            field: "rate".into(),
            reason: "Discount rate must be greater than -100%".into(),
        });
    }
    if periods_per_year == 0 {
        return Err(GreenlightError::InvalidInput {
            field: "periods_per_year".into(),
            reason: "Periods per year must be positive".into(),
        });
    }

    let ppy = Decimal::from(periods_per_year);
    let one_plus_r = Decimal::ONE + rate;
    let mut result = Decimal::ZERO;
    for (quarter, amount) in flows {
        let t = Decimal::from(*quarter) / ppy;
        let discount = one_plus_r.powd(t);
        if discount.is_zero() {
            return Err(GreenlightError::DivisionByZero {
                context: format!("NPV discount factor at quarter {quarter}"),
            });
        }
        result += amount / discount;
    }
    Ok(result)
}

/// Annualized internal rate of return via Newton-Raphson over
/// calendar-fractional periods.
///
/// Returns `None` rather than a wrong answer when the solver cannot resolve:
/// no sign change in the series, a flat derivative, or iteration exhaustion.
pub fn irr(flows: &[(Quarter, Money)], periods_per_year: u32, config: &SolverConfig) -> Option<Rate> {
    if flows.len() < 2 || periods_per_year == 0 {
        return None;
    }
    let has_negative = flows.iter().any(|(_, a)| a.is_sign_negative());
    let has_positive = flows.iter().any(|(_, a)| *a > Decimal::ZERO);
    if !has_negative || !has_positive {
        return None;
    }

    let ppy = Decimal::from(periods_per_year);
    let scale: Decimal = flows
        .iter()
        .map(|(_, a)| a.abs())
        .sum::<Decimal>()
        .max(Decimal::ONE);
    let threshold = config.tolerance * scale;

    let mut rate = config.initial_guess;
    for _ in 0..config.max_iterations {
        let one_plus_r = Decimal::ONE + rate;
        if one_plus_r <= Decimal::ZERO {
            return None;
        }
        let mut npv_val = Decimal::ZERO;
        let mut dnpv = Decimal::ZERO;
        for (quarter, amount) in flows {
            let t = Decimal::from(*quarter) / ppy;
            let discount = one_plus_r.powd(t);
            if discount.is_zero() {
                continue;
            }
            npv_val += amount / discount;
            dnpv -= t * amount / (one_plus_r * discount);
        }

        if npv_val.abs() < threshold {
            return Some(rate);
        }
        if dnpv.is_zero() {
            return None;
        }

        rate -= npv_val / dnpv;

        // Guard against divergence
        if rate < dec!(-0.99) {
            rate = dec!(-0.99);
        } else if rate > dec!(100.0) {
            rate = dec!(100.0);
        }
    }

    None
}

/// First quarter in which cumulative receipts cover the invested amount.
pub fn payback_quarter(
    invested: Money,
    received: &[(Quarter, Money)],
) -> Option<Quarter> {
    let mut cumulative = Decimal::ZERO;
    for (quarter, amount) in received {
        cumulative += *amount;
        if cumulative >= invested {
            return Some(*quarter);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Stakeholder returns
// ---------------------------------------------------------------------------

/// Return metrics for one stakeholder in the financing stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeholderReturn {
    pub stakeholder: String,
    pub kind: InstrumentKind,
    pub total_invested: Money,
    pub total_received: Money,
    /// Per-quarter receipts, aligned with the waterfall horizon
    pub received: Vec<CashFlowEvent>,
    /// Annualized IRR; None when the solver did not converge
    pub irr: Option<Rate>,
    pub npv: Money,
    pub cash_on_cash: Multiple,
    /// Quarter of full recoupment; None if never recouped
    pub payback_quarter: Option<Quarter>,
    /// Fraction of the recoupment target actually received
    pub recoupment_fraction: Rate,
}

impl WaterfallSpec {
    /// Derive a waterfall from a capital stack's tier assignments: each
    /// recouping component claims its full remaining pool position up to its
    /// recoupment target, at its assigned priority.
    pub fn from_stack(
        stack: &CapitalStack,
        expected_term_years: Decimal,
    ) -> GreenlightResult<Self> {
        let tiers: Vec<WaterfallTier> = stack
            .components()
            .iter()
            .filter_map(|c| {
                c.tier_priority.map(|priority| WaterfallTier {
                    priority,
                    payee: c.name.clone(),
                    rule: PaymentRule::PercentOfPool { pct: Decimal::ONE },
                    target: c.recoupment_target(expected_term_years),
                })
            })
            .collect();
        WaterfallSpec::new(tiers)
    }
}

/// Derive per-stakeholder return metrics from an executed waterfall.
///
/// Each component's receipts are its tier payments plus, for equity
/// participants, their ownership share of the post-waterfall residual.
/// Incentive components are funding sources, not stakeholders.
pub fn stakeholder_returns(
    stack: &CapitalStack,
    result: &WaterfallResult,
    config: &ReturnConfig,
) -> GreenlightResult<ComputationOutput<Vec<StakeholderReturn>>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let mut returns: Vec<StakeholderReturn> = Vec::new();
    for component in stack.components() {
        if component.kind == InstrumentKind::Incentive {
            continue;
        }

        let mut quarterly = result.payments_to_payee(&component.name);
        if quarterly.is_empty() {
            quarterly = vec![Decimal::ZERO; result.quarters.len()];
        }
        if component.kind == InstrumentKind::Equity && component.ownership_fraction > Decimal::ZERO
        {
            for (i, residual) in result.residuals.iter().enumerate() {
                quarterly[i] += residual * component.ownership_fraction;
            }
        }

        let received: Vec<(Quarter, Money)> = result
            .quarters
            .iter()
            .copied()
            .zip(quarterly.iter().copied())
            .collect();
        let total_received: Money = quarterly.iter().sum();
        let invested = component.principal;

        let mut flows: Vec<(Quarter, Money)> = vec![(0, -invested)];
        for (q, a) in &received {
            if *a > Decimal::ZERO {
                flows.push((*q, *a));
            }
        }

        let irr_value = irr(&flows, config.periods_per_year, &config.solver);
        if irr_value.is_none() && total_received > Decimal::ZERO {
            warnings.push(format!(
                "IRR unresolved for stakeholder {}",
                component.name
            ));
        }
        let npv_value = npv(&flows, config.discount_rate, config.periods_per_year)?;

        let cash_on_cash = if invested.is_zero() {
            Decimal::ZERO
        } else {
            total_received / invested
        };

        let target = result
            .tiers
            .iter()
            .filter(|t| t.payee == component.name)
            .map(|t| t.target)
            .sum::<Money>();
        let tier_received = result.total_to_payee(&component.name);
        let recoupment_fraction = if target.is_zero() {
            Decimal::ONE
        } else {
            (tier_received / target).min(Decimal::ONE)
        };

        returns.push(StakeholderReturn {
            stakeholder: component.name.clone(),
            kind: component.kind,
            total_invested: invested,
            total_received,
            received: received
                .iter()
                .map(|(q, a)| CashFlowEvent::new(*q, *a, CashFlowCategory::Payment))
                .collect(),
            irr: irr_value,
            npv: npv_value,
            cash_on_cash,
            payback_quarter: payback_quarter(invested, &received),
            recoupment_fraction,
        });
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Stakeholder Return Derivation",
        &serde_json::json!({
            "discount_rate": config.discount_rate.to_string(),
            "periods_per_year": config.periods_per_year,
            "num_stakeholders": returns.len(),
        }),
        warnings,
        elapsed,
        returns,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
