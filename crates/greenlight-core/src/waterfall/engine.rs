use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::GreenlightError;
use crate::types::*;
use crate::waterfall::tiers::{PaymentRule, WaterfallSpec};
use crate::GreenlightResult;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Lifecycle of a tier. Active while any target remains; Satisfied once the
/// balance reaches zero. The transition is one-way: a satisfied tier never
/// reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierState {
    Active,
    Satisfied,
}

/// Payment history of one tier across the horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSeries {
    pub priority: u32,
    pub payee: String,
    pub target: Money,
    /// Payment per quarter, aligned with the revenue series
    pub payments: Vec<Money>,
    /// Running total of recouped amounts per quarter
    pub cumulative: Vec<Money>,
    pub total_received: Money,
    pub remaining_target: Money,
    pub state: TierState,
    /// Quarter in which the tier reached its target, if it did
    pub satisfied_quarter: Option<Quarter>,
}

/// Full time-series result of a waterfall execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallResult {
    /// Quarter indices, ascending
    pub quarters: Vec<Quarter>,
    /// One series per tier, ascending priority
    pub tiers: Vec<TierSeries>,
    /// Pool left after all tiers, per quarter (flows to equity participation)
    pub residuals: Vec<Money>,
    pub total_revenue: Money,
    pub total_distributed: Money,
    pub total_residual: Money,
}

impl WaterfallResult {
    /// Total paid to one payee across all their tiers.
    pub fn total_to_payee(&self, payee: &str) -> Money {
        self.tiers
            .iter()
            .filter(|t| t.payee == payee)
            .map(|t| t.total_received)
            .sum()
    }

    /// Per-quarter payments to one payee, summed across their tiers.
    pub fn payments_to_payee(&self, payee: &str) -> Vec<Money> {
        let mut out = vec![Decimal::ZERO; self.quarters.len()];
        for tier in self.tiers.iter().filter(|t| t.payee == payee) {
            for (i, p) in tier.payments.iter().enumerate() {
                out[i] += *p;
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Execute the prioritized recoupment waterfall over a quarterly revenue
/// series.
///
/// Each quarter the available pool is applied to tiers in strictly ascending
/// priority order; a tier receives `min(remaining_pool, rule_amount,
/// remaining_target)`. Unpaid targets carry to the next quarter. Tiers are
/// strictly sequential within a quarter and a satisfied tier never reopens.
pub fn execute(
    spec: &WaterfallSpec,
    quarterly_revenue: &[(Quarter, Money)],
) -> GreenlightResult<ComputationOutput<WaterfallResult>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    if quarterly_revenue.is_empty() {
        return Err(GreenlightError::InsufficientData(
            "Revenue series is empty".into(),
        ));
    }
    for window in quarterly_revenue.windows(2) {
        if window[1].0 <= window[0].0 {
            return Err(GreenlightError::InvalidInput {
                field: "quarterly_revenue".into(),
                reason: "Quarter indices must be strictly ascending".into(),
            });
        }
    }
    for (quarter, amount) in quarterly_revenue {
        if *amount < Decimal::ZERO {
            return Err(GreenlightError::InvalidInput {
                field: "quarterly_revenue".into(),
                reason: format!("Negative revenue {amount} in quarter {quarter}"),
            });
        }
    }

    let n = quarterly_revenue.len();
    let tiers = spec.tiers();
    let mut remaining: Vec<Money> = tiers.iter().map(|t| t.target).collect();
    let mut payments: Vec<Vec<Money>> = vec![vec![Decimal::ZERO; n]; tiers.len()];
    let mut satisfied_quarter: Vec<Option<Quarter>> = vec![None; tiers.len()];
    let mut residuals: Vec<Money> = vec![Decimal::ZERO; n];
    let mut cumulative_revenue = Decimal::ZERO;

    for (qi, (quarter, revenue)) in quarterly_revenue.iter().enumerate() {
        cumulative_revenue += *revenue;
        let mut pool = *revenue;

        for (ti, tier) in tiers.iter().enumerate() {
            if remaining[ti].is_zero() || pool.is_zero() {
                continue;
            }
            let due = match &tier.rule {
                PaymentRule::FixedPerQuarter { amount } => *amount,
                PaymentRule::PercentOfPool { pct } => pool * pct,
                PaymentRule::PercentOfRevenue { pct } => revenue * pct,
                PaymentRule::CorridorSplit {
                    threshold,
                    below_pct,
                    above_pct,
                } => {
                    if cumulative_revenue <= *threshold {
                        pool * below_pct
                    } else {
                        pool * above_pct
                    }
                }
            };
            let payment = due.min(pool).min(remaining[ti]);
            if payment.is_zero() {
                continue;
            }
            payments[ti][qi] = payment;
            pool -= payment;
            remaining[ti] -= payment;
            if remaining[ti].is_zero() {
                satisfied_quarter[ti] = Some(*quarter);
            }
        }

        residuals[qi] = pool;
    }

    let tier_series: Vec<TierSeries> = tiers
        .iter()
        .enumerate()
        .map(|(ti, tier)| {
            let mut cumulative = Vec::with_capacity(n);
            let mut running = Decimal::ZERO;
            for p in &payments[ti] {
                running += *p;
                cumulative.push(running);
            }
            TierSeries {
                priority: tier.priority,
                payee: tier.payee.clone(),
                target: tier.target,
                payments: payments[ti].clone(),
                cumulative,
                total_received: running,
                remaining_target: remaining[ti],
                state: if remaining[ti].is_zero() {
                    TierState::Satisfied
                } else {
                    TierState::Active
                },
                satisfied_quarter: satisfied_quarter[ti],
            }
        })
        .collect();

    let total_revenue: Money = quarterly_revenue.iter().map(|(_, a)| *a).sum();
    let total_distributed: Money = tier_series.iter().map(|t| t.total_received).sum();
    let total_residual: Money = residuals.iter().sum();

    let output = WaterfallResult {
        quarters: quarterly_revenue.iter().map(|(q, _)| *q).collect(),
        tiers: tier_series,
        residuals,
        total_revenue,
        total_distributed,
        total_residual,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Prioritized Recoupment Waterfall",
        &serde_json::json!({
            "num_tiers": spec.tiers().len(),
            "num_quarters": n,
            "total_target": spec.total_target().to_string(),
            "total_revenue": total_revenue.to_string(),
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
