use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Normal, Triangular, Uniform};
use std::time::Instant;

use crate::cancel::CancellationToken;
use crate::capital::stack::CapitalStack;
use crate::error::GreenlightError;
use crate::revenue::projection::{project, RevenueTemplate};
use crate::types::*;
use crate::waterfall::engine::execute;
use crate::waterfall::returns::{stakeholder_returns, ReturnConfig, StakeholderReturn};
use crate::waterfall::tiers::WaterfallSpec;
use crate::GreenlightResult;

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// Probability distribution for total ultimate revenue. Triangular is the
/// standard choice for asymmetric production-revenue uncertainty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RevenueDistribution {
    Triangular { min: f64, mode: f64, max: f64 },
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, std_dev: f64 },
}

/// One stochastic simulation request.
#[derive(Debug, Clone)]
pub struct SimulationInput<'a> {
    pub stack: &'a CapitalStack,
    pub template: &'a RevenueTemplate,
    pub horizon: Quarter,
    /// Non-revenue inflows merged into the pool (incentive receipts)
    pub extra_inflows: Vec<(Quarter, Money)>,
    pub expected_term_years: Decimal,
    pub return_config: ReturnConfig,
    pub distribution: RevenueDistribution,
    pub num_runs: u32,
    pub seed: u64,
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Percentile summary of one simulated metric. Invariant: p10 <= p50 <= p90.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentileBand {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Risk profile of one stakeholder across all runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeholderRisk {
    pub stakeholder: String,
    /// IRR band over runs where the solver resolved; None if it never did
    pub irr: Option<PercentileBand>,
    /// Fraction of recoupment target received
    pub recoupment: PercentileBand,
    pub probability_full_recoupment: f64,
    pub irr_unresolved_runs: u32,
}

/// Aggregated Monte Carlo report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub num_runs_requested: u32,
    pub num_runs_completed: u32,
    pub cancelled: bool,
    pub revenue: PercentileBand,
    pub stakeholders: Vec<StakeholderRisk>,
}

// ---------------------------------------------------------------------------
// Sampling and statistics
// ---------------------------------------------------------------------------

fn sample_revenue(rng: &mut StdRng, dist: &RevenueDistribution) -> GreenlightResult<f64> {
    let value = match dist {
        RevenueDistribution::Triangular { min, mode, max } => {
            let t = Triangular::new(*min, *max, *mode).map_err(|e| {
                GreenlightError::InvalidInput {
                    field: "distribution".into(),
                    reason: format!("Invalid Triangular parameters: {e}"),
                }
            })?;
            rng.sample(t)
        }
        RevenueDistribution::Uniform { min, max } => {
            let u = Uniform::new(*min, *max).map_err(|e| GreenlightError::InvalidInput {
                field: "distribution".into(),
                reason: format!("Invalid Uniform parameters: {e}"),
            })?;
            rng.sample(u)
        }
        RevenueDistribution::Normal { mean, std_dev } => {
            let n = Normal::new(*mean, *std_dev).map_err(|e| GreenlightError::InvalidInput {
                field: "distribution".into(),
                reason: format!("Invalid Normal parameters: {e}"),
            })?;
            rng.sample(n)
        }
    };
    // Revenue cannot go below zero; a normal tail can
    Ok(value.max(0.0))
}

/// Percentile from a **sorted** slice using linear interpolation.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = rank - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

fn band(values: &mut [f64]) -> PercentileBand {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    PercentileBand {
        p10: percentile_sorted(values, 10.0),
        p50: percentile_sorted(values, 50.0),
        p90: percentile_sorted(values, 90.0),
        mean,
        std_dev: variance.sqrt(),
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

struct RunOutcome {
    total_revenue: f64,
    returns: Vec<StakeholderReturn>,
}

fn run_once(input: &SimulationInput<'_>, total_revenue: Money) -> GreenlightResult<Vec<StakeholderReturn>> {
    let projection = project(total_revenue, input.template, input.horizon)?.result;
    let mut series = projection.series();
    for (quarter, amount) in &input.extra_inflows {
        // Inflows dated past the horizon land in the final quarter
        let q = (*quarter).min(input.horizon.saturating_sub(1));
        if let Some(entry) = series.iter_mut().find(|(sq, _)| *sq == q) {
            entry.1 += *amount;
        }
    }
    let spec = WaterfallSpec::from_stack(input.stack, input.expected_term_years)?;
    let result = execute(&spec, &series)?.result;
    Ok(stakeholder_returns(input.stack, &result, &input.return_config)?.result)
}

/// Run the waterfall under stochastic revenue uncertainty.
///
/// Each run draws a total-ultimate-revenue sample, re-projects, re-executes
/// the waterfall, and records per-stakeholder outcomes. Runs are independent
/// and execute in parallel; each derives its own RNG from `seed` plus the run
/// index, so results are identical for a given seed regardless of thread
/// scheduling. Cancellation yields a partial report, not an error, except
/// when zero runs completed: with nothing to aggregate the call fails with
/// `InsufficientData`.
pub fn simulate(
    input: &SimulationInput<'_>,
    token: &CancellationToken,
) -> GreenlightResult<ComputationOutput<RiskReport>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if input.num_runs < 100 {
        return Err(GreenlightError::InvalidInput {
            field: "num_runs".into(),
            reason: "Must be at least 100".into(),
        });
    }

    let outcomes: Vec<Option<RunOutcome>> = (0..input.num_runs)
        .into_par_iter()
        .map(|i| -> GreenlightResult<Option<RunOutcome>> {
            if token.is_cancelled() {
                return Ok(None);
            }
            let mut rng = StdRng::seed_from_u64(input.seed.wrapping_add(i as u64));
            let sampled = sample_revenue(&mut rng, &input.distribution)?;
            let total = Decimal::from_f64(sampled).unwrap_or(Decimal::ZERO);
            let returns = run_once(input, total)?;
            Ok(Some(RunOutcome {
                total_revenue: sampled,
                returns,
            }))
        })
        .collect::<GreenlightResult<Vec<_>>>()?;

    let completed: Vec<RunOutcome> = outcomes.into_iter().flatten().collect();
    let cancelled = (completed.len() as u32) < input.num_runs;
    if cancelled {
        warnings.push(format!(
            "Simulation cancelled after {} of {} runs",
            completed.len(),
            input.num_runs
        ));
    }
    if completed.is_empty() {
        return Err(GreenlightError::InsufficientData(
            "No simulation runs completed before cancellation".into(),
        ));
    }

    let mut revenue_samples: Vec<f64> = completed.iter().map(|o| o.total_revenue).collect();
    let revenue_band = band(&mut revenue_samples);

    // Per-stakeholder aggregation; stakeholder order is stable across runs
    let names: Vec<String> = completed[0]
        .returns
        .iter()
        .map(|r| r.stakeholder.clone())
        .collect();
    let mut stakeholders: Vec<StakeholderRisk> = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let mut irr_samples: Vec<f64> = Vec::new();
        let mut recoupment_samples: Vec<f64> = Vec::with_capacity(completed.len());
        let mut full_recoupments: u32 = 0;
        let mut unresolved: u32 = 0;
        for outcome in &completed {
            let r = &outcome.returns[idx];
            match r.irr.and_then(|v| v.to_f64()) {
                Some(v) => irr_samples.push(v),
                None => unresolved += 1,
            }
            let frac = r.recoupment_fraction.to_f64().unwrap_or(0.0);
            recoupment_samples.push(frac);
            if r.recoupment_fraction >= Decimal::ONE {
                full_recoupments += 1;
            }
        }
        stakeholders.push(StakeholderRisk {
            stakeholder: name.clone(),
            irr: if irr_samples.is_empty() {
                None
            } else {
                Some(band(&mut irr_samples))
            },
            recoupment: band(&mut recoupment_samples),
            probability_full_recoupment: full_recoupments as f64 / completed.len() as f64,
            irr_unresolved_runs: unresolved,
        });
    }

    let output = RiskReport {
        num_runs_requested: input.num_runs,
        num_runs_completed: completed.len() as u32,
        cancelled,
        revenue: revenue_band,
        stakeholders,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Stochastic Revenue Risk Simulation",
        &serde_json::json!({
            "num_runs": input.num_runs,
            "seed": input.seed,
            "horizon_quarters": input.horizon,
            "template": input.template.name,
        }),
        warnings,
        elapsed,
        output,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capital::stack::{CapitalComponent, InstrumentKind};
    use rust_decimal_macros::dec;

    const SEED: u64 = 42;

    fn component(
        name: &str,
        kind: InstrumentKind,
        principal: Decimal,
        ownership: Decimal,
    ) -> CapitalComponent {
        CapitalComponent {
            name: name.into(),
            kind,
            principal,
            interest_rate: Decimal::ZERO,
            premium: Decimal::ZERO,
            origination_fee: Decimal::ZERO,
            ownership_fraction: ownership,
            tier_priority: kind.default_priority(),
        }
    }

    fn test_stack() -> CapitalStack {
        CapitalStack::new(
            dec!(10000000),
            vec![
                component("senior_debt", InstrumentKind::SeniorDebt, dec!(4000000), dec!(0)),
                component("equity", InstrumentKind::Equity, dec!(6000000), dec!(0.6)),
            ],
        )
        .unwrap()
    }

    fn test_template() -> RevenueTemplate {
        use crate::revenue::projection::{RevenueChannel, TimingProfile};
        RevenueTemplate {
            name: "even".into(),
            channels: vec![RevenueChannel {
                name: "all".into(),
                share: Decimal::ONE,
                profile: TimingProfile::Even {
                    start: 0,
                    quarters: 12,
                },
            }],
        }
    }

    fn input<'a>(
        stack: &'a CapitalStack,
        template: &'a RevenueTemplate,
        num_runs: u32,
    ) -> SimulationInput<'a> {
        SimulationInput {
            stack,
            template,
            horizon: 16,
            extra_inflows: vec![],
            expected_term_years: dec!(2),
            return_config: ReturnConfig::default(),
            distribution: RevenueDistribution::Triangular {
                min: 4_000_000.0,
                mode: 12_000_000.0,
                max: 30_000_000.0,
            },
            num_runs,
            seed: SEED,
        }
    }

    #[test]
    fn test_minimum_runs_enforced() {
        let stack = test_stack();
        let template = test_template();
        let sim = input(&stack, &template, 50);
        assert!(simulate(&sim, &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_percentile_ordering_all_metrics() {
        let stack = test_stack();
        let template = test_template();
        let sim = input(&stack, &template, 300);
        let report = simulate(&sim, &CancellationToken::new()).unwrap().result;

        assert!(report.revenue.p10 <= report.revenue.p50);
        assert!(report.revenue.p50 <= report.revenue.p90);
        for s in &report.stakeholders {
            assert!(s.recoupment.p10 <= s.recoupment.p50);
            assert!(s.recoupment.p50 <= s.recoupment.p90);
            if let Some(irr) = &s.irr {
                assert!(irr.p10 <= irr.p50);
                assert!(irr.p50 <= irr.p90);
            }
            assert!((0.0..=1.0).contains(&s.probability_full_recoupment));
        }
    }

    #[test]
    fn test_seeded_reproducibility() {
        let stack = test_stack();
        let template = test_template();
        let sim = input(&stack, &template, 200);
        let a = simulate(&sim, &CancellationToken::new()).unwrap().result;
        let b = simulate(&sim, &CancellationToken::new()).unwrap().result;
        assert_eq!(a.revenue.p50, b.revenue.p50);
        assert_eq!(a.revenue.mean, b.revenue.mean);
        for (x, y) in a.stakeholders.iter().zip(b.stakeholders.iter()) {
            assert_eq!(x.probability_full_recoupment, y.probability_full_recoupment);
            assert_eq!(x.recoupment.p50, y.recoupment.p50);
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let stack = test_stack();
        let template = test_template();
        let mut sim = input(&stack, &template, 200);
        let a = simulate(&sim, &CancellationToken::new()).unwrap().result;
        sim.seed = SEED + 1;
        let b = simulate(&sim, &CancellationToken::new()).unwrap().result;
        assert_ne!(a.revenue.mean, b.revenue.mean);
    }

    #[test]
    fn test_senior_recoups_more_often_than_equity() {
        let stack = test_stack();
        let template = test_template();
        let sim = input(&stack, &template, 500);
        let report = simulate(&sim, &CancellationToken::new()).unwrap().result;
        let senior = report
            .stakeholders
            .iter()
            .find(|s| s.stakeholder == "senior_debt")
            .unwrap();
        let equity = report
            .stakeholders
            .iter()
            .find(|s| s.stakeholder == "equity")
            .unwrap();
        assert!(senior.probability_full_recoupment >= equity.probability_full_recoupment);
    }

    #[test]
    fn test_pre_cancelled_token_yields_no_runs_error() {
        let stack = test_stack();
        let template = test_template();
        let sim = input(&stack, &template, 200);
        let token = CancellationToken::new();
        token.cancel();
        assert!(simulate(&sim, &token).is_err());
    }

    #[test]
    fn test_invalid_distribution_params() {
        let stack = test_stack();
        let template = test_template();
        let mut sim = input(&stack, &template, 100);
        sim.distribution = RevenueDistribution::Triangular {
            min: 10.0,
            mode: 5.0,
            max: 1.0,
        };
        assert!(simulate(&sim, &CancellationToken::new()).is_err());
    }

    #[test]
    fn test_extra_inflows_improve_recoupment() {
        let stack = test_stack();
        let template = test_template();
        let base = input(&stack, &template, 200);
        let base_report = simulate(&base, &CancellationToken::new()).unwrap().result;

        let mut boosted = input(&stack, &template, 200);
        boosted.extra_inflows = vec![(1, dec!(3000000))];
        let boosted_report = simulate(&boosted, &CancellationToken::new()).unwrap().result;

        let p = |r: &RiskReport| {
            r.stakeholders
                .iter()
                .find(|s| s.stakeholder == "equity")
                .unwrap()
                .probability_full_recoupment
        };
        assert!(p(&boosted_report) >= p(&base_report));
    }

    #[test]
    fn test_late_inflow_clamped_to_final_quarter() {
        let stack = test_stack();
        let template = test_template();
        // Quarter 99 is past the 16-quarter horizon; the cash must not vanish
        let mut late = input(&stack, &template, 200);
        late.extra_inflows = vec![(99, dec!(3000000))];
        let mut last = input(&stack, &template, 200);
        last.extra_inflows = vec![(15, dec!(3000000))];

        let a = simulate(&late, &CancellationToken::new()).unwrap().result;
        let b = simulate(&last, &CancellationToken::new()).unwrap().result;
        for (x, y) in a.stakeholders.iter().zip(b.stakeholders.iter()) {
            assert_eq!(x.probability_full_recoupment, y.probability_full_recoupment);
            assert_eq!(x.recoupment.p50, y.recoupment.p50);
        }
    }
}
