use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use crate::cancel::CancellationToken;
use crate::capital::constraints::HardConstraints;
use crate::capital::stack::{CapitalStack, InstrumentKind};
use crate::capital::templates::{build_stack, AllocationTemplate, CostAssumptions};
use crate::error::GreenlightError;
use crate::evaluate::evaluator::{
    evaluate_scenario, IncentivePlan, ObjectiveWeights, ScenarioInput, ScoreThresholds,
};
use crate::revenue::projection::RevenueTemplate;
use crate::types::*;
use crate::waterfall::returns::ReturnConfig;
use crate::GreenlightResult;

/// Instrument kinds the optimizer may allocate between. Incentive funding is
/// determined by policy rules, not by choice, so it is not a decision axis.
pub const DECISION_KINDS: [InstrumentKind; 5] = [
    InstrumentKind::SeniorDebt,
    InstrumentKind::MezzanineDebt,
    InstrumentKind::GapFinancing,
    InstrumentKind::Equity,
    InstrumentKind::PreSale,
];

const FEASIBILITY_EPS: f64 = 1e-9;
/// Penalty per hard-constraint violation, steering infeasible iterates back
/// toward the feasible region without flattening the objective.
const VIOLATION_PENALTY: f64 = 100.0;

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// Allocation bounds for one decision axis, as fractions of the budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InstrumentBound {
    pub kind: InstrumentKind,
    pub min: f64,
    pub max: f64,
}

/// Default bounds: equity floor mirrors the default hard constraint, the
/// leveraged instruments are capped at customary market levels.
pub fn default_bounds() -> Vec<InstrumentBound> {
    let b = |kind, min, max| InstrumentBound { kind, min, max };
    vec![
        b(InstrumentKind::SeniorDebt, 0.0, 0.50),
        b(InstrumentKind::MezzanineDebt, 0.0, 0.25),
        b(InstrumentKind::GapFinancing, 0.0, 0.15),
        b(InstrumentKind::Equity, 0.15, 1.0),
        b(InstrumentKind::PreSale, 0.0, 0.40),
    ]
}

/// Solver constants. Iteration and tolerance defaults are sized for a
/// five-axis allocation problem with a cheap deterministic objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Gradient iterations per start
    pub max_iterations: u32,
    /// Minimum objective improvement to keep iterating
    pub tolerance: f64,
    /// Forward-difference step for the gradient estimate
    pub gradient_step: f64,
    /// Initial line-search step length
    pub initial_step: f64,
    /// Step shrink factor during backtracking
    pub backtrack_factor: f64,
    pub max_backtracks: u32,
    /// Number of randomized starts (start 0 is the bound midpoint)
    pub num_starts: u32,
    pub seed: u64,
    /// Decimal places used for the objective memo key
    pub cache_decimals: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-6,
            gradient_step: 1e-4,
            initial_step: 0.05,
            backtrack_factor: 0.5,
            max_backtracks: 20,
            num_starts: 8,
            seed: 0,
            cache_decimals: 6,
        }
    }
}

/// The scenario the optimizer searches over: everything fixed except the
/// capital allocation itself. The incentive plan is held fixed too, but it
/// flows through every candidate evaluation so the capture component and
/// the receipt inflows contribute to each candidate's score.
pub struct OptimizeInput<'a> {
    pub budget: Money,
    pub template: &'a RevenueTemplate,
    pub horizon: Quarter,
    pub expected_revenue: Money,
    pub expected_term_years: Decimal,
    pub cost_of_equity: Rate,
    pub incentives: Option<IncentivePlan<'a>>,
    pub costs: CostAssumptions,
    pub hard_constraints: HardConstraints,
    pub return_config: ReturnConfig,
    pub weights: ObjectiveWeights,
    pub thresholds: ScoreThresholds,
    pub bounds: Vec<InstrumentBound>,
    pub config: OptimizerConfig,
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Converged,
    MaxIterations,
    /// Bounds admit no allocation summing to 1
    Infeasible,
    Cancelled,
}

/// Outcome of one start of the multi-start search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartOutcome {
    pub start_index: u32,
    pub score: f64,
    pub iterations: u32,
    /// Objective evaluations that missed the memo cache
    pub evaluations: u32,
    pub status: SolverStatus,
}

/// Agreement between starts: small spread means the surface is unimodal
/// enough to trust the best point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceSpread {
    pub std_dev: f64,
    pub range: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub status: SolverStatus,
    pub best_allocation: Vec<(InstrumentKind, f64)>,
    pub best_score: f64,
    pub best_stack: Option<CapitalStack>,
    pub starts: Vec<StartOutcome>,
    pub spread: ConvergenceSpread,
    pub total_evaluations: u32,
}

// ---------------------------------------------------------------------------
// Simplex projection
// ---------------------------------------------------------------------------

/// Project onto the intersection of the box bounds and the Σ = 1 simplex:
/// clamp, then redistribute the residual across axes with remaining slack.
fn project(v: &mut [f64], bounds: &[(f64, f64)]) {
    for _ in 0..64 {
        for (x, (lo, hi)) in v.iter_mut().zip(bounds) {
            *x = x.clamp(*lo, *hi);
        }
        let residual = 1.0 - v.iter().sum::<f64>();
        if residual.abs() < 1e-12 {
            return;
        }
        let slacks: Vec<f64> = v
            .iter()
            .zip(bounds)
            .map(|(x, (lo, hi))| {
                if residual > 0.0 {
                    hi - x
                } else {
                    x - lo
                }
            })
            .collect();
        let total: f64 = slacks.iter().sum();
        if total <= 1e-15 {
            return;
        }
        for (x, s) in v.iter_mut().zip(&slacks) {
            *x += residual * s / total;
        }
    }
}

fn feasible(bounds: &[(f64, f64)]) -> bool {
    let min_sum: f64 = bounds.iter().map(|(lo, _)| lo).sum();
    let max_sum: f64 = bounds.iter().map(|(_, hi)| hi).sum();
    min_sum <= 1.0 + FEASIBILITY_EPS && max_sum >= 1.0 - FEASIBILITY_EPS
}

// ---------------------------------------------------------------------------
// Objective
// ---------------------------------------------------------------------------

struct Objective<'a> {
    input: &'a OptimizeInput<'a>,
    token: &'a CancellationToken,
    cache: HashMap<Vec<i64>, f64>,
    cache_scale: f64,
    evaluations: u32,
}

impl<'a> Objective<'a> {
    fn new(input: &'a OptimizeInput<'a>, token: &'a CancellationToken) -> Self {
        Self {
            input,
            token,
            cache: HashMap::new(),
            cache_scale: 10f64.powi(input.config.cache_decimals as i32),
            evaluations: 0,
        }
    }

    fn key(&self, x: &[f64]) -> Vec<i64> {
        x.iter().map(|v| (v * self.cache_scale).round() as i64).collect()
    }

    /// Composite score of the allocation, minus a penalty per violated hard
    /// constraint. Memoized on the rounded vector.
    fn score(&mut self, x: &[f64]) -> GreenlightResult<f64> {
        let key = self.key(x);
        if let Some(v) = self.cache.get(&key) {
            return Ok(*v);
        }
        self.evaluations += 1;

        let targets: Vec<(InstrumentKind, Decimal)> = DECISION_KINDS
            .iter()
            .zip(x)
            .map(|(kind, frac)| {
                let pct = Decimal::from_f64(*frac).ok_or(GreenlightError::InvalidInput {
                    field: "allocation".into(),
                    reason: format!("Non-finite allocation fraction for {kind}"),
                })?;
                Ok((*kind, pct))
            })
            .collect::<GreenlightResult<Vec<_>>>()?;
        let template = AllocationTemplate::new("candidate", targets)?;
        let stack = build_stack(&template, self.input.budget, &self.input.costs)?.result;

        let scenario = ScenarioInput {
            name: "candidate".into(),
            stack: &stack,
            template: self.input.template,
            horizon: self.input.horizon,
            expected_revenue: self.input.expected_revenue,
            expected_term_years: self.input.expected_term_years,
            cost_of_equity: self.input.cost_of_equity,
            incentives: self.input.incentives.clone(),
            hard_constraints: self.input.hard_constraints.clone(),
            return_config: self.input.return_config.clone(),
            weights: self.input.weights.clone(),
            thresholds: self.input.thresholds.clone(),
            risk: None,
        };
        let eval = evaluate_scenario(&scenario, self.token)?.result;
        let value = eval.scores.composite(&self.input.weights)
            - VIOLATION_PENALTY * eval.validation.violations.len() as f64;

        self.cache.insert(key, value);
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Single-start ascent
// ---------------------------------------------------------------------------

struct StartResult {
    outcome: StartOutcome,
    best_x: Vec<f64>,
}

fn solve_from(
    start_index: u32,
    mut x: Vec<f64>,
    bounds: &[(f64, f64)],
    objective: &mut Objective<'_>,
    token: &CancellationToken,
) -> GreenlightResult<StartResult> {
    let config = &objective.input.config;
    project(&mut x, bounds);
    let mut fx = objective.score(&x)?;
    let mut status = SolverStatus::MaxIterations;
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        if token.is_cancelled() {
            status = SolverStatus::Cancelled;
            break;
        }
        iterations += 1;

        // Forward-difference gradient along projected perturbations
        let mut gradient = vec![0.0; x.len()];
        for i in 0..x.len() {
            let mut xp = x.clone();
            xp[i] += config.gradient_step;
            project(&mut xp, bounds);
            gradient[i] = (objective.score(&xp)? - fx) / config.gradient_step;
        }
        let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
        if norm < f64::EPSILON {
            status = SolverStatus::Converged;
            break;
        }

        // Backtracking line search along the ascent direction
        let mut step = config.initial_step;
        let mut improved = false;
        for _ in 0..=config.max_backtracks {
            let mut candidate: Vec<f64> = x
                .iter()
                .zip(&gradient)
                .map(|(xi, gi)| xi + step * gi / norm)
                .collect();
            project(&mut candidate, bounds);
            let fc = objective.score(&candidate)?;
            if fc > fx {
                improved = fc - fx > config.tolerance;
                x = candidate;
                fx = fc;
                break;
            }
            step *= config.backtrack_factor;
        }
        if !improved {
            status = SolverStatus::Converged;
            break;
        }
    }

    Ok(StartResult {
        outcome: StartOutcome {
            start_index,
            score: fx,
            iterations,
            evaluations: objective.evaluations,
            status,
        },
        best_x: x,
    })
}

// ---------------------------------------------------------------------------
// Multi-start search
// ---------------------------------------------------------------------------

fn start_point(index: u32, bounds: &[(f64, f64)], seed: u64) -> Vec<f64> {
    let mut x: Vec<f64> = if index == 0 {
        // Deterministic anchor start at the bound midpoints
        bounds.iter().map(|(lo, hi)| (lo + hi) / 2.0).collect()
    } else {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
        bounds
            .iter()
            .map(|(lo, hi)| rng.gen_range(*lo..=*hi))
            .collect()
    };
    project(&mut x, bounds);
    x
}

fn ordered_bounds(input: &OptimizeInput<'_>) -> GreenlightResult<Vec<(f64, f64)>> {
    DECISION_KINDS
        .iter()
        .map(|kind| {
            let b = input
                .bounds
                .iter()
                .find(|b| b.kind == *kind)
                .ok_or_else(|| GreenlightError::InvalidInput {
                    field: "bounds".into(),
                    reason: format!("Missing bound for {kind}"),
                })?;
            if b.min < 0.0 || b.max > 1.0 || b.min > b.max {
                return Err(GreenlightError::InvalidInput {
                    field: "bounds".into(),
                    reason: format!("Invalid bound [{}, {}] for {kind}", b.min, b.max),
                });
            }
            Ok((b.min, b.max))
        })
        .collect()
}

/// Search for the allocation maximizing the composite score.
///
/// Multi-start projected-gradient ascent: each start runs independently with
/// its own seeded randomization and memo cache, in parallel; the report keeps
/// every start's outcome so the convergence spread is visible. Infeasible
/// bounds produce an `Infeasible` report, not an error.
pub fn optimize_structure(
    input: &OptimizeInput<'_>,
    token: &CancellationToken,
) -> GreenlightResult<ComputationOutput<OptimizationReport>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    let bounds = ordered_bounds(input)?;
    if !feasible(&bounds) {
        let report = OptimizationReport {
            status: SolverStatus::Infeasible,
            best_allocation: vec![],
            best_score: 0.0,
            best_stack: None,
            starts: vec![],
            spread: ConvergenceSpread {
                std_dev: 0.0,
                range: 0.0,
            },
            total_evaluations: 0,
        };
        let elapsed = start.elapsed().as_micros() as u64;
        return Ok(with_metadata(
            "Capital Structure Optimization",
            &serde_json::json!({ "num_starts": 0, "seed": input.config.seed }),
            vec!["Allocation bounds admit no vector summing to 1".into()],
            elapsed,
            report,
        ));
    }
    if input.config.num_starts == 0 {
        return Err(GreenlightError::InvalidInput {
            field: "num_starts".into(),
            reason: "At least one start is required".into(),
        });
    }

    let results: Vec<StartResult> = (0..input.config.num_starts)
        .into_par_iter()
        .map(|i| {
            let x0 = start_point(i, &bounds, input.config.seed);
            let mut objective = Objective::new(input, token);
            solve_from(i, x0, &bounds, &mut objective, token)
        })
        .collect::<GreenlightResult<Vec<_>>>()?;

    let best = results
        .iter()
        .max_by(|a, b| {
            a.outcome
                .score
                .partial_cmp(&b.outcome.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Tie-break on start index so parallel order cannot matter
                .then(b.outcome.start_index.cmp(&a.outcome.start_index))
        })
        .ok_or_else(|| GreenlightError::InsufficientData("No optimizer starts ran".into()))?;

    let scores: Vec<f64> = results.iter().map(|r| r.outcome.score).collect();
    let total_evaluations: u32 = results.iter().map(|r| r.outcome.evaluations).sum();
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
    let range = scores.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b))
        - scores.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    if variance.sqrt() > 1.0 {
        warnings.push(format!(
            "Starts disagree (objective std dev {:.3}); the surface may be multimodal",
            variance.sqrt()
        ));
    }

    let status = if token.is_cancelled() {
        SolverStatus::Cancelled
    } else {
        best.outcome.status
    };

    let best_allocation: Vec<(InstrumentKind, f64)> = DECISION_KINDS
        .iter()
        .copied()
        .zip(best.best_x.iter().copied())
        .collect();
    let best_stack = {
        let targets: Vec<(InstrumentKind, Decimal)> = best_allocation
            .iter()
            .map(|(kind, frac)| (*kind, Decimal::from_f64(*frac).unwrap_or(Decimal::ZERO)))
            .collect();
        AllocationTemplate::new("optimized", targets)
            .and_then(|t| build_stack(&t, input.budget, &input.costs))
            .map(|out| out.result)
            .ok()
    };

    let report = OptimizationReport {
        status,
        best_allocation,
        best_score: best.outcome.score,
        best_stack,
        starts: results.into_iter().map(|r| r.outcome).collect(),
        spread: ConvergenceSpread {
            std_dev: variance.sqrt(),
            range,
        },
        total_evaluations,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Capital Structure Optimization",
        &serde_json::json!({
            "num_starts": input.config.num_starts,
            "seed": input.config.seed,
            "max_iterations": input.config.max_iterations,
            "tolerance": input.config.tolerance,
            "budget": input.budget.to_string(),
        }),
        warnings,
        elapsed,
        report,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
