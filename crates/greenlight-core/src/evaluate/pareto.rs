use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::GreenlightError;
use crate::evaluate::evaluator::ScenarioEvaluation;
use crate::types::*;
use crate::GreenlightResult;

// ---------------------------------------------------------------------------
// Objective points and axes
// ---------------------------------------------------------------------------

/// A scenario reduced to the three objective axes: return (higher better),
/// risk and cost (lower better).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoPoint {
    pub name: String,
    /// Equity IRR; an unresolved IRR maps to 0
    pub expected_return: f64,
    /// Probability of recoupment shortfall (1 − full-recoupment probability)
    pub risk: f64,
    /// Blended annual cost of capital
    pub cost: f64,
}

impl ParetoPoint {
    pub fn from_evaluation(eval: &ScenarioEvaluation) -> Self {
        Self {
            name: eval.name.clone(),
            expected_return: eval
                .metrics
                .equity_irr
                .and_then(|v| v.to_f64())
                .unwrap_or(0.0),
            risk: 1.0
                - eval
                    .metrics
                    .recoupment_probability
                    .to_f64()
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0),
            cost: eval.metrics.cost_of_capital.to_f64().unwrap_or(0.0),
        }
    }
}

/// One objective axis a frontier can be computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveAxis {
    ExpectedReturn,
    Risk,
    Cost,
}

impl ObjectiveAxis {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectiveAxis::ExpectedReturn => "expected_return",
            ObjectiveAxis::Risk => "risk",
            ObjectiveAxis::Cost => "cost",
        }
    }

    fn value(&self, p: &ParetoPoint) -> f64 {
        match self {
            ObjectiveAxis::ExpectedReturn => p.expected_return,
            ObjectiveAxis::Risk => p.risk,
            ObjectiveAxis::Cost => p.cost,
        }
    }

    fn higher_is_better(&self) -> bool {
        matches!(self, ObjectiveAxis::ExpectedReturn)
    }

    /// True when `a` is at least as good as `b` on this axis.
    fn at_least_as_good(&self, a: &ParetoPoint, b: &ParetoPoint) -> bool {
        if self.higher_is_better() {
            self.value(a) >= self.value(b)
        } else {
            self.value(a) <= self.value(b)
        }
    }

    fn strictly_better(&self, a: &ParetoPoint, b: &ParetoPoint) -> bool {
        if self.higher_is_better() {
            self.value(a) > self.value(b)
        } else {
            self.value(a) < self.value(b)
        }
    }
}

/// The pair of objectives a trade-off analysis is run over. Dominance, the
/// frontier, and the trade-off slope all refer only to these two axes; the
/// third metric is carried along for reporting but never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectivePair {
    pub first: ObjectiveAxis,
    pub second: ObjectiveAxis,
}

impl ObjectivePair {
    pub fn new(first: ObjectiveAxis, second: ObjectiveAxis) -> GreenlightResult<Self> {
        if first == second {
            return Err(GreenlightError::InvalidInput {
                field: "objective_pair".into(),
                reason: format!("Both axes are {}", first.name()),
            });
        }
        Ok(Self { first, second })
    }

    pub fn name(&self) -> String {
        format!("{}_vs_{}", self.first.name(), self.second.name())
    }
}

/// Return against risk, the customary reading.
impl Default for ObjectivePair {
    fn default() -> Self {
        Self {
            first: ObjectiveAxis::ExpectedReturn,
            second: ObjectiveAxis::Risk,
        }
    }
}

/// True when `a` is at least as good on both pair axes and strictly better
/// on at least one.
fn dominates(a: &ParetoPoint, b: &ParetoPoint, pair: ObjectivePair) -> bool {
    let at_least_as_good =
        pair.first.at_least_as_good(a, b) && pair.second.at_least_as_good(a, b);
    let strictly_better =
        pair.first.strictly_better(a, b) || pair.second.strictly_better(a, b);
    at_least_as_good && strictly_better
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// A point excluded from the frontier, with one witness that beats it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DominatedPoint {
    pub name: String,
    pub dominated_by: String,
}

/// Named picks off the frontier for a reader who wants one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendations {
    pub highest_return: String,
    pub lowest_risk: String,
    pub lowest_cost: String,
    /// Frontier point closest to the normalized ideal corner
    pub balanced: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParetoAnalysis {
    /// Name of the objective pair the frontier was computed over,
    /// e.g. "expected_return_vs_risk"
    pub pair: String,
    pub frontier: Vec<ParetoPoint>,
    pub dominated: Vec<DominatedPoint>,
    /// Mean change in the first axis per unit of the second axis between
    /// frontier points adjacent on the second axis; None when no adjacent
    /// frontier pair differs on the second axis
    pub tradeoff_slope: Option<f64>,
    pub recommendations: Recommendations,
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        // Degenerate axis carries no information
        0.5
    } else {
        (value - min) / (max - min)
    }
}

fn balanced_pick(frontier: &[ParetoPoint], all: &[ParetoPoint]) -> String {
    let min_max = |f: fn(&ParetoPoint) -> f64| {
        let lo = all.iter().map(f).fold(f64::INFINITY, f64::min);
        let hi = all.iter().map(f).fold(f64::NEG_INFINITY, f64::max);
        (lo, hi)
    };
    let (ret_lo, ret_hi) = min_max(|p| p.expected_return);
    let (risk_lo, risk_hi) = min_max(|p| p.risk);
    let (cost_lo, cost_hi) = min_max(|p| p.cost);

    let mut best: Option<(f64, &ParetoPoint)> = None;
    for p in frontier {
        let r = normalize(p.expected_return, ret_lo, ret_hi);
        let k = normalize(p.risk, risk_lo, risk_hi);
        let c = normalize(p.cost, cost_lo, cost_hi);
        // Ideal corner: full return, zero risk, zero cost
        let distance = ((1.0 - r).powi(2) + k.powi(2) + c.powi(2)).sqrt();
        let better = match &best {
            None => true,
            Some((d, b)) => distance < *d || (distance == *d && p.name < b.name),
        };
        if better {
            best = Some((distance, p));
        }
    }
    best.map(|(_, p)| p.name.clone()).unwrap_or_default()
}

/// Partition scenarios into the Pareto frontier and the dominated set over
/// the chosen objective pair, and summarize the trade-off along the
/// frontier.
///
/// Every input point lands in exactly one partition. Ties (points identical
/// on both pair axes) do not dominate each other and stay on the frontier
/// together. The frontier is pair-specific: a point that survives one pair
/// may be dominated under another.
pub fn analyze(
    points: &[ParetoPoint],
    pair: ObjectivePair,
) -> GreenlightResult<ComputationOutput<ParetoAnalysis>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    if points.is_empty() {
        return Err(GreenlightError::InsufficientData(
            "Pareto analysis requires at least one scenario".into(),
        ));
    }

    let mut frontier: Vec<ParetoPoint> = Vec::new();
    let mut dominated: Vec<DominatedPoint> = Vec::new();
    for p in points {
        match points.iter().find(|q| dominates(q, p, pair)) {
            Some(winner) => dominated.push(DominatedPoint {
                name: p.name.clone(),
                dominated_by: winner.name.clone(),
            }),
            None => frontier.push(p.clone()),
        }
    }

    // Trade-off slope between frontier points adjacent on the second axis
    let mut ordered = frontier.clone();
    ordered.sort_by(|a, b| {
        pair.second
            .value(a)
            .partial_cmp(&pair.second.value(b))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.name.cmp(&b.name))
    });
    let mut slopes: Vec<f64> = Vec::new();
    for w in ordered.windows(2) {
        let d_second = pair.second.value(&w[1]) - pair.second.value(&w[0]);
        if d_second.abs() > f64::EPSILON {
            slopes.push((pair.first.value(&w[1]) - pair.first.value(&w[0])) / d_second);
        }
    }
    let tradeoff_slope = if slopes.is_empty() {
        None
    } else {
        Some(slopes.iter().sum::<f64>() / slopes.len() as f64)
    };

    let pick = |cmp: fn(&ParetoPoint, &ParetoPoint) -> bool| {
        let mut best = &frontier[0];
        for p in &frontier[1..] {
            if cmp(p, best) {
                best = p;
            }
        }
        best.name.clone()
    };
    let recommendations = Recommendations {
        highest_return: pick(|a, b| a.expected_return > b.expected_return),
        lowest_risk: pick(|a, b| a.risk < b.risk),
        lowest_cost: pick(|a, b| a.cost < b.cost),
        balanced: balanced_pick(&frontier, points),
    };

    let analysis = ParetoAnalysis {
        pair: pair.name(),
        frontier,
        dominated,
        tradeoff_slope,
        recommendations,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Pareto Frontier Analysis",
        &serde_json::json!({
            "num_scenarios": points.len(),
            "pair": pair.name(),
            "axes": [pair.first.name(), pair.second.name()],
        }),
        warnings,
        elapsed,
        analysis,
    ))
}

/// Convenience wrapper over full evaluations.
pub fn analyze_evaluations(
    evaluations: &[ScenarioEvaluation],
    pair: ObjectivePair,
) -> GreenlightResult<ComputationOutput<ParetoAnalysis>> {
    let points: Vec<ParetoPoint> = evaluations
        .iter()
        .map(ParetoPoint::from_evaluation)
        .collect();
    analyze(&points, pair)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
