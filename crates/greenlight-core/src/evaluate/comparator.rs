use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;

use crate::error::GreenlightError;
use crate::evaluate::evaluator::{ObjectiveWeights, ScenarioEvaluation};
use crate::types::*;
use crate::GreenlightResult;

// ---------------------------------------------------------------------------
// Weight profiles
// ---------------------------------------------------------------------------

/// A named stakeholder perspective: the same component scores re-weighted
/// for whoever is reading the comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightProfile {
    pub name: String,
    pub weights: ObjectiveWeights,
}

impl WeightProfile {
    /// Equity investors care about upside and dilution-adjusted return.
    pub fn equity_investor() -> Self {
        Self {
            name: "equity_investor".into(),
            weights: ObjectiveWeights {
                equity_irr: 0.45,
                incentive_capture: 0.10,
                recoupment: 0.20,
                cost_of_capital: 0.10,
                debt_recovery: 0.15,
            },
        }
    }

    /// Lenders care about getting repaid, not about equity upside.
    pub fn lender() -> Self {
        Self {
            name: "lender".into(),
            weights: ObjectiveWeights {
                equity_irr: 0.05,
                incentive_capture: 0.10,
                recoupment: 0.30,
                cost_of_capital: 0.10,
                debt_recovery: 0.45,
            },
        }
    }

    /// Producers care about cheap capital and maximizing soft money.
    pub fn producer() -> Self {
        Self {
            name: "producer".into(),
            weights: ObjectiveWeights {
                equity_irr: 0.15,
                incentive_capture: 0.35,
                recoupment: 0.15,
                cost_of_capital: 0.25,
                debt_recovery: 0.10,
            },
        }
    }

    pub fn custom(name: &str, weights: ObjectiveWeights) -> Self {
        Self {
            name: name.into(),
            weights,
        }
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// One scenario's position in a ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedScenario {
    pub rank: u32,
    pub name: String,
    pub score: f64,
    pub is_valid: bool,
}

/// Per-component comparison between two scenarios.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDelta {
    pub component: String,
    pub left: f64,
    pub right: f64,
    /// left minus right
    pub delta: f64,
}

/// Direct comparison of two scenarios under one weight profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadToHead {
    pub profile: String,
    /// Winning scenario name; None on an exact tie
    pub winner: Option<String>,
    pub left_score: f64,
    pub right_score: f64,
    pub margin: f64,
    pub components: Vec<ComponentDelta>,
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

fn profile_score(eval: &ScenarioEvaluation, profile: &WeightProfile) -> f64 {
    if eval.is_valid {
        eval.scores.composite(&profile.weights)
    } else {
        0.0
    }
}

/// Rank scenarios under a weight profile, best first. Invalid scenarios
/// always rank below valid ones; ties break by name for determinism.
pub fn rank(
    evaluations: &[ScenarioEvaluation],
    profile: &WeightProfile,
) -> GreenlightResult<ComputationOutput<Vec<RankedScenario>>> {
    let start = Instant::now();
    let warnings: Vec<String> = Vec::new();

    if evaluations.is_empty() {
        return Err(GreenlightError::InsufficientData(
            "At least one scenario evaluation is required".into(),
        ));
    }

    let mut scored: Vec<(f64, &ScenarioEvaluation)> = evaluations
        .iter()
        .map(|e| (profile_score(e, profile), e))
        .collect();
    scored.sort_by(|(sa, a), (sb, b)| {
        b.is_valid
            .cmp(&a.is_valid)
            .then(sb.partial_cmp(sa).unwrap_or(Ordering::Equal))
            .then(a.name.cmp(&b.name))
    });

    let ranked: Vec<RankedScenario> = scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, e))| RankedScenario {
            rank: (i + 1) as u32,
            name: e.name.clone(),
            score,
            is_valid: e.is_valid,
        })
        .collect();

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Scenario Ranking",
        &serde_json::json!({
            "profile": profile.name,
            "num_scenarios": evaluations.len(),
        }),
        warnings,
        elapsed,
        ranked,
    ))
}

/// The top `n` scenarios under a profile.
pub fn top_n(
    evaluations: &[ScenarioEvaluation],
    profile: &WeightProfile,
    n: usize,
) -> GreenlightResult<ComputationOutput<Vec<RankedScenario>>> {
    let mut out = rank(evaluations, profile)?;
    out.result.truncate(n);
    Ok(out)
}

/// Compare two scenarios component by component under one profile.
pub fn head_to_head(
    left: &ScenarioEvaluation,
    right: &ScenarioEvaluation,
    profile: &WeightProfile,
) -> HeadToHead {
    let left_score = profile_score(left, profile);
    let right_score = profile_score(right, profile);
    let components: Vec<ComponentDelta> = left
        .scores
        .items()
        .iter()
        .zip(right.scores.items().iter())
        .map(|((name, l), (_, r))| ComponentDelta {
            component: name.to_string(),
            left: *l,
            right: *r,
            delta: l - r,
        })
        .collect();

    let winner = match left_score.partial_cmp(&right_score) {
        Some(Ordering::Greater) => Some(left.name.clone()),
        Some(Ordering::Less) => Some(right.name.clone()),
        _ => None,
    };

    HeadToHead {
        profile: profile.name.clone(),
        winner,
        left_score,
        right_score,
        margin: (left_score - right_score).abs(),
        components,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
