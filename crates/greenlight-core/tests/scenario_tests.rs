use greenlight_core::cancel::CancellationToken;
use greenlight_core::capital::constraints::HardConstraints;
use greenlight_core::capital::templates::{build_stack_named, CostAssumptions, TemplateSet};
use greenlight_core::evaluate::comparator::{head_to_head, rank, WeightProfile};
use greenlight_core::evaluate::evaluator::{
    evaluate_scenario, ObjectiveWeights, ScenarioEvaluation, ScenarioInput, ScoreThresholds,
};
use greenlight_core::evaluate::pareto::{analyze_evaluations, ObjectiveAxis, ObjectivePair};
use greenlight_core::optimize::solver::{
    default_bounds, optimize_structure, OptimizeInput, OptimizerConfig, SolverStatus,
};
use greenlight_core::revenue::projection::{RevenueTemplate, TemplateLibrary};
use greenlight_core::risk::simulation::RevenueDistribution;
use greenlight_core::waterfall::returns::ReturnConfig;
use rust_decimal_macros::dec;

// ===========================================================================
// Scenario evaluation and comparison across the standard templates
// ===========================================================================

fn theatrical() -> RevenueTemplate {
    TemplateLibrary::standard()
        .get("theatrical_led")
        .unwrap()
        .clone()
}

fn scenario<'a>(
    name: &str,
    stack: &'a greenlight_core::capital::stack::CapitalStack,
    template: &'a RevenueTemplate,
    expected_revenue: rust_decimal::Decimal,
) -> ScenarioInput<'a> {
    ScenarioInput {
        name: name.into(),
        stack,
        template,
        horizon: 24,
        expected_revenue,
        expected_term_years: dec!(2),
        cost_of_equity: dec!(0.20),
        incentives: None,
        hard_constraints: HardConstraints::default(),
        return_config: ReturnConfig::default(),
        weights: ObjectiveWeights::default(),
        thresholds: ScoreThresholds::default(),
        risk: None,
    }
}

fn evaluate_templates(expected_revenue: rust_decimal::Decimal) -> Vec<ScenarioEvaluation> {
    let set = TemplateSet::standard();
    let costs = CostAssumptions::default();
    let template = theatrical();
    let token = CancellationToken::new();
    set.names()
        .iter()
        .map(|&name| {
            let stack = build_stack_named(name, &set, dec!(20000000), &costs)
                .unwrap()
                .result;
            let mut input = scenario(name, &stack, &template, expected_revenue);
            // The aggressive template leverages 3:1; compare it on covenants
            // that admit it
            input.hard_constraints = HardConstraints {
                max_debt_to_equity: dec!(3.0),
                ..HardConstraints::default()
            };
            evaluate_scenario(&input, &token).unwrap().result
        })
        .collect()
}

#[test]
fn test_standard_templates_all_evaluate() {
    let evals = evaluate_templates(dec!(45000000));
    assert_eq!(evals.len(), 4);
    for e in &evals {
        assert!(e.is_valid, "{} failed hard constraints", e.name);
        assert!(e.score > 0.0 && e.score <= 100.0);
    }
}

#[test]
fn test_ranking_is_complete_and_ordered() {
    let evals = evaluate_templates(dec!(45000000));
    let ranked = rank(&evals, &WeightProfile::producer()).unwrap().result;
    assert_eq!(ranked.len(), evals.len());
    for pair in ranked.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(ranked[0].rank, 1);
}

#[test]
fn test_head_to_head_consistent_with_rank() {
    let evals = evaluate_templates(dec!(45000000));
    let profile = WeightProfile::equity_investor();
    let ranked = rank(&evals, &profile).unwrap().result;
    let first = evals.iter().find(|e| e.name == ranked[0].name).unwrap();
    let last = evals
        .iter()
        .find(|e| e.name == ranked.last().unwrap().name)
        .unwrap();
    let h2h = head_to_head(first, last, &profile);
    if ranked[0].score > ranked.last().unwrap().score {
        assert_eq!(h2h.winner.as_deref(), Some(first.name.as_str()));
    }
}

#[test]
fn test_pareto_over_template_evaluations() {
    let evals = evaluate_templates(dec!(45000000));
    let analysis = analyze_evaluations(&evals, ObjectivePair::default())
        .unwrap()
        .result;
    assert_eq!(analysis.pair, "expected_return_vs_risk");
    assert_eq!(
        analysis.frontier.len() + analysis.dominated.len(),
        evals.len()
    );
    assert!(!analysis.recommendations.balanced.is_empty());

    // The same evaluations sliced on a different pair stay fully partitioned
    let by_cost = analyze_evaluations(
        &evals,
        ObjectivePair::new(ObjectiveAxis::ExpectedReturn, ObjectiveAxis::Cost).unwrap(),
    )
    .unwrap()
    .result;
    assert_eq!(by_cost.frontier.len() + by_cost.dominated.len(), evals.len());
}

// ===========================================================================
// Stochastic evaluation reproducibility
// ===========================================================================

#[test]
fn test_stochastic_evaluation_reproducible() {
    let set = TemplateSet::standard();
    let stack = build_stack_named("balanced", &set, dec!(20000000), &CostAssumptions::default())
        .unwrap()
        .result;
    let template = theatrical();
    let token = CancellationToken::new();

    let run = || {
        let mut input = scenario("stochastic", &stack, &template, dec!(45000000));
        input.risk = Some(greenlight_core::evaluate::evaluator::RiskSettings {
            distribution: RevenueDistribution::Triangular {
                min: 15_000_000.0,
                mode: 45_000_000.0,
                max: 100_000_000.0,
            },
            num_runs: 200,
            seed: 99,
        });
        evaluate_scenario(&input, &token).unwrap().result
    };
    let a = run();
    let b = run();
    assert_eq!(
        a.metrics.recoupment_probability,
        b.metrics.recoupment_probability
    );
    assert_eq!(a.score, b.score);
}

// ===========================================================================
// Optimizer end to end
// ===========================================================================

#[test]
fn test_optimizer_finds_valid_structure() {
    let template = theatrical();
    let input = OptimizeInput {
        budget: dec!(20000000),
        template: &template,
        horizon: 16,
        expected_revenue: dec!(45000000),
        expected_term_years: dec!(2),
        cost_of_equity: dec!(0.20),
        incentives: None,
        costs: CostAssumptions::default(),
        hard_constraints: HardConstraints::default(),
        return_config: ReturnConfig::default(),
        weights: ObjectiveWeights::default(),
        thresholds: ScoreThresholds::default(),
        bounds: default_bounds(),
        config: OptimizerConfig {
            max_iterations: 30,
            num_starts: 3,
            seed: 5,
            ..OptimizerConfig::default()
        },
    };
    let report = optimize_structure(&input, &CancellationToken::new())
        .unwrap()
        .result;

    assert!(matches!(
        report.status,
        SolverStatus::Converged | SolverStatus::MaxIterations
    ));
    let stack = report.best_stack.expect("optimizer produced a stack");
    assert_eq!(stack.budget(), dec!(20000000));

    // The optimized structure must itself evaluate as valid
    let check = scenario("optimized", &stack, &template, dec!(45000000));
    let eval = evaluate_scenario(&check, &CancellationToken::new())
        .unwrap()
        .result;
    assert!(eval.is_valid);
}
