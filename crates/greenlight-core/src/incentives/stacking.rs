use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::GreenlightError;
use crate::incentives::rules::{
    JurisdictionSpend, MonetizationMethod, PolicyStore, QualificationStatus, SubsidyRule,
};
use crate::types::*;
use crate::GreenlightResult;

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// One rule the caller wants applied, with its chosen monetization method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSelection {
    pub rule_id: String,
    pub method: MonetizationMethod,
}

/// Caller-supplied stacking policy. Two rules may stack only when their
/// jurisdiction pair is explicitly whitelisted (distinct tax bases are a
/// legal determination, never inferred here). Combined caps bound the total
/// net benefit extracted from one jurisdiction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackingConfig {
    /// Unordered jurisdiction pairs allowed to stack. Same-jurisdiction
    /// stacking requires the reflexive pair to be listed.
    pub allowed_pairs: Vec<(String, String)>,
    /// Combined net-benefit cap per jurisdiction.
    pub combined_caps: BTreeMap<String, Money>,
}

impl StackingConfig {
    pub fn allows(&self, a: &str, b: &str) -> bool {
        self.allowed_pairs
            .iter()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a))
    }
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Net cash benefit of a single rule invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncentiveResult {
    pub rule_id: String,
    pub jurisdiction: String,
    /// Credit earned before monetization costs
    pub gross_credit: Money,
    /// Broker/transfer discount deducted from the gross credit
    pub discount_cost: Money,
    /// Tax cost deducted from the gross credit
    pub tax_cost: Money,
    /// Cash actually received
    pub net_benefit: Money,
    /// Net benefit relative to the jurisdiction's qualifying spend
    pub effective_rate: Rate,
    /// Months from spend to cash receipt
    pub months_to_cash: u32,
    /// Non-fatal issues (below minimum spend, uncertain qualification)
    pub warnings: Vec<String>,
}

/// Rules that were stacked together against one jurisdiction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackedGroup {
    pub jurisdiction: String,
    pub rule_ids: Vec<String>,
}

/// Combined benefit across all applied rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiJurisdictionResult {
    pub results: Vec<IncentiveResult>,
    pub total_net_benefit: Money,
    /// Total net benefit over total qualifying spend
    pub blended_effective_rate: Rate,
    pub stacked_groups: Vec<StackedGroup>,
}

// ---------------------------------------------------------------------------
// Single-rule calculation
// ---------------------------------------------------------------------------

fn single_result(
    rule: &SubsidyRule,
    spend: &JurisdictionSpend,
    method: MonetizationMethod,
    budget: Money,
) -> GreenlightResult<IncentiveResult> {
    if budget <= Decimal::ZERO {
        return Err(GreenlightError::InvalidInput {
            field: "budget".into(),
            reason: "Budget must be positive".into(),
        });
    }
    if spend.total() < Decimal::ZERO {
        return Err(GreenlightError::InvalidInput {
            field: "spend".into(),
            reason: "Qualifying spend cannot be negative".into(),
        });
    }

    let terms = rule.terms_for(method).ok_or_else(|| {
        GreenlightError::UnsupportedMonetization {
            rule_id: rule.id.clone(),
            method: method.to_string(),
        }
    })?;

    let mut warnings: Vec<String> = Vec::new();
    if spend.total() < rule.minimum_spend {
        warnings.push(format!(
            "Spend {} in {} is below rule {} minimum of {}",
            spend.total(),
            spend.jurisdiction,
            rule.id,
            rule.minimum_spend
        ));
    }

    let failed_qualification = match rule.qualification.status {
        QualificationStatus::Passed => false,
        QualificationStatus::Failed => {
            warnings.push(format!(
                "Rule {} qualification test '{}' failed; no credit earned",
                rule.id, rule.qualification.name
            ));
            true
        }
        QualificationStatus::Uncertain => {
            warnings.push(format!(
                "Rule {} qualification test '{}' outcome is uncertain",
                rule.id, rule.qualification.name
            ));
            false
        }
    };

    let basis = match rule.basis {
        crate::incentives::rules::CreditBasis::JurisdictionSpend => spend.total(),
        crate::incentives::rules::CreditBasis::TotalBudget => budget,
    };

    let gross = if failed_qualification {
        Decimal::ZERO
    } else {
        rule.cap.clamp(rule.schedule.gross_credit(basis), budget)
    };

    let discount_cost = gross * terms.discount_rate;
    let tax_cost = gross * terms.tax_cost_rate;
    let net_benefit = gross - discount_cost - tax_cost;

    let effective_rate = if spend.total().is_zero() {
        Decimal::ZERO
    } else {
        net_benefit / spend.total()
    };

    Ok(IncentiveResult {
        rule_id: rule.id.clone(),
        jurisdiction: rule.jurisdiction.clone(),
        gross_credit: gross,
        discount_cost,
        tax_cost,
        net_benefit,
        effective_rate,
        months_to_cash: terms.months_to_cash,
        warnings,
    })
}

/// Calculate the net cash benefit of a single subsidy rule.
///
/// Below-minimum spend and uncertain qualification attach warnings; an
/// unsupported monetization method is fatal.
pub fn calculate_single(
    rule: &SubsidyRule,
    spend: &JurisdictionSpend,
    method: MonetizationMethod,
    budget: Money,
) -> GreenlightResult<ComputationOutput<IncentiveResult>> {
    let start = Instant::now();
    let result = single_result(rule, spend, method, budget)?;
    let warnings = result.warnings.clone();

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Single-Rule Incentive Calculation",
        &serde_json::json!({
            "rule_id": rule.id,
            "jurisdiction": rule.jurisdiction,
            "method": method.to_string(),
            "budget": budget.to_string(),
            "qualifying_spend": spend.total().to_string(),
        }),
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Multi-rule stacking
// ---------------------------------------------------------------------------

/// Calculate stacked benefit across several rules and jurisdictions.
///
/// Each rule is computed independently, stacking legality is checked against
/// the whitelist, and per-jurisdiction combined caps are enforced by reducing
/// every stacked rule in proportion to its unadjusted share. The same
/// proportional policy applies to three or more stacked rules.
pub fn calculate_multi(
    budget: Money,
    spends: &[JurisdictionSpend],
    selections: &[RuleSelection],
    store: &dyn PolicyStore,
    config: &StackingConfig,
) -> GreenlightResult<ComputationOutput<MultiJurisdictionResult>> {
    let start = Instant::now();
    let mut warnings: Vec<String> = Vec::new();

    if selections.is_empty() {
        return Err(GreenlightError::InsufficientData(
            "At least one rule selection is required".into(),
        ));
    }

    // Resolve rules and their jurisdiction spends
    let mut resolved: Vec<(&SubsidyRule, &JurisdictionSpend, MonetizationMethod)> = Vec::new();
    for sel in selections {
        let rule = store
            .rule(&sel.rule_id)
            .ok_or_else(|| GreenlightError::RuleNotFound(sel.rule_id.clone()))?;
        let spend = spends
            .iter()
            .find(|s| s.jurisdiction == rule.jurisdiction)
            .ok_or_else(|| GreenlightError::InvalidInput {
                field: "spends".into(),
                reason: format!(
                    "No spend record for jurisdiction {} required by rule {}",
                    rule.jurisdiction, rule.id
                ),
            })?;
        resolved.push((rule, spend, sel.method));
    }

    // Every applied pair must be whitelisted
    for i in 0..resolved.len() {
        for j in (i + 1)..resolved.len() {
            let (a, b) = (resolved[i].0, resolved[j].0);
            if !config.allows(&a.jurisdiction, &b.jurisdiction) {
                return Err(GreenlightError::InvalidInput {
                    field: "selections".into(),
                    reason: format!(
                        "Rules {} and {} may not stack: jurisdiction pair ({}, {}) is not whitelisted",
                        a.id, b.id, a.jurisdiction, b.jurisdiction
                    ),
                });
            }
        }
    }

    let mut results: Vec<IncentiveResult> = Vec::new();
    for (rule, spend, method) in &resolved {
        let r = single_result(rule, spend, *method, budget)?;
        warnings.extend(r.warnings.iter().cloned());
        results.push(r);
    }

    // Per-jurisdiction combined caps: proportional reduction by unadjusted share
    let mut by_jurisdiction: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, r) in results.iter().enumerate() {
        by_jurisdiction
            .entry(r.jurisdiction.clone())
            .or_default()
            .push(idx);
    }

    for (jurisdiction, indices) in &by_jurisdiction {
        let Some(cap) = config.combined_caps.get(jurisdiction) else {
            continue;
        };
        let combined: Money = indices.iter().map(|&i| results[i].net_benefit).sum();
        if combined <= *cap || combined.is_zero() {
            continue;
        }
        let scale = cap / combined;
        for &i in indices {
            let r = &mut results[i];
            r.gross_credit *= scale;
            r.discount_cost *= scale;
            r.tax_cost *= scale;
            r.net_benefit *= scale;
            r.effective_rate *= scale;
        }
        warnings.push(format!(
            "Combined benefit {combined} in {jurisdiction} exceeds cap {cap}; reduced proportionally"
        ));
    }

    let stacked_groups: Vec<StackedGroup> = by_jurisdiction
        .iter()
        .filter(|(_, indices)| indices.len() > 1)
        .map(|(jurisdiction, indices)| StackedGroup {
            jurisdiction: jurisdiction.clone(),
            rule_ids: indices.iter().map(|&i| results[i].rule_id.clone()).collect(),
        })
        .collect();

    let total_net_benefit: Money = results.iter().map(|r| r.net_benefit).sum();
    let total_spend: Money = spends.iter().map(|s| s.total()).sum();
    let blended_effective_rate = if total_spend.is_zero() {
        Decimal::ZERO
    } else {
        total_net_benefit / total_spend
    };

    let output = MultiJurisdictionResult {
        results,
        total_net_benefit,
        blended_effective_rate,
        stacked_groups,
    };

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Multi-Jurisdiction Incentive Stacking",
        &serde_json::json!({
            "budget": budget.to_string(),
            "num_rules": selections.len(),
            "num_jurisdictions": spends.len(),
            "whitelisted_pairs": config.allowed_pairs.len(),
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
    use crate::incentives::rules::*;
    use rust_decimal_macros::dec;

    fn refund_terms() -> MonetizationTerms {
        MonetizationTerms {
            method: MonetizationMethod::DirectRefund,
            discount_rate: Decimal::ZERO,
            tax_cost_rate: Decimal::ZERO,
            months_to_cash: 9,
        }
    }

    fn transfer_terms() -> MonetizationTerms {
        MonetizationTerms {
            method: MonetizationMethod::TransferSale,
            discount_rate: dec!(0.08),
            tax_cost_rate: dec!(0.02),
            months_to_cash: 6,
        }
    }

    fn passed(name: &str) -> QualificationTest {
        QualificationTest {
            name: name.into(),
            status: QualificationStatus::Passed,
        }
    }

    fn flat_rule(id: &str, jurisdiction: &str, rate: Decimal) -> SubsidyRule {
        SubsidyRule {
            id: id.into(),
            jurisdiction: jurisdiction.into(),
            schedule: RateSchedule::Flat { rate },
            cap: CreditCap::None,
            basis: CreditBasis::JurisdictionSpend,
            minimum_spend: Decimal::ZERO,
            qualification: passed("cultural test"),
            methods: vec![refund_terms(), transfer_terms()],
        }
    }

    fn spend(jurisdiction: &str, labor: Decimal, goods: Decimal, post: Decimal) -> JurisdictionSpend {
        JurisdictionSpend {
            jurisdiction: jurisdiction.into(),
            labor,
            goods_services: goods,
            post_production: post,
        }
    }

    // --- Single-rule tests ---

    #[test]
    fn test_single_flat_refund() {
        let rule = flat_rule("uk", "UK", dec!(0.25));
        let s = spend("UK", dec!(6000000), dec!(3000000), dec!(1000000));
        let out = calculate_single(&rule, &s, MonetizationMethod::DirectRefund, dec!(30000000))
            .unwrap();
        let r = &out.result;
        assert_eq!(r.gross_credit, dec!(2500000));
        assert_eq!(r.net_benefit, dec!(2500000));
        assert_eq!(r.effective_rate, dec!(0.25));
        assert_eq!(r.months_to_cash, 9);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_single_transfer_discount_and_tax() {
        let rule = flat_rule("ga", "GA", dec!(0.30));
        let s = spend("GA", dec!(5000000), dec!(4000000), dec!(1000000));
        let out = calculate_single(&rule, &s, MonetizationMethod::TransferSale, dec!(30000000))
            .unwrap();
        let r = &out.result;
        // Gross 3M, discount 8% = 240k, tax 2% = 60k, net = 2.7M
        assert_eq!(r.gross_credit, dec!(3000000));
        assert_eq!(r.discount_cost, dec!(240000));
        assert_eq!(r.tax_cost, dec!(60000));
        assert_eq!(r.net_benefit, dec!(2700000));
    }

    #[test]
    fn test_single_unsupported_method_fatal() {
        let mut rule = flat_rule("uk", "UK", dec!(0.25));
        rule.methods = vec![refund_terms()];
        let s = spend("UK", dec!(1000000), dec!(0), dec!(0));
        let err = calculate_single(&rule, &s, MonetizationMethod::TaxOffset, dec!(30000000))
            .unwrap_err();
        match err {
            GreenlightError::UnsupportedMonetization { rule_id, method } => {
                assert_eq!(rule_id, "uk");
                assert_eq!(method, "tax_offset");
            }
            other => panic!("Expected UnsupportedMonetization, got: {other:?}"),
        }
    }

    #[test]
    fn test_single_below_minimum_spend_warns() {
        let mut rule = flat_rule("uk", "UK", dec!(0.25));
        rule.minimum_spend = dec!(2000000);
        let s = spend("UK", dec!(1000000), dec!(0), dec!(0));
        let out = calculate_single(&rule, &s, MonetizationMethod::DirectRefund, dec!(30000000))
            .unwrap();
        assert!(out.result.warnings.iter().any(|w| w.contains("below")));
        // Still computed
        assert_eq!(out.result.gross_credit, dec!(250000));
    }

    #[test]
    fn test_single_uncertain_qualification_warns() {
        let mut rule = flat_rule("fr", "FR", dec!(0.30));
        rule.qualification.status = QualificationStatus::Uncertain;
        let s = spend("FR", dec!(2000000), dec!(0), dec!(0));
        let out = calculate_single(&rule, &s, MonetizationMethod::DirectRefund, dec!(30000000))
            .unwrap();
        assert!(out.result.warnings.iter().any(|w| w.contains("uncertain")));
        assert_eq!(out.result.gross_credit, dec!(600000));
    }

    #[test]
    fn test_single_failed_qualification_zero_credit() {
        let mut rule = flat_rule("fr", "FR", dec!(0.30));
        rule.qualification.status = QualificationStatus::Failed;
        let s = spend("FR", dec!(2000000), dec!(0), dec!(0));
        let out = calculate_single(&rule, &s, MonetizationMethod::DirectRefund, dec!(30000000))
            .unwrap();
        assert_eq!(out.result.gross_credit, Decimal::ZERO);
        assert_eq!(out.result.net_benefit, Decimal::ZERO);
        assert!(!out.result.warnings.is_empty());
    }

    #[test]
    fn test_single_tiered_rule_with_cap() {
        let rule = SubsidyRule {
            id: "tiered".into(),
            jurisdiction: "NZ".into(),
            schedule: RateSchedule::Tiered {
                bands: vec![
                    RateBand {
                        up_to: Some(dec!(2000000)),
                        rate: dec!(0.40),
                    },
                    RateBand {
                        up_to: None,
                        rate: dec!(0.20),
                    },
                ],
            },
            cap: CreditCap::Absolute {
                amount: dec!(1000000),
            },
            basis: CreditBasis::JurisdictionSpend,
            minimum_spend: Decimal::ZERO,
            qualification: passed("significant economic benefit"),
            methods: vec![refund_terms()],
        };
        let s = spend("NZ", dec!(4000000), dec!(0), dec!(0));
        let out = calculate_single(&rule, &s, MonetizationMethod::DirectRefund, dec!(30000000))
            .unwrap();
        // Uncapped: 2M*40% + 2M*20% = 1.2M, capped at 1M
        assert_eq!(out.result.gross_credit, dec!(1000000));
    }

    // --- Multi-rule tests ---

    fn stack_config(pairs: &[(&str, &str)]) -> StackingConfig {
        StackingConfig {
            allowed_pairs: pairs
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
            combined_caps: BTreeMap::new(),
        }
    }

    #[test]
    fn test_multi_golden_value_regression() {
        // $30M budget, $16.5M UK spend, 25%-of-budget capped at 15%-of-budget
        // stacked with 36% uncapped on jurisdiction spend:
        // 0.15 * 30M + 0.36 * 16.5M = 4.5M + 5.94M = 10.44M
        let budget_rule = SubsidyRule {
            id: "uk-budget".into(),
            jurisdiction: "UK".into(),
            schedule: RateSchedule::Flat { rate: dec!(0.25) },
            cap: CreditCap::PctOfBudget { pct: dec!(0.15) },
            basis: CreditBasis::TotalBudget,
            minimum_spend: Decimal::ZERO,
            qualification: passed("cultural test"),
            methods: vec![refund_terms()],
        };
        let spend_rule = SubsidyRule {
            id: "uk-spend".into(),
            jurisdiction: "UK".into(),
            schedule: RateSchedule::Flat { rate: dec!(0.36) },
            cap: CreditCap::None,
            basis: CreditBasis::JurisdictionSpend,
            minimum_spend: Decimal::ZERO,
            qualification: passed("cultural test"),
            methods: vec![refund_terms()],
        };
        let store = InMemoryPolicyStore::from_rules(vec![budget_rule, spend_rule]);
        let spends = vec![spend("UK", dec!(10000000), dec!(4500000), dec!(2000000))];
        assert_eq!(spends[0].total(), dec!(16500000));

        let selections = vec![
            RuleSelection {
                rule_id: "uk-budget".into(),
                method: MonetizationMethod::DirectRefund,
            },
            RuleSelection {
                rule_id: "uk-spend".into(),
                method: MonetizationMethod::DirectRefund,
            },
        ];
        let out = calculate_multi(
            dec!(30000000),
            &spends,
            &selections,
            &store,
            &stack_config(&[("UK", "UK")]),
        )
        .unwrap();
        assert_eq!(out.result.total_net_benefit, dec!(10440000));
        assert_eq!(out.result.stacked_groups.len(), 1);
        assert_eq!(out.result.stacked_groups[0].rule_ids.len(), 2);
    }

    #[test]
    fn test_multi_missing_rule_fatal() {
        let store = InMemoryPolicyStore::from_rules(vec![flat_rule("uk", "UK", dec!(0.25))]);
        let spends = vec![spend("UK", dec!(1000000), dec!(0), dec!(0))];
        let selections = vec![RuleSelection {
            rule_id: "missing".into(),
            method: MonetizationMethod::DirectRefund,
        }];
        let err = calculate_multi(
            dec!(30000000),
            &spends,
            &selections,
            &store,
            &StackingConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, GreenlightError::RuleNotFound(id) if id == "missing"));
    }

    #[test]
    fn test_multi_unlisted_pair_rejected() {
        let store = InMemoryPolicyStore::from_rules(vec![
            flat_rule("uk", "UK", dec!(0.25)),
            flat_rule("fr", "FR", dec!(0.30)),
        ]);
        let spends = vec![
            spend("UK", dec!(1000000), dec!(0), dec!(0)),
            spend("FR", dec!(1000000), dec!(0), dec!(0)),
        ];
        let selections = vec![
            RuleSelection {
                rule_id: "uk".into(),
                method: MonetizationMethod::DirectRefund,
            },
            RuleSelection {
                rule_id: "fr".into(),
                method: MonetizationMethod::DirectRefund,
            },
        ];
        let err = calculate_multi(
            dec!(30000000),
            &spends,
            &selections,
            &store,
            &StackingConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, GreenlightError::InvalidInput { field, .. } if field == "selections"));
    }

    #[test]
    fn test_multi_combined_cap_proportional_split() {
        // Two rules net 4M and 6M against a 5M combined cap:
        // reduced to 2M and 3M, total exactly at the cap.
        let store = InMemoryPolicyStore::from_rules(vec![
            flat_rule("a", "CA", dec!(0.40)),
            flat_rule("b", "CA", dec!(0.60)),
        ]);
        let spends = vec![spend("CA", dec!(10000000), dec!(0), dec!(0))];
        let selections = vec![
            RuleSelection {
                rule_id: "a".into(),
                method: MonetizationMethod::DirectRefund,
            },
            RuleSelection {
                rule_id: "b".into(),
                method: MonetizationMethod::DirectRefund,
            },
        ];
        let mut config = stack_config(&[("CA", "CA")]);
        config.combined_caps.insert("CA".into(), dec!(5000000));

        let out = calculate_multi(dec!(30000000), &spends, &selections, &store, &config).unwrap();
        assert_eq!(out.result.total_net_benefit, dec!(5000000));
        assert_eq!(out.result.results[0].net_benefit, dec!(2000000));
        assert_eq!(out.result.results[1].net_benefit, dec!(3000000));
        assert!(out.warnings.iter().any(|w| w.contains("reduced proportionally")));
    }

    #[test]
    fn test_multi_three_way_proportional_split() {
        // 2M + 3M + 5M against a 5M cap: shares 0.2/0.3/0.5 of the cap.
        let store = InMemoryPolicyStore::from_rules(vec![
            flat_rule("x", "CA", dec!(0.20)),
            flat_rule("y", "CA", dec!(0.30)),
            flat_rule("z", "CA", dec!(0.50)),
        ]);
        let spends = vec![spend("CA", dec!(10000000), dec!(0), dec!(0))];
        let selections: Vec<RuleSelection> = ["x", "y", "z"]
            .iter()
            .map(|id| RuleSelection {
                rule_id: id.to_string(),
                method: MonetizationMethod::DirectRefund,
            })
            .collect();
        let mut config = stack_config(&[("CA", "CA")]);
        config.combined_caps.insert("CA".into(), dec!(5000000));

        let out = calculate_multi(dec!(30000000), &spends, &selections, &store, &config).unwrap();
        assert_eq!(out.result.total_net_benefit, dec!(5000000));
        assert_eq!(out.result.results[0].net_benefit, dec!(1000000));
        assert_eq!(out.result.results[1].net_benefit, dec!(1500000));
        assert_eq!(out.result.results[2].net_benefit, dec!(2500000));
    }

    #[test]
    fn test_multi_under_cap_untouched() {
        let store = InMemoryPolicyStore::from_rules(vec![flat_rule("a", "CA", dec!(0.10))]);
        let spends = vec![spend("CA", dec!(10000000), dec!(0), dec!(0))];
        let selections = vec![RuleSelection {
            rule_id: "a".into(),
            method: MonetizationMethod::DirectRefund,
        }];
        let mut config = StackingConfig::default();
        config.combined_caps.insert("CA".into(), dec!(5000000));
        let out = calculate_multi(dec!(30000000), &spends, &selections, &store, &config).unwrap();
        assert_eq!(out.result.total_net_benefit, dec!(1000000));
        assert!(out.result.stacked_groups.is_empty());
    }

    #[test]
    fn test_multi_blended_effective_rate() {
        let store = InMemoryPolicyStore::from_rules(vec![
            flat_rule("uk", "UK", dec!(0.25)),
            flat_rule("fr", "FR", dec!(0.30)),
        ]);
        let spends = vec![
            spend("UK", dec!(8000000), dec!(0), dec!(0)),
            spend("FR", dec!(2000000), dec!(0), dec!(0)),
        ];
        let selections = vec![
            RuleSelection {
                rule_id: "uk".into(),
                method: MonetizationMethod::DirectRefund,
            },
            RuleSelection {
                rule_id: "fr".into(),
                method: MonetizationMethod::DirectRefund,
            },
        ];
        let out = calculate_multi(
            dec!(30000000),
            &spends,
            &selections,
            &store,
            &stack_config(&[("UK", "FR")]),
        )
        .unwrap();
        // (2M + 0.6M) / 10M = 0.26
        assert_eq!(out.result.total_net_benefit, dec!(2600000));
        assert_eq!(out.result.blended_effective_rate, dec!(0.26));
    }
}
