use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::GreenlightError;
use crate::types::{Money, Rate};
use crate::GreenlightResult;

// ---------------------------------------------------------------------------
// Payment rules
// ---------------------------------------------------------------------------

/// How much a tier may draw from one quarter's pool. The draw is always
/// further limited by the remaining pool and the tier's remaining target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentRule {
    /// Fixed amount per quarter (scheduled debt service)
    FixedPerQuarter { amount: Money },
    /// Percentage of the pool remaining when the tier is reached
    PercentOfPool { pct: Rate },
    /// Percentage of the quarter's gross revenue, regardless of position
    PercentOfRevenue { pct: Rate },
    /// Corridor split: one percentage of the pool below a cumulative-revenue
    /// threshold, another above it
    CorridorSplit {
        threshold: Money,
        below_pct: Rate,
        above_pct: Rate,
    },
}

impl PaymentRule {
    fn validate(&self) -> GreenlightResult<()> {
        let check_pct = |name: &str, pct: Rate| {
            if pct < Decimal::ZERO || pct > Decimal::ONE {
                Err(GreenlightError::InvalidInput {
                    field: name.into(),
                    reason: format!("Percentage {pct} must be between 0 and 1"),
                })
            } else {
                Ok(())
            }
        };
        match self {
            PaymentRule::FixedPerQuarter { amount } => {
                if *amount < Decimal::ZERO {
                    return Err(GreenlightError::InvalidInput {
                        field: "amount".into(),
                        reason: "Fixed payment cannot be negative".into(),
                    });
                }
                Ok(())
            }
            PaymentRule::PercentOfPool { pct } => check_pct("pct", *pct),
            PaymentRule::PercentOfRevenue { pct } => check_pct("pct", *pct),
            PaymentRule::CorridorSplit {
                threshold,
                below_pct,
                above_pct,
            } => {
                if *threshold < Decimal::ZERO {
                    return Err(GreenlightError::InvalidInput {
                        field: "threshold".into(),
                        reason: "Corridor threshold cannot be negative".into(),
                    });
                }
                check_pct("below_pct", *below_pct)?;
                check_pct("above_pct", *above_pct)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tiers and spec
// ---------------------------------------------------------------------------

/// An ordered claim on incoming revenue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallTier {
    /// Priority rank; strictly ordered, no ties
    pub priority: u32,
    /// Stakeholder receiving this tier's payments
    pub payee: String,
    pub rule: PaymentRule,
    /// Total amount owed to this tier over the life of the waterfall
    pub target: Money,
}

/// A validated, priority-sorted set of waterfall tiers.
///
/// Construction rejects duplicate priority ranks; downstream code may rely
/// on strict ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallSpec {
    tiers: Vec<WaterfallTier>,
}

impl WaterfallSpec {
    pub fn new(mut tiers: Vec<WaterfallTier>) -> GreenlightResult<Self> {
        if tiers.is_empty() {
            return Err(GreenlightError::InsufficientData(
                "A waterfall requires at least one tier".into(),
            ));
        }
        let mut seen: BTreeSet<u32> = BTreeSet::new();
        for tier in &tiers {
            if !seen.insert(tier.priority) {
                return Err(GreenlightError::InvalidInput {
                    field: "priority".into(),
                    reason: format!("Duplicate tier priority {}", tier.priority),
                });
            }
            if tier.target < Decimal::ZERO {
                return Err(GreenlightError::InvalidInput {
                    field: "target".into(),
                    reason: format!(
                        "Tier {} ({}) has a negative recoupment target",
                        tier.priority, tier.payee
                    ),
                });
            }
            tier.rule.validate()?;
        }
        tiers.sort_by_key(|t| t.priority);
        Ok(Self { tiers })
    }

    /// Tiers in ascending priority order.
    pub fn tiers(&self) -> &[WaterfallTier] {
        &self.tiers
    }

    pub fn total_target(&self) -> Money {
        self.tiers.iter().map(|t| t.target).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tier(priority: u32, payee: &str, target: Decimal) -> WaterfallTier {
        WaterfallTier {
            priority,
            payee: payee.into(),
            rule: PaymentRule::PercentOfPool { pct: Decimal::ONE },
            target,
        }
    }

    #[test]
    fn test_duplicate_priority_rejected() {
        let err = WaterfallSpec::new(vec![
            tier(1, "senior", dec!(1000)),
            tier(1, "mezz", dec!(500)),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            GreenlightError::InvalidInput { field, .. } if field == "priority"
        ));
    }

    #[test]
    fn test_tiers_sorted_ascending() {
        let spec = WaterfallSpec::new(vec![
            tier(3, "equity", dec!(100)),
            tier(1, "senior", dec!(100)),
            tier(2, "mezz", dec!(100)),
        ])
        .unwrap();
        let priorities: Vec<u32> = spec.tiers().iter().map(|t| t.priority).collect();
        assert_eq!(priorities, vec![1, 2, 3]);
    }

    #[test]
    fn test_negative_target_rejected() {
        let err = WaterfallSpec::new(vec![tier(1, "senior", dec!(-1))]).unwrap_err();
        assert!(matches!(
            err,
            GreenlightError::InvalidInput { field, .. } if field == "target"
        ));
    }

    #[test]
    fn test_percentage_bounds_checked() {
        let bad = WaterfallTier {
            priority: 1,
            payee: "senior".into(),
            rule: PaymentRule::PercentOfPool { pct: dec!(1.5) },
            target: dec!(100),
        };
        assert!(WaterfallSpec::new(vec![bad]).is_err());
    }

    #[test]
    fn test_empty_spec_rejected() {
        assert!(WaterfallSpec::new(vec![]).is_err());
    }

    #[test]
    fn test_total_target() {
        let spec = WaterfallSpec::new(vec![
            tier(1, "senior", dec!(1000)),
            tier(2, "mezz", dec!(500)),
        ])
        .unwrap();
        assert_eq!(spec.total_target(), dec!(1500));
    }
}
