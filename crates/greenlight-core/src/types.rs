use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// All monetary values. Wraps Decimal to prevent accidental f64 usage.
pub type Money = Decimal;

/// Rates expressed as decimals (0.05 = 5%). Never as percentages.
pub type Rate = Decimal;

/// Multiples (e.g., 1.8x cash-on-cash)
pub type Multiple = Decimal;

/// Quarter index within an analysis horizon (0 = first quarter of release).
pub type Quarter = u32;

/// Quarters per year, used for calendar-fractional discounting.
pub const PERIODS_PER_YEAR: u32 = 4;

/// Category tag for a cash-flow event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashFlowCategory {
    /// Production spend (outflow)
    Spend,
    /// Government incentive cash receipt
    IncentiveReceipt,
    /// Revenue inflow from exploitation
    Revenue,
    /// Waterfall payment to a stakeholder
    Payment,
}

/// A single signed cash flow at a quarter index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlowEvent {
    pub quarter: Quarter,
    pub amount: Money,
    pub category: CashFlowCategory,
}

impl CashFlowEvent {
    pub fn new(quarter: Quarter, amount: Money, category: CashFlowCategory) -> Self {
        Self {
            quarter,
            amount,
            category,
        }
    }
}

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "decimal128".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cash_flow_event_roundtrip() {
        let ev = CashFlowEvent::new(3, dec!(-1500000), CashFlowCategory::Spend);
        let json = serde_json::to_string(&ev).unwrap();
        let back: CashFlowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.quarter, 3);
        assert_eq!(back.amount, dec!(-1500000));
        assert_eq!(back.category, CashFlowCategory::Spend);
    }

    #[test]
    fn test_with_metadata_envelope() {
        let out = with_metadata(
            "Test",
            &serde_json::json!({"k": 1}),
            vec!["w".into()],
            42,
            dec!(1),
        );
        assert_eq!(out.methodology, "Test");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.metadata.computation_time_us, 42);
        assert_eq!(out.metadata.precision, "decimal128");
    }
}
