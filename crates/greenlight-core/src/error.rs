use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GreenlightError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Subsidy rule not found: {0}")]
    RuleNotFound(String),

    #[error("Rule {rule_id} does not support monetization method {method}")]
    UnsupportedMonetization { rule_id: String, method: String },

    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Convergence failure: {function} did not converge after {iterations} iterations (delta: {last_delta})")]
    ConvergenceFailure {
        function: String,
        iterations: u32,
        last_delta: Decimal,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for GreenlightError {
    fn from(e: serde_json::Error) -> Self {
        GreenlightError::SerializationError(e.to_string())
    }
}
