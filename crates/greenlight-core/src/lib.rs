pub mod cancel;
pub mod capital;
pub mod error;
pub mod incentives;
pub mod revenue;
pub mod types;
pub mod waterfall;

#[cfg(feature = "simulation")]
pub mod risk;

#[cfg(feature = "optimization")]
pub mod evaluate;

#[cfg(feature = "optimization")]
pub mod optimize;

pub use error::GreenlightError;
pub use types::*;

/// Standard result type for all greenlight operations
pub type GreenlightResult<T> = Result<T, GreenlightError>;
