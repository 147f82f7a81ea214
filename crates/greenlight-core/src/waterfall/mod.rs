pub mod engine;
pub mod returns;
pub mod tiers;

pub use engine::*;
pub use returns::*;
pub use tiers::*;
