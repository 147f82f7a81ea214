pub mod rules;
pub mod stacking;

pub use rules::*;
pub use stacking::*;
