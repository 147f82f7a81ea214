pub mod comparator;
pub mod evaluator;
pub mod pareto;

pub use comparator::*;
pub use evaluator::*;
pub use pareto::*;
