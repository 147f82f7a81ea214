pub mod constraints;
pub mod stack;
pub mod templates;

pub use constraints::*;
pub use stack::*;
pub use templates::*;
