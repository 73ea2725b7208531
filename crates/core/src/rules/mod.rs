//! Automation rules: transaction classification against prioritized
//! boolean-logic condition trees.

mod engine;
mod model;

pub use engine::*;
pub use model::*;
