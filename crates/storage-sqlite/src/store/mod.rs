//! The local store: generic collection access plus the sync control plane.

mod model;
mod repository;

pub use model::*;
pub use repository::*;
