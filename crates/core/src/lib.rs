//! Core domain logic for Ledgerbook: synced entity models, the collection
//! sync engine, the automation rule engine, and the collaborator seams
//! (storage, transport, crypto, session state) the runtime crates implement.

pub mod errors;
pub mod models;
pub mod rules;
pub mod secrets;
pub mod sync;

pub use errors::{Error, Result};
