//! SQLite-backed local store for Ledgerbook: named collections of JSON
//! records, a versioned schema, and the sync control-plane tables
//! (per-collection watermarks and the pending-change outbox).

pub mod db;
pub mod errors;
pub mod schema;
pub mod store;

pub use store::{LocalStore, StoreCell};
