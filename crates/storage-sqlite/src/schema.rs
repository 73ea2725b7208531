//! Diesel schema for the sync control-plane tables.
//!
//! Collection tables (`transactions`, `accounts`, ...) are created by the
//! embedded migrations and accessed dynamically by name; see the store
//! repository.

diesel::table! {
    sync_metadata (key) {
        key -> Text,
        value -> Text,
    }
}

diesel::table! {
    pending_changes (id) {
        id -> BigInt,
        collection -> Text,
        op -> Text,
        payload -> Text,
        queued_at -> Text,
    }
}
