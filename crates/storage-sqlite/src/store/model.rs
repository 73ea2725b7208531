//! Database row models for the sync control-plane tables.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use ledgerbook_core::errors::Result;
use ledgerbook_core::sync::PendingChange;

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(primary_key(key))]
#[diesel(table_name = crate::schema::sync_metadata)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncMetadataDB {
    pub key: String,
    pub value: String,
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::pending_changes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PendingChangeDB {
    pub id: i64,
    pub collection: String,
    pub op: String,
    pub payload: String,
    pub queued_at: String,
}

/// Insert shape: `id` is assigned by the auto-increment column.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::pending_changes)]
pub struct NewPendingChangeDB {
    pub collection: String,
    pub op: String,
    pub payload: String,
    pub queued_at: String,
}

pub(crate) fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

pub(crate) fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

pub(crate) fn to_pending_change(row: PendingChangeDB) -> Result<PendingChange> {
    Ok(PendingChange {
        id: row.id,
        collection: enum_from_db(&row.collection)?,
        op: enum_from_db(&row.op)?,
        payload: serde_json::from_str(&row.payload)?,
        queued_at: row.queued_at,
    })
}
