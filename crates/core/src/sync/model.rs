//! Sync domain models: collections, pending changes, last-writer-wins.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Locally mirrored collections that participate in sync. Each collection
/// syncs independently: its own watermark, its own slice of the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Transactions,
    Accounts,
    Categories,
    Banks,
    AutomationRules,
    Labels,
    AccountBalances,
}

impl Collection {
    /// Canonical list of synced collections.
    pub const ALL: [Collection; 7] = [
        Collection::Transactions,
        Collection::Accounts,
        Collection::Categories,
        Collection::Banks,
        Collection::AutomationRules,
        Collection::Labels,
        Collection::AccountBalances,
    ];

    /// Local table backing this collection. Also its remote endpoint path
    /// segment: the server exposes one REST resource per collection under
    /// the same name.
    pub fn table_name(&self) -> &'static str {
        match self {
            Collection::Transactions => "transactions",
            Collection::Accounts => "accounts",
            Collection::Categories => "categories",
            Collection::Banks => "banks",
            Collection::AutomationRules => "automation_rules",
            Collection::Labels => "labels",
            Collection::AccountBalances => "account_balances",
        }
    }

    pub fn from_table_name(name: &str) -> Option<Collection> {
        Collection::ALL
            .iter()
            .copied()
            .find(|collection| collection.table_name() == name)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Local mutation kinds recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

/// One queued local mutation awaiting server confirmation. Ordering is by
/// `id` (storage auto-increment), which is also the replay order within a
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub id: i64,
    pub collection: Collection,
    pub op: ChangeOp,
    /// Snapshot of the record at mutation time. For deletes this is just
    /// `{"id": ...}`.
    pub payload: serde_json::Value,
    pub queued_at: String,
}

/// A collection row as held by the local store: indexed columns plus the
/// full record as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: String,
    pub updated_at: String,
    pub payload: serde_json::Value,
}

impl StoredRecord {
    /// Build from a full record payload, reading the `id` and `updatedAt`
    /// fields. A record without an id is rejected; a missing `updatedAt`
    /// degrades to the empty string, which loses every LWW comparison.
    pub fn from_payload(payload: serde_json::Value) -> Result<StoredRecord> {
        let id = payload
            .get("id")
            .and_then(serde_json::Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| Error::validation("Record payload has no 'id' field"))?
            .to_string();
        let updated_at = payload
            .get("updatedAt")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(StoredRecord {
            id,
            updated_at,
            payload,
        })
    }
}

/// Outcome of one `sync()` call for a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub success: bool,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

/// Determines whether a pulled remote record should overwrite local state.
///
/// Rule: strictly newer remote `updated_at` wins; ties keep the local row.
pub fn should_apply_remote(local_updated_at: &str, remote_updated_at: &str) -> bool {
    let local_parsed =
        chrono::DateTime::parse_from_rfc3339(local_updated_at).map(|dt| dt.timestamp_millis());
    let remote_parsed =
        chrono::DateTime::parse_from_rfc3339(remote_updated_at).map(|dt| dt.timestamp_millis());

    if let (Ok(local_ts), Ok(remote_ts)) = (local_parsed, remote_parsed) {
        return remote_ts > local_ts;
    }

    // Fallback to lexical ordering when one/both timestamps are non-RFC3339.
    remote_updated_at > local_updated_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lww_newer_remote_wins() {
        assert!(should_apply_remote(
            "2026-01-01T00:00:00.000Z",
            "2026-01-01T00:00:01.000Z"
        ));
    }

    #[test]
    fn lww_tie_favors_local() {
        assert!(!should_apply_remote(
            "2026-01-01T00:00:00.000Z",
            "2026-01-01T00:00:00.000Z"
        ));
    }

    #[test]
    fn lww_older_remote_is_ignored() {
        assert!(!should_apply_remote(
            "2026-01-01T00:00:01.000Z",
            "2026-01-01T00:00:00.000Z"
        ));
    }

    #[test]
    fn lww_uses_timestamp_value_not_lexical_format() {
        // +01:00 local time equals the Z time here; the remote is not newer.
        assert!(!should_apply_remote(
            "2026-01-01T01:00:00+01:00",
            "2026-01-01T00:00:00Z"
        ));
    }

    #[test]
    fn collection_serialization_matches_wire_contract() {
        let actual = Collection::ALL
            .iter()
            .map(|collection| serde_json::to_string(collection).expect("serialize collection"))
            .collect::<Vec<_>>();

        let expected = vec![
            "\"transactions\"",
            "\"accounts\"",
            "\"categories\"",
            "\"banks\"",
            "\"automation_rules\"",
            "\"labels\"",
            "\"account_balances\"",
        ];

        assert_eq!(actual, expected);
    }

    #[test]
    fn collection_round_trips_through_table_name() {
        for collection in Collection::ALL {
            assert_eq!(
                Collection::from_table_name(collection.table_name()),
                Some(collection)
            );
        }
        assert_eq!(Collection::from_table_name("holdings"), None);
    }

    #[test]
    fn stored_record_requires_an_id() {
        let err = StoredRecord::from_payload(serde_json::json!({ "updatedAt": "2026-01-01" }));
        assert!(err.is_err());

        let record = StoredRecord::from_payload(serde_json::json!({ "id": "r-1" }))
            .expect("record without updatedAt");
        assert_eq!(record.updated_at, "");
    }
}
