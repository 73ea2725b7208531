//! Synced entity models.
//!
//! Every synced record shares the same base shape: a client-generated,
//! time-ordered UUID `id`, an optional `user_id`, and RFC-3339
//! `created_at`/`updated_at` stamps. Monetary amounts are stored as integer
//! minor units (cents).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new record id: UUID v7, so ids created offline sort
/// chronologically and never collide with server-assigned ids.
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

/// Current timestamp in the wire format used by all synced records.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// A booked transaction on an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: Option<String>,
    pub account_id: String,
    pub category_id: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    /// Signed amount in minor units (cents).
    pub amount: i64,
    /// ISO-8601 calendar date (`YYYY-MM-DD`).
    pub transaction_date: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A user account at a bank. The account name is end-to-end encrypted:
/// `name` holds base64 ciphertext and `name_iv` the base64 nonce. A missing
/// `name_iv` marks a legacy plaintext name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub user_id: Option<String>,
    pub bank_id: Option<String>,
    pub name: String,
    pub name_iv: Option<String>,
    pub currency: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bank {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub user_id: Option<String>,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Point-in-time balance snapshot for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub id: String,
    pub user_id: Option<String>,
    pub account_id: String,
    /// Balance in minor units (cents).
    pub balance: i64,
    /// ISO-8601 calendar date the balance was observed.
    pub as_of: String,
    pub created_at: String,
    pub updated_at: String,
}
