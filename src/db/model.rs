//! Ledger entities and view models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::model::{EntityKind, SyncStatus};

/// One row of the integration ledger, keyed by `(kind, entity_id)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub kind: EntityKind,
    pub entity_id: i64,
    pub external_id: Option<String>,
    pub status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_payload_sent: Option<Value>,
    pub last_response: Option<Value>,
    /// Only meaningful while `status` is not `SyncSucceeded`.
    pub last_error_message: Option<String>,
    pub attempt_count: i64,
}

/// Fields merged into a ledger row by one sync attempt.
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    pub status: SyncStatus,
    pub synced_at: DateTime<Utc>,
    pub external_id: Option<String>,
    pub payload: Option<Value>,
    pub response: Option<Value>,
    pub error_message: Option<String>,
}

impl LedgerUpdate {
    pub fn succeeded(
        synced_at: DateTime<Utc>,
        external_id: Option<String>,
        payload: Value,
        response: Value,
    ) -> Self {
        Self {
            status: SyncStatus::SyncSucceeded,
            synced_at,
            external_id,
            payload: Some(payload),
            response: Some(response),
            error_message: None,
        }
    }

    pub fn failed(synced_at: DateTime<Utc>, error_message: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::SyncFailed,
            synced_at,
            external_id: None,
            payload: None,
            response: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// Filter for the ledger listing used by admin views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFilter {
    pub kind: Option<EntityKind>,
    pub status: Option<SyncStatus>,
}
