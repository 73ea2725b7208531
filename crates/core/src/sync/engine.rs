//! Per-collection sync engine: last-writer-wins pull, ordered outbox push,
//! optimistic local-first mutations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};

use crate::errors::{Error, Result};
use crate::models::new_record_id;
use crate::sync::{
    should_apply_remote, ChangeOp, Collection, PendingChange, StoredRecord, SyncSummary,
};

/// Transport failure, carrying the HTTP status when one was received.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Storage operations the sync engine needs from the local store.
///
/// Mutating calls that pair a row write with an outbox append must perform
/// both in one storage transaction.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn get_all(&self, collection: Collection) -> Result<Vec<StoredRecord>>;
    async fn upsert_many(&self, collection: Collection, records: Vec<StoredRecord>) -> Result<()>;

    async fn get_watermark(&self, collection: Collection) -> Result<Option<String>>;
    async fn set_watermark(&self, collection: Collection, value: String) -> Result<()>;

    async fn list_pending_changes(&self, collection: Collection) -> Result<Vec<PendingChange>>;
    async fn delete_pending_changes(&self, ids: Vec<i64>) -> Result<()>;

    async fn put_with_change(
        &self,
        collection: Collection,
        record: StoredRecord,
        op: ChangeOp,
    ) -> Result<()>;
    async fn delete_with_change(&self, collection: Collection, id: String) -> Result<()>;
}

/// Remote collection endpoint operations (see the sync-client crate for the
/// REST implementation).
#[async_trait]
pub trait CollectionTransport: Send + Sync {
    async fn pull_since(
        &self,
        collection: Collection,
        since: Option<&str>,
    ) -> std::result::Result<Vec<serde_json::Value>, TransportError>;

    async fn create(
        &self,
        collection: Collection,
        record: &serde_json::Value,
    ) -> std::result::Result<(), TransportError>;

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        record: &serde_json::Value,
    ) -> std::result::Result<(), TransportError>;

    async fn delete(
        &self,
        collection: Collection,
        id: &str,
    ) -> std::result::Result<(), TransportError>;
}

/// Pure record-shape hooks applied at the wire boundary, for servers whose
/// field naming differs from the local payload shape. Both default to the
/// identity function.
#[derive(Clone)]
pub struct TransformHooks {
    pub from_remote: Arc<dyn Fn(serde_json::Value) -> serde_json::Value + Send + Sync>,
    pub to_remote: Arc<dyn Fn(serde_json::Value) -> serde_json::Value + Send + Sync>,
}

impl Default for TransformHooks {
    fn default() -> Self {
        Self {
            from_remote: Arc::new(|value| value),
            to_remote: Arc::new(|value| value),
        }
    }
}

impl std::fmt::Debug for TransformHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransformHooks")
    }
}

/// Two-directional reconciliation engine for one collection.
///
/// `sync()` pulls server records updated since the watermark (merging with
/// last-writer-wins), replays the pending-change outbox in insertion order,
/// and advances the watermark only when the pull completed cleanly. Local
/// mutations are optimistic: written to the store and queued in the outbox
/// before any network call.
pub struct CollectionSyncManager<S, T> {
    collection: Collection,
    store: Arc<S>,
    transport: Arc<T>,
    hooks: TransformHooks,
    in_flight: AtomicBool,
}

impl<S, T> CollectionSyncManager<S, T>
where
    S: SyncStore,
    T: CollectionTransport,
{
    pub fn new(collection: Collection, store: Arc<S>, transport: Arc<T>) -> Self {
        Self::with_hooks(collection, store, transport, TransformHooks::default())
    }

    pub fn with_hooks(
        collection: Collection,
        store: Arc<S>,
        transport: Arc<T>,
        hooks: TransformHooks,
    ) -> Self {
        Self {
            collection,
            store,
            transport,
            hooks,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Run one sync cycle. A call made while another cycle for this
    /// collection is in flight returns immediately with `success = false`;
    /// it does not queue or block.
    pub async fn sync(&self) -> SyncSummary {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SyncSummary {
                success: false,
                errors: vec![format!(
                    "Sync already running for collection '{}'",
                    self.collection
                )],
                ..SyncSummary::default()
            };
        }

        let summary = self.run_cycle().await;
        self.in_flight.store(false, Ordering::SeqCst);
        summary
    }

    async fn run_cycle(&self) -> SyncSummary {
        let mut summary = SyncSummary::default();

        let pull_ok = match self.pull(&mut summary).await {
            Ok(()) => true,
            Err(err) => {
                summary
                    .errors
                    .push(format!("Pull failed for '{}': {}", self.collection, err));
                false
            }
        };

        self.push(&mut summary).await;

        // Watermark advances only after a clean pull, so a failed window is
        // re-pulled on the next attempt. Already-applied upserts stay.
        if pull_ok {
            if let Err(err) = self
                .store
                .set_watermark(self.collection, Utc::now().to_rfc3339())
                .await
            {
                summary.errors.push(format!(
                    "Watermark update failed for '{}': {}",
                    self.collection, err
                ));
            }
        }

        summary.success = summary.errors.is_empty();
        debug!(
            "Sync cycle for '{}': inserted={} updated={} deleted={} errors={}",
            self.collection,
            summary.inserted,
            summary.updated,
            summary.deleted,
            summary.errors.len()
        );
        summary
    }

    async fn pull(&self, summary: &mut SyncSummary) -> Result<()> {
        let watermark = self.store.get_watermark(self.collection).await?;
        let remote_records = self
            .transport
            .pull_since(self.collection, watermark.as_deref())
            .await
            .map_err(|err| Error::sync(err.to_string()))?;

        let local_records = self.store.get_all(self.collection).await?;
        let local_by_id: HashMap<&str, &StoredRecord> = local_records
            .iter()
            .map(|record| (record.id.as_str(), record))
            .collect();

        let mut staged = Vec::new();
        for value in remote_records {
            let value = (self.hooks.from_remote)(value);
            let record = StoredRecord::from_payload(value)
                .map_err(|err| Error::sync(format!("Malformed server record: {err}")))?;

            match local_by_id.get(record.id.as_str()) {
                None => {
                    staged.push(record);
                    summary.inserted += 1;
                }
                Some(existing) => {
                    if should_apply_remote(&existing.updated_at, &record.updated_at) {
                        staged.push(record);
                        summary.updated += 1;
                    }
                }
            }
        }

        self.store.upsert_many(self.collection, staged).await?;
        Ok(())
    }

    /// Replay the outbox against the remote endpoint. Each change is
    /// attempted independently; failures accumulate and delivered entries
    /// are removed in one batch afterwards.
    async fn push(&self, summary: &mut SyncSummary) {
        let pending = match self.store.list_pending_changes(self.collection).await {
            Ok(pending) => pending,
            Err(err) => {
                summary
                    .errors
                    .push(format!("Outbox read failed for '{}': {}", self.collection, err));
                return;
            }
        };

        let mut delivered = Vec::new();
        for change in &pending {
            match self.replay(change).await {
                Ok(()) => {
                    if change.op == ChangeOp::Delete {
                        summary.deleted += 1;
                    }
                    delivered.push(change.id);
                }
                Err(err) => {
                    summary.errors.push(format!(
                        "Push of queued {:?} #{} for '{}' failed: {}",
                        change.op, change.id, self.collection, err
                    ));
                }
            }
        }

        if !delivered.is_empty() {
            if let Err(err) = self.store.delete_pending_changes(delivered).await {
                summary.errors.push(format!(
                    "Outbox cleanup failed for '{}': {}",
                    self.collection, err
                ));
            }
        }
    }

    async fn replay(&self, change: &PendingChange) -> Result<()> {
        let payload = (self.hooks.to_remote)(change.payload.clone());
        match change.op {
            ChangeOp::Create => self
                .transport
                .create(self.collection, &payload)
                .await
                .map_err(|err| Error::sync(err.to_string())),
            ChangeOp::Update => {
                let id = Self::payload_id(&payload)?;
                match self.transport.update(self.collection, &id, &payload).await {
                    Ok(()) => Ok(()),
                    // The server never saw this record (a create was lost);
                    // fall back to POST, which upserts on the client id.
                    Err(err) if err.is_not_found() => {
                        warn!(
                            "Update of '{}/{}' hit 404; re-creating the record",
                            self.collection, id
                        );
                        self.transport
                            .create(self.collection, &payload)
                            .await
                            .map_err(|err| Error::sync(err.to_string()))
                    }
                    Err(err) => Err(Error::sync(err.to_string())),
                }
            }
            ChangeOp::Delete => {
                let id = Self::payload_id(&payload)?;
                match self.transport.delete(self.collection, &id).await {
                    Ok(()) => Ok(()),
                    // Already gone is the desired end state.
                    Err(err) if err.is_not_found() => Ok(()),
                    Err(err) => Err(Error::sync(err.to_string())),
                }
            }
        }
    }

    fn payload_id(payload: &serde_json::Value) -> Result<String> {
        payload
            .get("id")
            .and_then(serde_json::Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::validation("Queued change payload has no 'id' field"))
    }

    /// Create a record locally and queue it for push. Assigns a time-ordered
    /// UUID when the payload has none, stamps `createdAt`/`updatedAt`, and
    /// writes row + outbox entry in one storage transaction.
    pub async fn create_local(&self, mut payload: serde_json::Value) -> Result<StoredRecord> {
        let now = Utc::now().to_rfc3339();
        let object = payload
            .as_object_mut()
            .ok_or_else(|| Error::validation("Record payload must be a JSON object"))?;

        let has_id = object
            .get("id")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|value| !value.is_empty());
        if !has_id {
            object.insert("id".to_string(), serde_json::Value::String(new_record_id()));
        }
        object.insert(
            "createdAt".to_string(),
            serde_json::Value::String(now.clone()),
        );
        object.insert("updatedAt".to_string(), serde_json::Value::String(now));

        let record = StoredRecord::from_payload(payload)?;
        self.store
            .put_with_change(self.collection, record.clone(), ChangeOp::Create)
            .await?;
        Ok(record)
    }

    /// Update a record locally and queue the new state for push. The payload
    /// must carry the record id; `updatedAt` is re-stamped.
    pub async fn update_local(&self, mut payload: serde_json::Value) -> Result<StoredRecord> {
        let now = Utc::now().to_rfc3339();
        let object = payload
            .as_object_mut()
            .ok_or_else(|| Error::validation("Record payload must be a JSON object"))?;
        object.insert("updatedAt".to_string(), serde_json::Value::String(now));

        let record = StoredRecord::from_payload(payload)?;
        self.store
            .put_with_change(self.collection, record.clone(), ChangeOp::Update)
            .await?;
        Ok(record)
    }

    /// Remove a record locally (immediately) and queue the delete for push.
    pub async fn delete_local(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::validation("Record id must not be empty"));
        }
        self.store
            .delete_with_change(self.collection, id.to_string())
            .await
    }
}

/// Convenience wrapper running one manager per synced collection.
///
/// Collections sync independently; this drives them one after another and
/// reports a per-collection summary map. There is no cross-collection
/// ordering guarantee.
pub struct SyncService<S, T> {
    managers: Vec<CollectionSyncManager<S, T>>,
}

impl<S, T> SyncService<S, T>
where
    S: SyncStore,
    T: CollectionTransport,
{
    pub fn new(store: Arc<S>, transport: Arc<T>) -> Self {
        let managers = Collection::ALL
            .iter()
            .map(|collection| {
                CollectionSyncManager::new(*collection, Arc::clone(&store), Arc::clone(&transport))
            })
            .collect();
        Self { managers }
    }

    pub fn manager(&self, collection: Collection) -> &CollectionSyncManager<S, T> {
        self.managers
            .iter()
            .find(|manager| manager.collection() == collection)
            .expect("one manager per collection")
    }

    pub async fn sync_all(&self) -> HashMap<Collection, SyncSummary> {
        let mut summaries = HashMap::new();
        for manager in &self.managers {
            summaries.insert(manager.collection(), manager.sync().await);
        }
        summaries
    }
}
