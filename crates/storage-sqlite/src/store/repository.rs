//! The local store: named collections of JSON records plus per-collection
//! watermarks and the pending-change outbox.
//!
//! Collection tables share one layout (indexed id/user_id/timestamps, full
//! record as JSON) and are addressed dynamically by name; the control-plane
//! tables go through the typed diesel schema. All mutations run on the
//! shared write actor, one transaction per call.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::warn;
use tokio::sync::OnceCell;

use ledgerbook_core::errors::{DatabaseError, Error, Result};
use ledgerbook_core::sync::{ChangeOp, Collection, PendingChange, StoredRecord, SyncStore};

use crate::db::{
    create_pool, get_connection, init, run_migrations, spawn_writer, DbPool, WriteHandle,
};
use crate::errors::StorageError;
use crate::schema::{pending_changes, sync_metadata};
use crate::store::model::{
    enum_to_db, to_pending_change, NewPendingChangeDB, PendingChangeDB, SyncMetadataDB,
};

fn escape_sqlite_str(value: &str) -> String {
    value.replace('\'', "''")
}

fn quote_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

fn watermark_key(collection: Collection) -> String {
    format!("last_sync_{}", collection.table_name())
}

fn is_missing_table(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(_, info) if info.message().contains("no such table")
    )
}

#[derive(diesel::QueryableByName)]
struct CollectionRowDB {
    #[diesel(sql_type = diesel::sql_types::Text)]
    payload: String,
}

fn row_to_record(row: CollectionRowDB) -> Result<StoredRecord> {
    let payload = serde_json::from_str(&row.payload)?;
    StoredRecord::from_payload(payload)
}

fn optional_text_literal(value: Option<&str>) -> String {
    match value {
        Some(value) => format!("'{}'", escape_sqlite_str(value)),
        None => "NULL".to_string(),
    }
}

fn upsert_record_tx(
    conn: &mut SqliteConnection,
    collection: Collection,
    record: &StoredRecord,
) -> Result<()> {
    let payload_text = serde_json::to_string(&record.payload)?;
    let user_id = record
        .payload
        .get("userId")
        .and_then(serde_json::Value::as_str);
    let created_at = record
        .payload
        .get("createdAt")
        .and_then(serde_json::Value::as_str);

    let sql = format!(
        "INSERT INTO {table} (id, user_id, payload, created_at, updated_at) \
         VALUES ('{id}', {user_id}, '{payload}', {created_at}, '{updated_at}') \
         ON CONFLICT(id) DO UPDATE SET user_id = excluded.user_id, \
         payload = excluded.payload, created_at = excluded.created_at, \
         updated_at = excluded.updated_at",
        table = quote_identifier(collection.table_name()),
        id = escape_sqlite_str(&record.id),
        user_id = optional_text_literal(user_id),
        payload = escape_sqlite_str(&payload_text),
        created_at = optional_text_literal(created_at),
        updated_at = escape_sqlite_str(&record.updated_at),
    );

    match diesel::sql_query(sql).execute(conn) {
        Ok(_) => Ok(()),
        Err(err) if is_missing_table(&err) => {
            Err(StorageError::SchemaDrift(collection.table_name().to_string()).into())
        }
        Err(err) => Err(StorageError::from(err).into()),
    }
}

fn delete_record_tx(conn: &mut SqliteConnection, collection: Collection, id: &str) -> Result<()> {
    let sql = format!(
        "DELETE FROM {} WHERE id = '{}'",
        quote_identifier(collection.table_name()),
        escape_sqlite_str(id)
    );
    match diesel::sql_query(sql).execute(conn) {
        Ok(_) => Ok(()),
        Err(err) if is_missing_table(&err) => {
            Err(StorageError::SchemaDrift(collection.table_name().to_string()).into())
        }
        Err(err) => Err(StorageError::from(err).into()),
    }
}

fn append_pending_change_tx(
    conn: &mut SqliteConnection,
    collection: Collection,
    op: ChangeOp,
    payload: &serde_json::Value,
) -> Result<()> {
    let row = NewPendingChangeDB {
        collection: enum_to_db(&collection)?,
        op: enum_to_db(&op)?,
        payload: serde_json::to_string(payload)?,
        queued_at: Utc::now().to_rfc3339(),
    };
    diesel::insert_into(pending_changes::table)
        .values(&row)
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

/// Durable local store over one SQLite database.
#[derive(Clone)]
pub struct LocalStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl LocalStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Open (or create) the database under `app_data_dir`, running pending
    /// schema migrations first.
    pub fn open(app_data_dir: &str) -> Result<Self> {
        let db_path = init(app_data_dir)?;
        run_migrations(&db_path)?;
        let pool = create_pool(&db_path)?;
        let writer = spawn_writer(pool.as_ref().clone());
        Ok(Self::new(pool, writer))
    }

    /// Every record in a collection. A missing collection table degrades to
    /// an empty result (schema drift is non-fatal on read).
    pub fn get_all(&self, collection: Collection) -> Result<Vec<StoredRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let sql = format!(
            "SELECT payload FROM {} ORDER BY id",
            quote_identifier(collection.table_name())
        );
        match diesel::sql_query(sql).load::<CollectionRowDB>(&mut conn) {
            Ok(rows) => rows.into_iter().map(row_to_record).collect(),
            Err(err) if is_missing_table(&err) => {
                warn!(
                    "Collection table '{}' is missing; returning no rows",
                    collection.table_name()
                );
                Ok(Vec::new())
            }
            Err(err) => Err(StorageError::from(err).into()),
        }
    }

    pub fn get_by_id(&self, collection: Collection, id: &str) -> Result<Option<StoredRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let sql = format!(
            "SELECT payload FROM {} WHERE id = '{}' LIMIT 1",
            quote_identifier(collection.table_name()),
            escape_sqlite_str(id)
        );
        match diesel::sql_query(sql).load::<CollectionRowDB>(&mut conn) {
            Ok(rows) => rows.into_iter().next().map(row_to_record).transpose(),
            Err(err) if is_missing_table(&err) => {
                warn!(
                    "Collection table '{}' is missing; returning no row",
                    collection.table_name()
                );
                Ok(None)
            }
            Err(err) => Err(StorageError::from(err).into()),
        }
    }

    /// Upsert one record by primary key.
    pub async fn put(&self, collection: Collection, record: StoredRecord) -> Result<()> {
        self.put_many(collection, vec![record]).await
    }

    /// Upsert a batch in one transaction. An empty batch is a no-op success.
    pub async fn put_many(&self, collection: Collection, records: Vec<StoredRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.writer
            .exec(move |conn| {
                for record in &records {
                    upsert_record_tx(conn, collection, record)?;
                }
                Ok(())
            })
            .await
    }

    pub async fn delete(&self, collection: Collection, id: String) -> Result<()> {
        self.writer
            .exec(move |conn| delete_record_tx(conn, collection, &id))
            .await
    }

    pub async fn clear(&self, collection: Collection) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let sql = format!("DELETE FROM {}", quote_identifier(collection.table_name()));
                match diesel::sql_query(sql).execute(conn) {
                    Ok(_) => Ok(()),
                    Err(err) if is_missing_table(&err) => Err(StorageError::SchemaDrift(
                        collection.table_name().to_string(),
                    )
                    .into()),
                    Err(err) => Err(StorageError::from(err).into()),
                }
            })
            .await
    }

    /// Last successful pull timestamp for a collection. `None` means a full
    /// sync has never completed and the next pull is unbounded.
    pub fn get_watermark(&self, collection: Collection) -> Result<Option<String>> {
        let mut conn = get_connection(&self.pool)?;
        let row = sync_metadata::table
            .find(watermark_key(collection))
            .first::<SyncMetadataDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(row.map(|row| row.value))
    }

    pub async fn set_watermark(&self, collection: Collection, value: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                let row = SyncMetadataDB {
                    key: watermark_key(collection),
                    value: value.clone(),
                };
                diesel::insert_into(sync_metadata::table)
                    .values(&row)
                    .on_conflict(sync_metadata::key)
                    .do_update()
                    .set(sync_metadata::value.eq(value))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Pending changes for one collection in insertion (replay) order.
    pub fn list_pending_changes(&self, collection: Collection) -> Result<Vec<PendingChange>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = pending_changes::table
            .filter(pending_changes::collection.eq(enum_to_db(&collection)?))
            .order(pending_changes::id.asc())
            .load::<PendingChangeDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_pending_change).collect()
    }

    /// Remove delivered outbox entries in one batch.
    pub async fn delete_pending_changes(&self, ids: Vec<i64>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.writer
            .exec(move |conn| {
                diesel::delete(pending_changes::table.filter(pending_changes::id.eq_any(ids)))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    /// Queue a local mutation without touching the collection row. The sync
    /// engine normally uses the transactional variants below instead.
    pub async fn append_pending_change(
        &self,
        collection: Collection,
        op: ChangeOp,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| append_pending_change_tx(conn, collection, op, &payload))
            .await
    }

    /// Optimistic local-first write: upsert the row and append the outbox
    /// entry in one transaction, before any network call.
    pub async fn put_with_change(
        &self,
        collection: Collection,
        record: StoredRecord,
        op: ChangeOp,
    ) -> Result<()> {
        self.writer
            .exec(move |conn| {
                upsert_record_tx(conn, collection, &record)?;
                append_pending_change_tx(conn, collection, op, &record.payload)
            })
            .await
    }

    /// Optimistic local-first delete: the row goes away immediately, the
    /// delete is queued for the server.
    pub async fn delete_with_change(&self, collection: Collection, id: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                delete_record_tx(conn, collection, &id)?;
                append_pending_change_tx(
                    conn,
                    collection,
                    ChangeOp::Delete,
                    &serde_json::json!({ "id": id }),
                )
            })
            .await
    }
}

#[async_trait]
impl SyncStore for LocalStore {
    async fn get_all(&self, collection: Collection) -> Result<Vec<StoredRecord>> {
        LocalStore::get_all(self, collection)
    }

    async fn upsert_many(&self, collection: Collection, records: Vec<StoredRecord>) -> Result<()> {
        self.put_many(collection, records).await
    }

    async fn get_watermark(&self, collection: Collection) -> Result<Option<String>> {
        LocalStore::get_watermark(self, collection)
    }

    async fn set_watermark(&self, collection: Collection, value: String) -> Result<()> {
        LocalStore::set_watermark(self, collection, value).await
    }

    async fn list_pending_changes(&self, collection: Collection) -> Result<Vec<PendingChange>> {
        LocalStore::list_pending_changes(self, collection)
    }

    async fn delete_pending_changes(&self, ids: Vec<i64>) -> Result<()> {
        LocalStore::delete_pending_changes(self, ids).await
    }

    async fn put_with_change(
        &self,
        collection: Collection,
        record: StoredRecord,
        op: ChangeOp,
    ) -> Result<()> {
        LocalStore::put_with_change(self, collection, record, op).await
    }

    async fn delete_with_change(&self, collection: Collection, id: String) -> Result<()> {
        LocalStore::delete_with_change(self, collection, id).await
    }
}

/// Memoized shared open: concurrent callers awaiting the store all resolve
/// to the same initialized handle. A failed open is not cached; the next
/// caller retries.
#[derive(Default)]
pub struct StoreCell {
    cell: OnceCell<LocalStore>,
}

impl StoreCell {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub async fn get_or_open(&self, app_data_dir: &str) -> Result<&LocalStore> {
        self.cell
            .get_or_try_init(|| {
                let dir = app_data_dir.to_string();
                async move {
                    tokio::task::spawn_blocking(move || LocalStore::open(&dir))
                        .await
                        .map_err(|err| {
                            Error::Database(DatabaseError::Internal(format!(
                                "Store open worker failed: {err}"
                            )))
                        })?
                }
            })
            .await
    }
}
