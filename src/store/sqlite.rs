//! SQLite ledger store
//!
//! Persists entries in the `ledger_entries` table. Unique constraints on
//! `request_id`, `log_hash` and `sequence_number` reject duplicate writes,
//! and triggers from [`crate::store::policy`] reject updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{LedgerEntry, PiiEntity, PiiRiskLevel};
use crate::store::policy::{immutability_sql, DeletePolicy, Dialect, LEDGER_SCHEMA};
use crate::store::{LedgerStore, ReadRange};

const SELECT_COLUMNS: &str = r#"
    SELECT id, request_id, timestamp, created_at, user_id, user_hash, endpoint, method,
           model, status_code, latency_ms, prompt_tokens, completion_tokens, total_tokens,
           pii_detected, pii_entity_count, pii_risk_level, pii_entities_json,
           request_blocked, rate_limited, auth_method, log_hash, signature, chain_hash,
           sequence_number, archived, archive_hash
    FROM ledger_entries
"#;

#[derive(Debug, Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Open (creating if missing) the database at `database_url` and
    /// install schema and write guards. This is the writer's constructor;
    /// auditors use [`SqliteLedgerStore::open_read_only`].
    pub async fn connect(database_url: &str, delete_policy: DeletePolicy) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations(delete_policy).await?;
        info!("Ledger store ready at {}", database_url);
        Ok(store)
    }

    /// Open an existing ledger database for reading only.
    ///
    /// Never creates the file and never touches schema or triggers, so an
    /// auditor can't alter the guards the writer installed. A missing file is
    /// an error.
    pub async fn open_read_only(database_url: &str) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(false)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        info!("Ledger store opened read-only at {}", database_url);
        Ok(Self { pool })
    }

    /// Private in-memory database; a single connection so every query sees
    /// the same data.
    pub async fn in_memory(delete_policy: DeletePolicy) -> LedgerResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.run_migrations(delete_policy).await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self, delete_policy: DeletePolicy) -> LedgerResult<()> {
        sqlx::raw_sql(LEDGER_SCHEMA).execute(&self.pool).await?;

        for statement in immutability_sql(Dialect::Sqlite, delete_policy) {
            sqlx::raw_sql(&statement).execute(&self.pool).await?;
        }

        debug!("Ledger schema installed (delete policy: {:?})", delete_policy);
        Ok(())
    }

    /// Remove the entry for `request_id`. Fails when the delete guard is
    /// installed; otherwise the removal shows up later as a chain gap.
    pub async fn delete_by_request_id(&self, request_id: &str) -> LedgerResult<bool> {
        let result = sqlx::query("DELETE FROM ledger_entries WHERE request_id = ?")
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn append(&self, entry: &LedgerEntry) -> LedgerResult<()> {
        let entities_json = serde_json::to_string(&entry.pii_entities)?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, request_id, timestamp, created_at, user_id, user_hash, endpoint, method,
                model, status_code, latency_ms, prompt_tokens, completion_tokens, total_tokens,
                pii_detected, pii_entity_count, pii_risk_level, pii_entities_json,
                request_blocked, rate_limited, auth_method, log_hash, signature, chain_hash,
                sequence_number, archived, archive_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.request_id)
        .bind(entry.timestamp)
        .bind(entry.created_at)
        .bind(&entry.user_id)
        .bind(&entry.user_hash)
        .bind(&entry.endpoint)
        .bind(&entry.method)
        .bind(&entry.model)
        .bind(i64::from(entry.status_code))
        .bind(entry.latency_ms)
        .bind(to_i64(entry.prompt_tokens, "prompt_tokens")?)
        .bind(to_i64(entry.completion_tokens, "completion_tokens")?)
        .bind(to_i64(entry.total_tokens, "total_tokens")?)
        .bind(entry.pii_detected)
        .bind(i64::from(entry.pii_entity_count))
        .bind(entry.pii_risk_level.map(|r| r.as_str()))
        .bind(entities_json)
        .bind(entry.request_blocked)
        .bind(entry.rate_limited)
        .bind(&entry.auth_method)
        .bind(&entry.log_hash)
        .bind(&entry.signature)
        .bind(&entry.chain_hash)
        .bind(to_i64(entry.sequence_number, "sequence_number")?)
        .bind(entry.archived)
        .bind(&entry.archive_hash)
        .execute(&self.pool)
        .await?;

        debug!("Stored ledger entry {}", entry.summary());
        Ok(())
    }

    async fn read_range(&self, range: ReadRange) -> LedgerResult<Vec<LedgerEntry>> {
        let sql = format!("{} ORDER BY sequence_number ASC LIMIT ? OFFSET ?", SELECT_COLUMNS);
        let rows: Vec<LedgerRow> = sqlx::query_as(&sql)
            .bind(to_i64(range.limit, "limit")?)
            .bind(to_i64(range.offset, "offset")?)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn recent(&self, limit: u64) -> LedgerResult<Vec<LedgerEntry>> {
        let sql = format!("{} ORDER BY sequence_number DESC LIMIT ?", SELECT_COLUMNS);
        let rows: Vec<LedgerRow> = sqlx::query_as(&sql)
            .bind(to_i64(limit, "limit")?)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn last_entry(&self) -> LedgerResult<Option<LedgerEntry>> {
        let sql = format!("{} ORDER BY sequence_number DESC LIMIT 1", SELECT_COLUMNS);
        let row: Option<LedgerRow> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;
        row.map(LedgerEntry::try_from).transpose()
    }

    async fn find_by_request_id(&self, request_id: &str) -> LedgerResult<Option<LedgerEntry>> {
        let sql = format!("{} WHERE request_id = ?", SELECT_COLUMNS);
        let row: Option<LedgerRow> = sqlx::query_as(&sql)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(LedgerEntry::try_from).transpose()
    }

    async fn count(&self) -> LedgerResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger_entries")
            .fetch_one(&self.pool)
            .await?;
        from_i64(count, "count")
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: String,
    request_id: String,
    timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
    user_id: String,
    user_hash: String,
    endpoint: String,
    method: String,
    model: Option<String>,
    status_code: i64,
    latency_ms: f64,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    pii_detected: bool,
    pii_entity_count: i64,
    pii_risk_level: Option<String>,
    pii_entities_json: String,
    request_blocked: bool,
    rate_limited: bool,
    auth_method: String,
    log_hash: String,
    signature: String,
    chain_hash: Option<String>,
    sequence_number: i64,
    archived: bool,
    archive_hash: Option<String>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let pii_risk_level = row
            .pii_risk_level
            .as_deref()
            .map(PiiRiskLevel::from_str)
            .transpose()
            .map_err(|e| corrupt(&row.id, &e))?;
        let pii_entities: Vec<PiiEntity> = serde_json::from_str(&row.pii_entities_json)?;

        Ok(LedgerEntry {
            status_code: u16::try_from(row.status_code)
                .map_err(|_| corrupt(&row.id, "status_code out of range"))?,
            prompt_tokens: from_i64(row.prompt_tokens, "prompt_tokens")?,
            completion_tokens: from_i64(row.completion_tokens, "completion_tokens")?,
            total_tokens: from_i64(row.total_tokens, "total_tokens")?,
            pii_entity_count: u32::try_from(row.pii_entity_count)
                .map_err(|_| corrupt(&row.id, "pii_entity_count out of range"))?,
            sequence_number: from_i64(row.sequence_number, "sequence_number")?,
            pii_risk_level,
            pii_entities,
            id: row.id,
            request_id: row.request_id,
            timestamp: row.timestamp,
            created_at: row.created_at,
            user_id: row.user_id,
            user_hash: row.user_hash,
            endpoint: row.endpoint,
            method: row.method,
            model: row.model,
            latency_ms: row.latency_ms,
            pii_detected: row.pii_detected,
            request_blocked: row.request_blocked,
            rate_limited: row.rate_limited,
            auth_method: row.auth_method,
            log_hash: row.log_hash,
            signature: row.signature,
            chain_hash: row.chain_hash,
            archived: row.archived,
            archive_hash: row.archive_hash,
        })
    }
}

fn corrupt(id: &str, detail: &str) -> LedgerError {
    LedgerError::Database(format!("Corrupt ledger row {}: {}", id, detail))
}

fn to_i64(value: u64, field: &str) -> LedgerResult<i64> {
    i64::try_from(value)
        .map_err(|_| LedgerError::Database(format!("{} {} exceeds storage range", field, value)))
}

fn from_i64(value: i64, field: &str) -> LedgerResult<u64> {
    u64::try_from(value)
        .map_err(|_| LedgerError::Database(format!("negative {} in storage: {}", field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::{EntryRequest, PiiResult};
    use crate::ledger::service::LedgerService;

    fn service() -> LedgerService {
        LedgerService::new("sqlite-store-secret")
    }

    fn request(id: &str) -> EntryRequest {
        EntryRequest::new(id, "user-1", "/v1/chat/completions", "POST", 200, 42.125)
    }

    #[tokio::test]
    async fn test_round_trip_preserves_seal() {
        let store = SqliteLedgerStore::in_memory(DeletePolicy::Allow).await.unwrap();
        let svc = service();
        let entry = svc.create_entry(
            request("rt-1")
                .with_model("mistral:7b")
                .with_tokens(12, 34)
                .with_pii(PiiResult {
                    pii_detected: true,
                    entity_count: 2,
                    risk_level: Some(PiiRiskLevel::Medium),
                    entities: vec![
                        PiiEntity::new("EMAIL_ADDRESS", Some(PiiRiskLevel::Medium)),
                        PiiEntity::new("PERSON", None),
                    ],
                })
                .rate_limited(true)
                .with_auth_method("legacy_key"),
        );
        store.append(&entry).await.unwrap();

        let loaded = store.find_by_request_id("rt-1").await.unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert!(svc.verify_integrity(&loaded).is_valid);
    }

    #[tokio::test]
    async fn test_update_is_rejected() {
        let store = SqliteLedgerStore::in_memory(DeletePolicy::Allow).await.unwrap();
        let entry = service().create_entry(request("guarded"));
        store.append(&entry).await.unwrap();

        let result = sqlx::query("UPDATE ledger_entries SET status_code = 500 WHERE id = ?")
            .bind(&entry.id)
            .execute(store.pool())
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("immutable"), "unexpected error: {}", err);

        let loaded = store.find_by_request_id("guarded").await.unwrap().unwrap();
        assert_eq!(loaded.status_code, 200);
    }

    #[tokio::test]
    async fn test_duplicate_request_id_is_write_conflict() {
        let store = SqliteLedgerStore::in_memory(DeletePolicy::Allow).await.unwrap();
        let svc = service();
        store.append(&svc.create_entry(request("dup"))).await.unwrap();

        let err = store.append(&svc.create_entry(request("dup"))).await.unwrap_err();
        assert!(err.is_conflict(), "unexpected error: {:?}", err);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_policy() {
        let open = SqliteLedgerStore::in_memory(DeletePolicy::Allow).await.unwrap();
        let blocked = SqliteLedgerStore::in_memory(DeletePolicy::Block).await.unwrap();
        let entry = service().create_entry(request("del"));
        open.append(&entry).await.unwrap();
        blocked.append(&entry).await.unwrap();

        assert!(open.delete_by_request_id("del").await.unwrap());
        assert_eq!(open.count().await.unwrap(), 0);

        assert!(blocked.delete_by_request_id("del").await.is_err());
        assert_eq!(blocked.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ordering_queries() {
        let store = SqliteLedgerStore::in_memory(DeletePolicy::Allow).await.unwrap();
        let svc = service();
        let created: Vec<LedgerEntry> = (0..5).map(|i| svc.create_entry(request(&format!("o-{}", i)))).collect();
        for entry in created.iter().rev() {
            store.append(entry).await.unwrap();
        }

        let page = store.read_range(ReadRange::new(1, 3)).await.unwrap();
        assert_eq!(page.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![2, 3, 4]);

        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![5, 4]);

        let last = store.last_entry().await.unwrap().unwrap();
        assert_eq!(last.log_hash, created[4].log_hash);
        assert!(svc.verify_chain_batch(&store.read_range(ReadRange::first(10)).await.unwrap()).all_valid);
    }

    fn file_url(dir: &tempfile::TempDir, name: &str) -> String {
        format!("sqlite://{}", dir.path().join(name).display())
    }

    #[tokio::test]
    async fn test_allow_connect_keeps_existing_delete_guard() {
        let dir = tempfile::tempdir().unwrap();
        let url = file_url(&dir, "guarded.db");

        let guarded = SqliteLedgerStore::connect(&url, DeletePolicy::Block).await.unwrap();
        guarded.append(&service().create_entry(request("keep"))).await.unwrap();
        assert!(guarded.delete_by_request_id("keep").await.is_err());
        guarded.close().await;

        let reopened = SqliteLedgerStore::connect(&url, DeletePolicy::Allow).await.unwrap();
        assert!(reopened.delete_by_request_id("keep").await.is_err());
        assert_eq!(reopened.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_read_only_never_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.db");
        let url = format!("sqlite://{}", path.display());

        assert!(SqliteLedgerStore::open_read_only(&url).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_read_only_store_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let url = file_url(&dir, "ledger.db");
        let svc = service();

        let writer = SqliteLedgerStore::connect(&url, DeletePolicy::Allow).await.unwrap();
        let entry = svc.create_entry(request("ro-1"));
        writer.append(&entry).await.unwrap();
        writer.close().await;

        let reader = SqliteLedgerStore::open_read_only(&url).await.unwrap();
        assert_eq!(reader.last_entry().await.unwrap(), Some(entry));
        assert!(reader.delete_by_request_id("ro-1").await.is_err());
        assert!(reader.append(&svc.create_entry(request("ro-2"))).await.is_err());
        assert_eq!(reader.count().await.unwrap(), 1);
    }
}
