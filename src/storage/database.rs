//! Relational storage backend (sqlx, SQLite driver)
//!
//! ## Features
//!
//! - **Idempotent bootstrap**: the `metrics` table is created on connect
//! - **Atomic upsert**: counters are summed inside the database
//! - **Transactional batches**: `mass_save` commits all records or none
//! - **Retry**: connection-level failures are retried, query errors are not
//! - **Deadline**: every operation is time-boxed
//!
//! ## Limitations
//!
//! - **Concurrency**: writes serialize on the database lock; the busy
//!   timeout absorbs short contention

use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, error, info, instrument, warn};

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use super::schema::{
    CREATE_METRICS_TABLE, MetricRow, SELECT_ALL_METRICS, SELECT_METRIC, UPSERT_METRIC,
};
use crate::metric::{self, MetricKind, MetricRecord};
use crate::retry::{DEFAULT_ATTEMPTS, Retry, linear_backoff};

/// Upper bound for one storage call, retries included
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Database storage backend
///
/// Holds a connection pool; the database's own locking protects rows, so
/// no in-process lock is taken.
#[derive(Debug)]
pub struct DatabaseBackend {
    pool: SqlitePool,
    backoff: fn(u32) -> Duration,
}

impl DatabaseBackend {
    /// Connect to the database and create the `metrics` table if absent
    ///
    /// ## Arguments
    ///
    /// * `dsn` - SQLite connection string (e.g., "sqlite://./metrics.db")
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use metrics_relay::storage::database::DatabaseBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = DatabaseBackend::connect("sqlite://./metrics.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        Self::connect_with_backoff(dsn, linear_backoff).await
    }

    /// Same as [`connect`](Self::connect) with a custom retry backoff
    #[instrument(skip_all)]
    pub async fn connect_with_backoff(
        dsn: &str,
        backoff: fn(u32) -> Duration,
    ) -> StorageResult<Self> {
        info!("initializing database backend");

        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal) // WAL mode for better concurrency
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10)); // wait on lock contention

        // Connections are opened on first use, so bootstrap goes through retry
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy_with(options);

        let backend = Self { pool, backoff };
        backend.bootstrap().await?;

        info!("database backend ready");
        Ok(backend)
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn bootstrap(&self) -> StorageResult<()> {
        debug!("creating metrics table if missing");
        self.run("bootstrap", || self.create_table()).await
    }

    /// Run one operation under retry and the operation deadline
    async fn run<T, F, Fut>(&self, operation: &'static str, action: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let retry = Retry::new(action, StorageError::is_connection_error, DEFAULT_ATTEMPTS)
            .with_backoff(self.backoff);

        match tokio::time::timeout(OPERATION_TIMEOUT, retry.run()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                let err = StorageError::from(e);
                if !err.is_not_found() {
                    error!("database {operation} failed: {err}");
                }
                Err(err)
            }
            Err(_) => {
                error!("database {operation} timed out after {OPERATION_TIMEOUT:?}");
                Err(StorageError::Timeout(OPERATION_TIMEOUT))
            }
        }
    }

    async fn create_table(&self) -> StorageResult<()> {
        sqlx::query(CREATE_METRICS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert<'e, E>(executor: E, row: &MetricRow) -> StorageResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(UPSERT_METRIC)
            .bind(&row.metric_type)
            .bind(&row.name)
            .bind(row.value)
            .bind(row.delta)
            .execute(executor)
            .await?;
        Ok(())
    }

    async fn save_once(&self, row: &MetricRow) -> StorageResult<()> {
        Self::upsert(&self.pool, row).await
    }

    async fn mass_save_once(&self, records: &[MetricRecord]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        match Self::apply_batch(&mut tx, records).await {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("batch rollback failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }

    async fn apply_batch(conn: &mut SqliteConnection, records: &[MetricRecord]) -> StorageResult<()> {
        for record in records {
            record.validate()?;
            Self::upsert(&mut *conn, &MetricRow::from(record)).await?;
        }
        Ok(())
    }

    async fn fetch_one(&self, id: &str, kind: MetricKind) -> StorageResult<Option<MetricRow>> {
        let row = sqlx::query_as::<_, MetricRow>(SELECT_METRIC)
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn fetch_all(&self) -> StorageResult<Vec<MetricRow>> {
        let rows = sqlx::query_as::<_, MetricRow>(SELECT_ALL_METRICS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn ping_once(&self) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for DatabaseBackend {
    #[instrument(skip(self, record), fields(id = %record.id, kind = %record.kind))]
    async fn save(&self, record: MetricRecord) -> StorageResult<()> {
        record.validate()?;
        let row = MetricRow::from(&record);
        self.run("save", || self.save_once(&row)).await
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn mass_save(&self, records: Vec<MetricRecord>) -> StorageResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        debug!("upserting {} metrics in one transaction", records.len());
        self.run("mass_save", || self.mass_save_once(&records)).await
    }

    async fn find(&self, id: &str, kind: MetricKind) -> StorageResult<MetricRecord> {
        self.run("find", || self.fetch_one(id, kind))
            .await?
            .ok_or_else(|| StorageError::not_found(id, kind))?
            .into_record()
    }

    async fn get(&self) -> StorageResult<BTreeMap<String, String>> {
        let rows = self.run("get", || self.fetch_all()).await?;

        let mut all = BTreeMap::new();
        for row in rows {
            let formatted = match row.metric_type.parse::<MetricKind>() {
                Ok(MetricKind::Counter) => row.delta.map(metric::format_counter),
                Ok(MetricKind::Gauge) => row.value.map(metric::format_gauge),
                Err(e) => {
                    warn!("skipping row {}: {e}", row.name);
                    None
                }
            };

            if let Some(formatted) = formatted {
                all.insert(row.name, formatted);
            }
        }

        Ok(all)
    }

    async fn ping(&self) -> StorageResult<()> {
        self.run("ping", || self.ping_once()).await
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing database connection pool");
        self.pool.close().await;
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "database"
    }
}
