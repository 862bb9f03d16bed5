//! Connection pool registry.
//!
//! Owns one bounded pool per configured data source. Pools are built lazily on
//! first use from the stored descriptor, with the credential decrypted just in
//! time. Concurrent first lookups for the same id share a single build.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::types::BigDecimal;
use sqlx::{Column, MySqlPool, PgPool, Row, SqlitePool};
use tokio::sync::{Mutex, OnceCell};
use utoipa::ToSchema;
use zeroize::Zeroizing;

use common::config::PoolSettings;
use common::errors::{AppError, AppResult};
use common::models::{DataSourceId, Dialect, ResultRow};
use common::store::ConfigStore;

use crate::crypto::CredentialCipher;

/// Driver-specific pool.
pub enum DatabasePool {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DatabasePool {
    pub fn dialect(&self) -> Dialect {
        match self {
            DatabasePool::MySql(_) => Dialect::MySql,
            DatabasePool::Postgres(_) => Dialect::PostgreSql,
            DatabasePool::Sqlite(_) => Dialect::Embedded,
        }
    }

    async fn close(&self) {
        match self {
            DatabasePool::MySql(p) => p.close().await,
            DatabasePool::Postgres(p) => p.close().await,
            DatabasePool::Sqlite(p) => p.close().await,
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            DatabasePool::MySql(p) => p.is_closed(),
            DatabasePool::Postgres(p) => p.is_closed(),
            DatabasePool::Sqlite(p) => p.is_closed(),
        }
    }
}

/// Shared reference to a pool handed out by the registry.
///
/// Cloning is cheap. A pool evicted while a handle is alive stays usable until
/// the last handle is dropped.
#[derive(Clone)]
pub struct PoolHandle(Arc<DatabasePool>);

impl PoolHandle {
    fn new(pool: DatabasePool) -> Self {
        Self(Arc::new(pool))
    }

    pub fn dialect(&self) -> Dialect {
        self.0.dialect()
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.0
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// True when both handles refer to the same pool instance.
    pub fn ptr_eq(a: &PoolHandle, b: &PoolHandle) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PoolHandle").field(&self.dialect()).finish()
    }
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
pub struct PoolStats {
    /// Pools currently cached.
    pub cached: usize,
    /// Tracked ids, including builds still in progress.
    pub slots: usize,
    /// Cached pools built since startup.
    pub built: u64,
}

type Slot = Arc<OnceCell<PoolHandle>>;

/// Manages target-database pools, keyed by data-source id.
pub struct PoolManager {
    store: Arc<dyn ConfigStore>,
    cipher: CredentialCipher,
    settings: PoolSettings,
    /// One slot per id. The map lock only guards slot creation; the build
    /// itself runs inside the slot's `OnceCell`.
    slots: Mutex<HashMap<DataSourceId, Slot>>,
    built: AtomicU64,
}

impl PoolManager {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        cipher: CredentialCipher,
        settings: PoolSettings,
    ) -> Self {
        Self {
            store,
            cipher,
            settings,
            slots: Mutex::new(HashMap::new()),
            built: AtomicU64::new(0),
        }
    }

    /// Returns the cached pool for `id`, building it on first use.
    ///
    /// A failed build is not cached; the next call tries again.
    pub async fn get_pool(&self, id: DataSourceId) -> AppResult<PoolHandle> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(id).or_default().clone()
        };

        match slot.get_or_try_init(|| self.build_cached(id)).await {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                self.forget_empty_slot(id, &slot).await;
                Err(e)
            }
        }
    }

    /// Drops a slot left empty by a failed build, unless another caller has
    /// since filled or replaced it.
    async fn forget_empty_slot(&self, id: DataSourceId, slot: &Slot) {
        let mut slots = self.slots.lock().await;
        if slots
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized())
        {
            slots.remove(&id);
        }
    }

    async fn build_cached(&self, id: DataSourceId) -> AppResult<PoolHandle> {
        let descriptor = self.store.get_descriptor(id).await?;
        let password = if descriptor.encrypted_password.is_empty() {
            Zeroizing::new(String::new())
        } else {
            self.cipher.decrypt(&descriptor.encrypted_password)?
        };

        let started = Instant::now();
        let handle = self
            .connect(
                descriptor.dialect,
                &descriptor.url,
                &descriptor.username,
                &password,
            )
            .await?;

        self.built.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            connection_id = id,
            name = %descriptor.name,
            dialect = %descriptor.dialect,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pool created"
        );
        Ok(handle)
    }

    /// Builds a pool that the registry does not track. The caller closes it.
    pub async fn new_transient_pool(
        &self,
        url: &str,
        username: &str,
        password: &str,
        dialect: Dialect,
    ) -> AppResult<PoolHandle> {
        let handle = self.connect(dialect, url, username, password).await?;
        tracing::debug!(dialect = %dialect, "Transient pool created");
        Ok(handle)
    }

    /// Drops the cached pool for `id`, if any. Idempotent.
    ///
    /// The pool is closed right away when nothing else holds it; otherwise it
    /// closes when the last outstanding handle is dropped.
    pub async fn evict(&self, id: DataSourceId) {
        let Some(slot) = self.slots.lock().await.remove(&id) else {
            return;
        };

        let Ok(cell) = Arc::try_unwrap(slot) else {
            tracing::debug!(connection_id = id, "Evicted pool slot still referenced by a lookup");
            return;
        };

        if let Some(handle) = cell.into_inner() {
            match Arc::try_unwrap(handle.0) {
                Ok(pool) => {
                    pool.close().await;
                    tracing::info!(connection_id = id, "Pool evicted and closed");
                }
                Err(_) => {
                    tracing::info!(connection_id = id, "Pool evicted, closing after in-flight use");
                }
            }
        }
    }

    /// Closes every cached pool. Used on shutdown.
    pub async fn close_all(&self) {
        let slots: Vec<_> = self.slots.lock().await.drain().collect();
        for (id, slot) in slots {
            if let Some(handle) = slot.get() {
                handle.pool().close().await;
                tracing::debug!(connection_id = id, "Pool closed");
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let slots = self.slots.lock().await;
        let cached = slots.values().filter(|slot| slot.initialized()).count();
        PoolStats {
            cached,
            slots: slots.len(),
            built: self.built.load(Ordering::SeqCst),
        }
    }

    async fn connect(
        &self,
        dialect: Dialect,
        url: &str,
        username: &str,
        password: &str,
    ) -> AppResult<PoolHandle> {
        let url = strip_jdbc_prefix(url);
        let settings = &self.settings;
        let engine = dialect.display_name();
        let connect_err =
            |e: sqlx::Error| AppError::DatabaseConnection(format!("{engine} connection failed: {e}"));
        let url_err =
            |e: sqlx::Error| AppError::Validation(format!("invalid {engine} connection URL: {e}"));

        let pool = match dialect {
            Dialect::MySql => {
                let mut options = MySqlConnectOptions::from_str(url).map_err(url_err)?;
                if !username.is_empty() {
                    options = options.username(username);
                }
                if !password.is_empty() {
                    options = options.password(password);
                }
                let pool = MySqlPoolOptions::new()
                    .max_connections(settings.max_size)
                    .min_connections(settings.min_idle)
                    .acquire_timeout(settings.connect_timeout)
                    .connect_with(options)
                    .await
                    .map_err(connect_err)?;
                DatabasePool::MySql(pool)
            }
            Dialect::PostgreSql => {
                let mut options = PgConnectOptions::from_str(url).map_err(url_err)?;
                if !username.is_empty() {
                    options = options.username(username);
                }
                if !password.is_empty() {
                    options = options.password(password);
                }
                let pool = PgPoolOptions::new()
                    .max_connections(settings.max_size)
                    .min_connections(settings.min_idle)
                    .acquire_timeout(settings.connect_timeout)
                    .connect_with(options)
                    .await
                    .map_err(connect_err)?;
                DatabasePool::Postgres(pool)
            }
            Dialect::Embedded => {
                let options = SqliteConnectOptions::from_str(url).map_err(url_err)?;
                let pool = SqlitePoolOptions::new()
                    .max_connections(settings.max_size)
                    .min_connections(settings.min_idle)
                    .acquire_timeout(settings.connect_timeout)
                    .connect_with(options)
                    .await
                    .map_err(connect_err)?;
                DatabasePool::Sqlite(pool)
            }
        };

        Ok(PoolHandle::new(pool))
    }
}

/// Runs a read query and materializes every row, columns in select order.
///
/// Driver failures come back as `QueryExecution` without retry.
pub async fn execute(handle: &PoolHandle, sql: &str) -> AppResult<Vec<ResultRow>> {
    let started = Instant::now();
    let rows = match handle.pool() {
        DatabasePool::MySql(pool) => sqlx::query(sql)
            .fetch_all(pool)
            .await
            .map_err(query_error)?
            .iter()
            .map(mysql_row)
            .collect::<Vec<_>>(),
        DatabasePool::Postgres(pool) => sqlx::query(sql)
            .fetch_all(pool)
            .await
            .map_err(query_error)?
            .iter()
            .map(pg_row)
            .collect(),
        DatabasePool::Sqlite(pool) => sqlx::query(sql)
            .fetch_all(pool)
            .await
            .map_err(query_error)?
            .iter()
            .map(sqlite_row)
            .collect(),
    };

    tracing::debug!(
        dialect = %handle.dialect(),
        rows = rows.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Query executed"
    );
    Ok(rows)
}

/// Round-trips `SELECT 1` and returns the latency.
pub async fn ping(handle: &PoolHandle) -> AppResult<Duration> {
    let start = Instant::now();
    let result = match handle.pool() {
        DatabasePool::MySql(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        DatabasePool::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
        DatabasePool::Sqlite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(|_| ()),
    };
    result.map_err(|e| AppError::DatabaseConnection(e.to_string()))?;
    Ok(start.elapsed())
}

/// Closes a pool obtained from [`PoolManager::new_transient_pool`].
pub async fn close(handle: PoolHandle) {
    handle.pool().close().await;
}

/// Stored URLs may carry the `jdbc:` prefix.
pub fn strip_jdbc_prefix(url: &str) -> &str {
    let url = url.trim();
    url.strip_prefix("jdbc:").unwrap_or(url)
}

fn query_error(e: sqlx::Error) -> AppError {
    AppError::QueryExecution(e.to_string())
}

// ============== Row decoding ==============

/// Tries each listed type in order; the first compatible decode wins.
/// SQL NULL decodes as `Option::None` for the first type and becomes JSON null.
macro_rules! decode_column {
    ($row:expr, $idx:expr, $( $ty:ty => $conv:expr ),+ $(,)?) => {{
        $(
            if let Ok(value) = $row.try_get::<Option<$ty>, _>($idx) {
                return value.map($conv).unwrap_or(JsonValue::Null);
            }
        )+
        tracing::debug!(column = $idx, "Unsupported column type, returning null");
        JsonValue::Null
    }};
}

fn mysql_row(row: &MySqlRow) -> ResultRow {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), mysql_value(row, col.ordinal())))
        .collect()
}

fn mysql_value(row: &MySqlRow, idx: usize) -> JsonValue {
    decode_column!(row, idx,
        i64 => JsonValue::from,
        u64 => JsonValue::from,
        bool => JsonValue::from,
        f64 => JsonValue::from,
        f32 => JsonValue::from,
        BigDecimal => |v: BigDecimal| JsonValue::String(v.to_string()),
        String => JsonValue::String,
        chrono::NaiveDateTime => |v: chrono::NaiveDateTime| JsonValue::String(v.to_string()),
        chrono::DateTime<chrono::Utc> => |v: chrono::DateTime<chrono::Utc>| JsonValue::String(v.to_rfc3339()),
        chrono::NaiveDate => |v: chrono::NaiveDate| JsonValue::String(v.to_string()),
        chrono::NaiveTime => |v: chrono::NaiveTime| JsonValue::String(v.to_string()),
        JsonValue => |v: JsonValue| v,
        Vec<u8> => |v: Vec<u8>| JsonValue::String(STANDARD.encode(v)),
    )
}

fn pg_row(row: &PgRow) -> ResultRow {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), pg_value(row, col.ordinal())))
        .collect()
}

fn pg_value(row: &PgRow, idx: usize) -> JsonValue {
    decode_column!(row, idx,
        i16 => JsonValue::from,
        i32 => JsonValue::from,
        i64 => JsonValue::from,
        f32 => JsonValue::from,
        f64 => JsonValue::from,
        bool => JsonValue::from,
        String => JsonValue::String,
        BigDecimal => |v: BigDecimal| JsonValue::String(v.to_string()),
        chrono::NaiveDateTime => |v: chrono::NaiveDateTime| JsonValue::String(v.to_string()),
        chrono::DateTime<chrono::Utc> => |v: chrono::DateTime<chrono::Utc>| JsonValue::String(v.to_rfc3339()),
        chrono::NaiveDate => |v: chrono::NaiveDate| JsonValue::String(v.to_string()),
        chrono::NaiveTime => |v: chrono::NaiveTime| JsonValue::String(v.to_string()),
        uuid::Uuid => |v: uuid::Uuid| JsonValue::String(v.to_string()),
        JsonValue => |v: JsonValue| v,
        Vec<u8> => |v: Vec<u8>| JsonValue::String(STANDARD.encode(v)),
    )
}

fn sqlite_row(row: &SqliteRow) -> ResultRow {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), sqlite_value(row, col.ordinal())))
        .collect()
}

fn sqlite_value(row: &SqliteRow, idx: usize) -> JsonValue {
    decode_column!(row, idx,
        i64 => JsonValue::from,
        f64 => JsonValue::from,
        String => JsonValue::String,
        bool => JsonValue::from,
        Vec<u8> => |v: Vec<u8>| JsonValue::String(STANDARD.encode(v)),
    )
}
