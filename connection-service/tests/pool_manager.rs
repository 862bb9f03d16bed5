//! Registry, schema extraction and data-source administration against a
//! file-backed SQLite database.

use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use common::config::PoolSettings;
use common::errors::AppError;
use common::models::{CreateConnectionRequest, Dialect, NewDataSource};
use common::store::{ConfigStore, GrantStore, InMemoryStore};
use connection_service::pool_manager::{self, PoolHandle};
use connection_service::schema_extractor::NO_TABLES_SENTINEL;
use connection_service::{
    ConnectionService, ConnectionServiceTrait, CredentialCipher, PoolManager, SchemaExtractor,
};

const SECRET: &str = "integration-test-secret";

fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}?mode=rwc", path.display())
}

async fn seeded_database(dir: &TempDir) -> String {
    let url = sqlite_url(&dir.path().join("shop.db"));
    let pool = SqlitePoolOptions::new().connect(&url).await.unwrap();
    sqlx::query(
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            score REAL
        )",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO users (id, name, email, score) VALUES
            (1, 'ada', 'ada@example.com', 9.5),
            (2, 'bob', NULL, 7.0)",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;
    url
}

struct Fixture {
    store: Arc<InMemoryStore>,
    manager: Arc<PoolManager>,
    cipher: CredentialCipher,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let cipher = CredentialCipher::new(SECRET);
    let manager = Arc::new(PoolManager::new(
        store.clone(),
        cipher.clone(),
        PoolSettings::default(),
    ));
    Fixture {
        store,
        manager,
        cipher,
    }
}

async fn register(fx: &Fixture, url: &str) -> i64 {
    fx.store
        .insert_descriptor(NewDataSource {
            name: "shop".into(),
            dialect: Dialect::Embedded,
            url: url.into(),
            username: String::new(),
            encrypted_password: fx.cipher.encrypt("").unwrap(),
            schema_ddl: None,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn concurrent_first_access_builds_one_pool() {
    let dir = tempfile::tempdir().unwrap();
    let url = seeded_database(&dir).await;
    let fx = fixture();
    let id = register(&fx, &url).await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let manager = fx.manager.clone();
            tokio::spawn(async move { manager.get_pool(id).await })
        })
        .collect();

    let mut handles: Vec<PoolHandle> = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert!(handles.iter().all(|h| PoolHandle::ptr_eq(h, &handles[0])));
    let stats = fx.manager.stats().await;
    assert_eq!(stats.built, 1);
    assert_eq!(stats.cached, 1);
}

#[tokio::test]
async fn execute_returns_rows_in_column_order() {
    let dir = tempfile::tempdir().unwrap();
    let url = seeded_database(&dir).await;
    let fx = fixture();
    let id = register(&fx, &url).await;

    let pool = fx.manager.get_pool(id).await.unwrap();
    let rows = pool_manager::execute(&pool, "SELECT id, name, email, score FROM users ORDER BY id")
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    let columns: Vec<_> = rows[0].keys().cloned().collect();
    assert_eq!(columns, vec!["id", "name", "email", "score"]);
    assert_eq!(
        serde_json::Value::Object(rows[0].clone()),
        json!({"id": 1, "name": "ada", "email": "ada@example.com", "score": 9.5})
    );
    assert_eq!(rows[1]["email"], serde_json::Value::Null);
}

#[tokio::test]
async fn execute_reports_driver_failures() {
    let dir = tempfile::tempdir().unwrap();
    let url = seeded_database(&dir).await;
    let fx = fixture();
    let id = register(&fx, &url).await;

    let pool = fx.manager.get_pool(id).await.unwrap();
    let err = pool_manager::execute(&pool, "SELECT missing_column FROM users")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::QueryExecution(_)));
}

#[tokio::test]
async fn evict_is_idempotent_and_forces_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let url = seeded_database(&dir).await;
    let fx = fixture();
    let id = register(&fx, &url).await;

    let before = fx.manager.get_pool(id).await.unwrap();
    fx.manager.evict(id).await;
    fx.manager.evict(id).await;
    fx.manager.evict(9999).await;
    assert_eq!(fx.manager.stats().await.cached, 0);

    // A handle taken before eviction keeps working.
    assert!(!before.is_closed());
    let rows = pool_manager::execute(&before, "SELECT COUNT(*) AS n FROM users")
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], json!(2));

    let after = fx.manager.get_pool(id).await.unwrap();
    assert!(!PoolHandle::ptr_eq(&before, &after));
    assert_eq!(fx.manager.stats().await.built, 2);
}

#[tokio::test]
async fn unknown_data_source_is_not_cached() {
    let fx = fixture();
    let err = fx.manager.get_pool(42).await.unwrap_err();
    assert!(matches!(err, AppError::ConnectionNotFound(_)));
    let stats = fx.manager.stats().await;
    assert_eq!(stats.cached, 0);
    assert_eq!(stats.built, 0);
    assert_eq!(stats.slots, 0);
}

#[tokio::test]
async fn unreachable_database_is_a_connection_error() {
    let fx = fixture();
    let id = register(&fx, "sqlite:/nonexistent-dir/sub/db.sqlite").await;
    let err = fx.manager.get_pool(id).await.unwrap_err();
    assert!(matches!(err, AppError::DatabaseConnection(_)));
    assert_eq!(fx.manager.stats().await.slots, 0);
}

#[tokio::test]
async fn failed_lookups_leave_no_slots_behind() {
    let fx = fixture();
    for id in 1000..1050 {
        assert!(fx.manager.get_pool(id).await.is_err());
    }
    assert_eq!(fx.manager.stats().await.slots, 0);

    let dir = tempfile::tempdir().unwrap();
    let url = seeded_database(&dir).await;
    let id = register(&fx, &url).await;
    fx.manager.get_pool(id).await.unwrap();
    let stats = fx.manager.stats().await;
    assert_eq!(stats.slots, 1);
    assert_eq!(stats.cached, 1);
}

#[tokio::test]
async fn schema_extraction_renders_tables() {
    let dir = tempfile::tempdir().unwrap();
    let url = seeded_database(&dir).await;
    let fx = fixture();

    let pool = fx
        .manager
        .new_transient_pool(&url, "", "", Dialect::Embedded)
        .await
        .unwrap();
    let ddl = SchemaExtractor::extract(&pool, Dialect::Embedded, &url)
        .await
        .unwrap();
    pool_manager::close(pool).await;

    assert_eq!(
        ddl,
        "CREATE TABLE users (\n  id INTEGER PRIMARY KEY,\n  name TEXT NOT NULL,\n  email TEXT,\n  score REAL\n);"
    );
}

#[tokio::test]
async fn schema_extraction_on_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = sqlite_url(&dir.path().join("empty.db"));
    let fx = fixture();

    let pool = fx
        .manager
        .new_transient_pool(&url, "", "", Dialect::Embedded)
        .await
        .unwrap();
    let ddl = SchemaExtractor::extract(&pool, Dialect::Embedded, &url)
        .await
        .unwrap();
    assert_eq!(ddl, NO_TABLES_SENTINEL);
}

#[tokio::test]
async fn service_create_refresh_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let url = seeded_database(&dir).await;
    let fx = fixture();
    let service = ConnectionService::new(
        fx.store.clone(),
        fx.store.clone(),
        fx.manager.clone(),
        fx.cipher.clone(),
    );

    let created = service
        .create(CreateConnectionRequest {
            name: "shop".into(),
            dialect: Dialect::Embedded,
            url: url.clone(),
            username: String::new(),
            password: "pw".into(),
        })
        .await
        .unwrap();
    assert!(created.schema_ddl.as_deref().unwrap().contains("CREATE TABLE users"));

    // Stored credential is the encrypted blob, never the plaintext.
    let stored = fx.store.get_descriptor(created.id).await.unwrap();
    assert_ne!(stored.encrypted_password, "pw");
    assert_eq!(fx.cipher.decrypt(&stored.encrypted_password).unwrap().as_str(), "pw");

    assert!(service.test(created.id).await.is_ok());
    let refreshed = service.refresh_schema(created.id).await.unwrap();
    assert_eq!(refreshed.schema_ddl, created.schema_ddl);

    fx.store.add_grant(7, created.id).await.unwrap();
    service.delete(created.id).await.unwrap();
    assert!(fx.store.list_by_data_source(created.id).await.unwrap().is_empty());
    assert!(service.get(created.id).await.unwrap_err().is_not_found());
    assert!(service.delete(created.id).await.unwrap_err().is_not_found());
    assert_eq!(fx.manager.stats().await.cached, 0);

    // A lookup after deletion cannot bring the pool back.
    assert!(fx.manager.get_pool(created.id).await.unwrap_err().is_not_found());
    assert_eq!(fx.manager.stats().await.slots, 0);
}

#[tokio::test]
async fn service_create_rejects_invalid_request() {
    let fx = fixture();
    let service = ConnectionService::new(
        fx.store.clone(),
        fx.store.clone(),
        fx.manager.clone(),
        fx.cipher.clone(),
    );
    let err = service
        .create(CreateConnectionRequest {
            name: String::new(),
            dialect: Dialect::Embedded,
            url: "sqlite::memory:".into(),
            username: String::new(),
            password: String::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(fx.store.list_descriptors().await.unwrap().is_empty());
}
