//! QueryPilot 查询网关
//!
//! 启动流程：
//! - 加载配置与日志
//! - 选择元数据存储（MySQL 或内存）
//! - 组装连接池注册表、SQL 生成器与查询编排
//! - 启动 HTTP 服务，退出时关闭全部连接池

use std::sync::Arc;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use sqlx::mysql::MySqlPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use ai_service::{OpenAiCompatibleClient, SqlGenerator};
use common::config::{load_dotenv, AppConfig};
use common::middleware::request_id::request_id_middleware;
use common::models::UserRole;
use common::store::{ConfigStore, GrantStore, InMemoryStore, UserStore};
use connection_service::meta_store::MySqlMetaStore;
use connection_service::{ConnectionService, ConnectionState, CredentialCipher, PoolManager};
use query_service::{handlers, routes, AccessGuard, AppState, QueryService};

const SERVICE_NAME: &str = "query-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "QueryPilot API",
        version = "0.1.0",
        description = "自然语言查询网关"
    ),
    paths(
        handlers::ask,
        handlers::my_connections,
        handlers::grant_permission,
        handlers::revoke_permission,
        handlers::user_permissions,
        handlers::connection_permissions,
        handlers::health_check,
        connection_service::handlers::list_connections,
        connection_service::handlers::create_connection,
        connection_service::handlers::get_connection,
        connection_service::handlers::delete_connection,
        connection_service::handlers::refresh_schema,
        connection_service::handlers::test_connection,
    ),
    components(schemas(
        common::models::AskRequest,
        common::models::QueryOutcome,
        common::models::SafetyCheck,
        common::models::ConnectionItem,
        common::models::CreateConnectionRequest,
        common::models::Dialect,
        common::models::GrantEntry,
        common::models::GrantRequest,
        connection_service::PoolStats,
        connection_service::handlers::ConnectionTestResult,
        handlers::HealthResponse,
    )),
    tags(
        (name = "query", description = "自然语言查询端点"),
        (name = "admin-connections", description = "数据源管理端点"),
        (name = "admin-permissions", description = "授权管理端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

/// 三类存储接口的同一实现
struct Stores {
    configs: Arc<dyn ConfigStore>,
    grants: Arc<dyn GrantStore>,
    users: Arc<dyn UserStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing();

    // 加载配置
    let config = AppConfig::load_with_service(SERVICE_NAME);

    let stores = open_stores(&config).await?;
    let cipher = CredentialCipher::new(&config.encryption_key);

    // 连接池注册表
    let pool_manager = Arc::new(PoolManager::new(
        stores.configs.clone(),
        cipher.clone(),
        config.pool.clone(),
    ));

    // SQL 生成器
    let client = OpenAiCompatibleClient::new(config.completion.clone())
        .context("创建 AI 客户端失败")?;
    if config.completion.api_key.is_none() {
        tracing::warn!("AI_API_KEY is not set, completion requests will be unauthenticated");
    }
    let generator = Arc::new(SqlGenerator::new(Arc::new(client)));

    let guard = Arc::new(AccessGuard::new(
        stores.users.clone(),
        stores.grants.clone(),
        stores.configs.clone(),
    ));
    let query = Arc::new(QueryService::new(
        guard.clone(),
        stores.configs.clone(),
        generator,
        pool_manager.clone(),
    ));
    let connections = ConnectionState::new(Arc::new(ConnectionService::new(
        stores.configs.clone(),
        stores.grants.clone(),
        pool_manager.clone(),
        cipher,
    )));

    // 创建应用状态
    let state = AppState::new(config.clone(), guard, query, connections);

    // 创建路由
    let app = create_router(state);

    // 启动服务
    let addr = format!("{}:{}", config.host, config.port);
    info!(service = SERVICE_NAME, address = %addr, "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务运行失败")?;

    pool_manager.close_all().await;
    info!(service = SERVICE_NAME, "服务已停止");
    Ok(())
}

/// 初始化日志追踪，`LOG_FORMAT=json` 时输出 JSON
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init();
    }
}

/// 配置了 DATABASE_URL 时使用 MySQL 元数据库，否则使用内存存储
async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(config.pool.connect_timeout)
                .connect(url)
                .await
                .context("连接元数据库失败")?;
            let store = Arc::new(MySqlMetaStore::new(pool).await?);
            let admin = store.ensure_user(&config.bootstrap_admin, UserRole::Admin).await?;
            info!(admin_id = admin.id, "元数据库已就绪");
            Ok(Stores {
                configs: store.clone(),
                grants: store.clone(),
                users: store,
            })
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, using the in-memory store");
            let store = Arc::new(InMemoryStore::new());
            let admin = store.add_user(config.bootstrap_admin.clone(), UserRole::Admin).await;
            info!(admin_id = admin.id, username = %admin.username, "内存存储已就绪");
            Ok(Stores {
                configs: store.clone(),
                grants: store.clone(),
                users: store,
            })
        }
    }
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router(state.clone()))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "无法监听退出信号");
    }
    info!("收到退出信号");
}
