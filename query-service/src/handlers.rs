//! Handler模块

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use common::errors::AppError;
use common::middleware::auth::CurrentUser;
use common::models::{
    AskRequest, ConnectionItem, DataSourceId, GrantEntry, GrantRequest, QueryOutcome, UserId,
};
use common::response::ApiResponse;
use connection_service::PoolStats;

use crate::state::AppState;

pub const SERVICE_NAME: &str = "query-service";

fn validate<T: Validate>(req: &T) -> Result<(), AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))
}

/// 自然语言查询
#[utoipa::path(
    post,
    path = "/api/query/ask",
    tag = "query",
    request_body = AskRequest,
    params(
        ("x-user-id" = i64, Header, description = "调用者用户 ID")
    ),
    responses(
        (status = 200, description = "查询执行成功", body = ApiResponse<QueryOutcome>),
        (status = 400, description = "参数校验失败或 SQL 未通过安全检查"),
        (status = 403, description = "无权访问该数据源"),
        (status = 404, description = "用户或数据源未找到"),
        (status = 502, description = "SQL 生成失败")
    )
)]
pub async fn ask(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<AskRequest>,
) -> Result<Json<ApiResponse<QueryOutcome>>, AppError> {
    validate(&req)?;
    let outcome = state
        .query
        .run(user_id, req.connection_id, &req.question)
        .await?;
    Ok(Json(ApiResponse::ok_with_service(outcome, SERVICE_NAME)))
}

/// 当前用户可访问的数据源
#[utoipa::path(
    get,
    path = "/api/query/connections",
    tag = "query",
    params(
        ("x-user-id" = i64, Header, description = "调用者用户 ID")
    ),
    responses(
        (status = 200, description = "可访问的数据源列表", body = ApiResponse<Vec<ConnectionItem>>),
        (status = 404, description = "用户未找到")
    )
)]
pub async fn my_connections(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<ApiResponse<Vec<ConnectionItem>>>, AppError> {
    let data = state.guard.accessible_data_sources(user_id).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 授予用户数据源访问权限
#[utoipa::path(
    post,
    path = "/api/admin/permissions",
    tag = "admin-permissions",
    request_body = GrantRequest,
    responses(
        (status = 200, description = "授权成功", body = ApiResponse<GrantEntry>),
        (status = 404, description = "用户或数据源未找到"),
        (status = 409, description = "授权已存在")
    )
)]
pub async fn grant_permission(
    State(state): State<AppState>,
    Json(req): Json<GrantRequest>,
) -> Result<Json<ApiResponse<GrantEntry>>, AppError> {
    validate(&req)?;
    let entry = state.guard.grant(req.user_id, req.connection_id).await?;
    Ok(Json(ApiResponse::ok_with_service(entry, SERVICE_NAME)))
}

/// 撤销用户数据源访问权限
#[utoipa::path(
    delete,
    path = "/api/admin/permissions",
    tag = "admin-permissions",
    params(
        ("user_id" = i64, Query, description = "用户 ID"),
        ("connection_id" = i64, Query, description = "数据源 ID")
    ),
    responses(
        (status = 200, description = "已撤销", body = ApiResponse<bool>),
        (status = 404, description = "授权不存在")
    )
)]
pub async fn revoke_permission(
    State(state): State<AppState>,
    Query(req): Query<GrantRequest>,
) -> Result<Json<ApiResponse<bool>>, AppError> {
    validate(&req)?;
    state.guard.revoke(req.user_id, req.connection_id).await?;
    Ok(Json(ApiResponse::ok_with_service(true, SERVICE_NAME)))
}

/// 查询用户的授权列表
#[utoipa::path(
    get,
    path = "/api/admin/permissions/user/{id}",
    tag = "admin-permissions",
    params(
        ("id" = i64, Path, description = "用户 ID")
    ),
    responses(
        (status = 200, description = "授权列表", body = ApiResponse<Vec<GrantEntry>>)
    )
)]
pub async fn user_permissions(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<ApiResponse<Vec<GrantEntry>>>, AppError> {
    let data = state.guard.grants_for_user(id).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 查询数据源的授权列表
#[utoipa::path(
    get,
    path = "/api/admin/permissions/connection/{id}",
    tag = "admin-permissions",
    params(
        ("id" = i64, Path, description = "数据源 ID")
    ),
    responses(
        (status = 200, description = "授权列表", body = ApiResponse<Vec<GrantEntry>>)
    )
)]
pub async fn connection_permissions(
    State(state): State<AppState>,
    Path(id): Path<DataSourceId>,
) -> Result<Json<ApiResponse<Vec<GrantEntry>>>, AppError> {
    let data = state.guard.grants_for_data_source(id).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pools: state.pool_manager.stats().await,
        timestamp: Utc::now(),
    })
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    /// 连接池缓存状态
    pub pools: PoolStats,
    pub timestamp: DateTime<Utc>,
}
