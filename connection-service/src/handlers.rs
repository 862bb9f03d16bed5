//! Handler模块

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use common::errors::AppError;
use common::models::{ConnectionItem, CreateConnectionRequest, DataSourceId};
use common::response::ApiResponse;

use crate::service::ConnectionServiceTrait;
use crate::state::ConnectionState;

const SERVICE_NAME: &str = "connection-service";

/// 列出所有数据源
#[utoipa::path(
    get,
    path = "/api/admin/connections",
    tag = "admin-connections",
    responses(
        (status = 200, description = "数据源列表", body = ApiResponse<Vec<ConnectionItem>>),
        (status = 403, description = "需要管理员权限")
    )
)]
pub async fn list_connections(
    State(state): State<ConnectionState>,
) -> Result<Json<ApiResponse<Vec<ConnectionItem>>>, AppError> {
    let data = state.service.list().await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 创建数据源（连通性测试 + Schema 提取 + 密码加密）
#[utoipa::path(
    post,
    path = "/api/admin/connections",
    tag = "admin-connections",
    request_body = CreateConnectionRequest,
    responses(
        (status = 200, description = "数据源已创建", body = ApiResponse<ConnectionItem>),
        (status = 400, description = "参数校验失败"),
        (status = 503, description = "无法连接目标数据库")
    )
)]
pub async fn create_connection(
    State(state): State<ConnectionState>,
    Json(req): Json<CreateConnectionRequest>,
) -> Result<Json<ApiResponse<ConnectionItem>>, AppError> {
    let data = state.service.create(req).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 根据 ID 获取数据源
#[utoipa::path(
    get,
    path = "/api/admin/connections/{id}",
    tag = "admin-connections",
    params(
        ("id" = i64, Path, description = "数据源 ID")
    ),
    responses(
        (status = 200, description = "数据源详情", body = ApiResponse<ConnectionItem>),
        (status = 404, description = "数据源未找到")
    )
)]
pub async fn get_connection(
    State(state): State<ConnectionState>,
    Path(id): Path<DataSourceId>,
) -> Result<Json<ApiResponse<ConnectionItem>>, AppError> {
    let data = state.service.get(id).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 删除数据源（同时移除连接池与授权）
#[utoipa::path(
    delete,
    path = "/api/admin/connections/{id}",
    tag = "admin-connections",
    params(
        ("id" = i64, Path, description = "数据源 ID")
    ),
    responses(
        (status = 200, description = "数据源已删除", body = ApiResponse<bool>),
        (status = 404, description = "数据源未找到")
    )
)]
pub async fn delete_connection(
    State(state): State<ConnectionState>,
    Path(id): Path<DataSourceId>,
) -> Result<Json<ApiResponse<bool>>, AppError> {
    state.service.delete(id).await?;
    Ok(Json(ApiResponse::ok_with_service(true, SERVICE_NAME)))
}

/// 刷新数据源的 Schema 缓存
#[utoipa::path(
    post,
    path = "/api/admin/connections/{id}/refresh-schema",
    tag = "admin-connections",
    params(
        ("id" = i64, Path, description = "数据源 ID")
    ),
    responses(
        (status = 200, description = "Schema 已刷新", body = ApiResponse<ConnectionItem>),
        (status = 404, description = "数据源未找到"),
        (status = 500, description = "Schema 提取失败")
    )
)]
pub async fn refresh_schema(
    State(state): State<ConnectionState>,
    Path(id): Path<DataSourceId>,
) -> Result<Json<ApiResponse<ConnectionItem>>, AppError> {
    let data = state.service.refresh_schema(id).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE_NAME)))
}

/// 测试数据源连接
#[utoipa::path(
    get,
    path = "/api/admin/connections/{id}/test",
    tag = "admin-connections",
    params(
        ("id" = i64, Path, description = "数据源 ID")
    ),
    responses(
        (status = 200, description = "连接测试结果", body = ApiResponse<ConnectionTestResult>),
        (status = 404, description = "数据源未找到")
    )
)]
pub async fn test_connection(
    State(state): State<ConnectionState>,
    Path(id): Path<DataSourceId>,
) -> Result<Json<ApiResponse<ConnectionTestResult>>, AppError> {
    let result = match state.service.test(id).await {
        Ok(latency) => ConnectionTestResult {
            id,
            success: true,
            latency_ms: Some(latency.as_millis() as u64),
            error: None,
            tested_at: Utc::now(),
        },
        // 未找到的数据源仍按 404 返回
        Err(e) if e.is_not_found() => return Err(e),
        Err(e) => ConnectionTestResult {
            id,
            success: false,
            latency_ms: None,
            error: Some(e.to_string()),
            tested_at: Utc::now(),
        },
    };
    Ok(Json(ApiResponse::ok_with_service(result, SERVICE_NAME)))
}

/// 连接测试结果
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionTestResult {
    /// 数据源 ID
    pub id: DataSourceId,
    /// 测试是否成功
    pub success: bool,
    /// 连接延迟（毫秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// 错误信息（如果测试失败）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 测试时间
    pub tested_at: DateTime<Utc>,
}
