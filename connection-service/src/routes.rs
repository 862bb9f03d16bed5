//! 数据源管理路由模块

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};

use crate::handlers::{
    create_connection, delete_connection, get_connection, list_connections, refresh_schema,
    test_connection,
};
use crate::state::ConnectionState;

/// 创建数据源管理路由（挂载在 `/api/admin` 下，由宿主应用负责管理员校验）
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ConnectionState: FromRef<S>,
{
    Router::new()
        .route(
            "/api/admin/connections",
            get(list_connections).post(create_connection),
        )
        .route(
            "/api/admin/connections/{id}",
            get(get_connection).delete(delete_connection),
        )
        .route(
            "/api/admin/connections/{id}/refresh-schema",
            post(refresh_schema),
        )
        .route("/api/admin/connections/{id}/test", get(test_connection))
}
