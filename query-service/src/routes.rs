//! 路由模块

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};

use common::errors::AppError;
use common::middleware::auth::CurrentUser;

use crate::handlers;
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .merge(connection_service::routes::router())
        .route(
            "/api/admin/permissions",
            post(handlers::grant_permission).delete(handlers::revoke_permission),
        )
        .route(
            "/api/admin/permissions/user/{id}",
            get(handlers::user_permissions),
        )
        .route(
            "/api/admin/permissions/connection/{id}",
            get(handlers::connection_permissions),
        )
        .route_layer(middleware::from_fn_with_state(state, require_admin));

    Router::new()
        .route("/api/query/ask", post(handlers::ask))
        .route("/api/query/connections", get(handlers::my_connections))
        .route("/api/health", get(handlers::health_check))
        .merge(admin)
}

/// `/api/admin/**` 仅对 ADMIN 开放
async fn require_admin(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    state.guard.require_admin(user_id).await?;
    Ok(next.run(req).await)
}
