//! Application state for query service.

use std::sync::Arc;

use axum::extract::FromRef;

use common::config::AppConfig;
use connection_service::{ConnectionState, PoolManager};

use crate::access_guard::AccessGuard;
use crate::service::QueryService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub guard: Arc<AccessGuard>,
    pub query: Arc<QueryService>,
    pub pool_manager: Arc<PoolManager>,
    pub connections: ConnectionState,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        config: AppConfig,
        guard: Arc<AccessGuard>,
        query: Arc<QueryService>,
        connections: ConnectionState,
    ) -> Self {
        let pool_manager = connections.service.pool_manager().clone();
        Self {
            config: Arc::new(config),
            guard,
            query,
            pool_manager,
            connections,
        }
    }
}

// 管理端数据源路由复用 connection-service 的 handler
impl FromRef<AppState> for ConnectionState {
    fn from_ref(state: &AppState) -> Self {
        state.connections.clone()
    }
}
