//! Shared state for the data-source administration routes.

use std::sync::Arc;

use crate::service::ConnectionService;

/// State required by [`crate::routes::router`]. The hosting application
/// provides it through `FromRef`.
#[derive(Clone)]
pub struct ConnectionState {
    pub service: Arc<ConnectionService>,
}

impl ConnectionState {
    pub fn new(service: Arc<ConnectionService>) -> Self {
        Self { service }
    }
}
