//! QueryPilot 查询服务
//!
//! 提供：
//! - 自然语言查询（权限校验、SQL 生成、安全校验、执行）
//! - 数据源与授权的管理端接口

pub mod access_guard;
pub mod handlers;
pub mod routes;
pub mod service;
pub mod state;

pub use access_guard::AccessGuard;
pub use service::QueryService;
pub use state::AppState;
