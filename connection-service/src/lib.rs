//! QueryPilot 数据源管理
//!
//! 提供目标数据库相关的全部能力：
//! - 凭据加密（AES-256-CBC）
//! - 连接池注册表（按数据源 ID 缓存，单飞构建）
//! - Schema 提取
//! - MySQL 元数据存储
//! - 数据源管理服务与管理端路由

pub mod crypto;
pub mod handlers;
pub mod meta_store;
pub mod pool_manager;
pub mod routes;
pub mod schema_extractor;
pub mod service;
pub mod state;

pub use crypto::CredentialCipher;
pub use pool_manager::{DatabasePool, PoolHandle, PoolManager, PoolStats};
pub use schema_extractor::SchemaExtractor;
pub use service::{ConnectionService, ConnectionServiceTrait};
pub use state::ConnectionState;
