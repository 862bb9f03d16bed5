//! QueryPilot 公共模块
//!
//! Shared building blocks for every QueryPilot crate:
//! - error taxonomy and its HTTP mapping
//! - environment-driven configuration
//! - data model (data sources, grants, users, query outcomes)
//! - store interfaces and an in-memory implementation
//! - the SQL safety sanitizer

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod store;
pub mod utils;

pub use errors::{AppError, AppResult};
