//! QueryPilot Text2SQL
//!
//! 将自然语言问题转换为候选 SQL：
//! - 按方言构建系统提示词（含 Schema 与只读约束）
//! - 通过 OpenAI 兼容接口调用大模型
//! - 从模型响应中提取 SQL

pub mod client;
pub mod generator;
pub mod prompt;

pub use client::{CompletionClient, CompletionError, CompletionRequest, OpenAiCompatibleClient};
pub use generator::{extract_sql_from_response, SqlGenerator};
