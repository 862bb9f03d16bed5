//! Utility functions and helpers.

pub mod sql_sanitizer;

// Re-export commonly used types
pub use sql_sanitizer::{SqlSanitizer, StatementKind};
