//! Shared data models.

pub mod access;
pub mod connection;
pub mod query;

// Re-export commonly used types
pub use access::{GrantEntry, GrantRequest, UserAccount, UserId, UserRole};
pub use connection::{
    ConnectionItem, CreateConnectionRequest, DataSourceDescriptor, DataSourceId, Dialect,
    NewDataSource,
};
pub use query::{AskRequest, QueryOutcome, ResultRow, SafetyCheck};
