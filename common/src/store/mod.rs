//! Collaborator interfaces for persisted state.
//!
//! The gateway reads data-source descriptors, grants and users through these
//! traits. [`InMemoryStore`] implements all three for tests and local runs; a
//! MySQL-backed implementation lives in `connection-service`.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::models::{
    DataSourceDescriptor, DataSourceId, GrantEntry, NewDataSource, UserAccount, UserId,
};

/// Persistence of data-source descriptors.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fails with `ConnectionNotFound` when the id does not resolve.
    async fn get_descriptor(&self, id: DataSourceId) -> AppResult<DataSourceDescriptor>;

    /// Stores a new descriptor and returns it with its assigned id.
    async fn insert_descriptor(&self, new: NewDataSource) -> AppResult<DataSourceDescriptor>;

    /// Replaces an existing descriptor.
    async fn save_descriptor(
        &self,
        descriptor: DataSourceDescriptor,
    ) -> AppResult<DataSourceDescriptor>;

    async fn list_descriptors(&self) -> AppResult<Vec<DataSourceDescriptor>>;

    /// Fails with `ConnectionNotFound` when the id does not resolve.
    async fn delete_descriptor(&self, id: DataSourceId) -> AppResult<()>;
}

/// Persistence of (user, data source) grants.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn has_grant(&self, user_id: UserId, connection_id: DataSourceId) -> AppResult<bool>;

    async fn list_by_user(&self, user_id: UserId) -> AppResult<Vec<GrantEntry>>;

    async fn list_by_data_source(&self, connection_id: DataSourceId)
        -> AppResult<Vec<GrantEntry>>;

    /// Fails with `Conflict` when the pair already exists.
    async fn add_grant(&self, user_id: UserId, connection_id: DataSourceId)
        -> AppResult<GrantEntry>;

    /// Fails with `GrantNotFound` when the pair does not exist.
    async fn remove_grant(&self, user_id: UserId, connection_id: DataSourceId) -> AppResult<()>;

    /// Removes every grant on a data source, returning how many were removed.
    async fn remove_by_data_source(&self, connection_id: DataSourceId) -> AppResult<u64>;
}

/// Read access to application users.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> AppResult<Option<UserAccount>>;
}
