//! In-memory store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConfigStore, GrantStore, UserStore};
use crate::errors::{AppError, AppResult};
use crate::models::{
    DataSourceDescriptor, DataSourceId, GrantEntry, NewDataSource, UserAccount, UserId, UserRole,
};

/// Process-local implementation of every store trait.
///
/// Descriptors keep insertion order (ids are monotonic), grants are a set so
/// the one-entry-per-pair invariant holds structurally.
#[derive(Default)]
pub struct InMemoryStore {
    descriptors: RwLock<BTreeMap<DataSourceId, DataSourceDescriptor>>,
    grants: RwLock<BTreeSet<(UserId, DataSourceId)>>,
    users: RwLock<HashMap<UserId, UserAccount>>,
    next_descriptor_id: AtomicI64,
    next_user_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user and returns it. Account management is external; this
    /// exists to seed the store.
    pub async fn add_user(&self, username: impl Into<String>, role: UserRole) -> UserAccount {
        let id = self.next_user_id.fetch_add(1, Ordering::SeqCst) + 1;
        let user = UserAccount {
            id,
            username: username.into(),
            role,
        };
        self.users.write().await.insert(id, user.clone());
        user
    }
}

#[async_trait]
impl ConfigStore for InMemoryStore {
    async fn get_descriptor(&self, id: DataSourceId) -> AppResult<DataSourceDescriptor> {
        self.descriptors
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))
    }

    async fn insert_descriptor(&self, new: NewDataSource) -> AppResult<DataSourceDescriptor> {
        let id = self.next_descriptor_id.fetch_add(1, Ordering::SeqCst) + 1;
        let descriptor = new.into_descriptor(id);
        self.descriptors.write().await.insert(id, descriptor.clone());
        Ok(descriptor)
    }

    async fn save_descriptor(
        &self,
        descriptor: DataSourceDescriptor,
    ) -> AppResult<DataSourceDescriptor> {
        let mut descriptors = self.descriptors.write().await;
        match descriptors.get_mut(&descriptor.id) {
            Some(slot) => {
                *slot = descriptor.clone();
                Ok(descriptor)
            }
            None => Err(AppError::ConnectionNotFound(descriptor.id.to_string())),
        }
    }

    async fn list_descriptors(&self) -> AppResult<Vec<DataSourceDescriptor>> {
        Ok(self.descriptors.read().await.values().cloned().collect())
    }

    async fn delete_descriptor(&self, id: DataSourceId) -> AppResult<()> {
        self.descriptors
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))
    }
}

#[async_trait]
impl GrantStore for InMemoryStore {
    async fn has_grant(&self, user_id: UserId, connection_id: DataSourceId) -> AppResult<bool> {
        Ok(self.grants.read().await.contains(&(user_id, connection_id)))
    }

    async fn list_by_user(&self, user_id: UserId) -> AppResult<Vec<GrantEntry>> {
        Ok(self
            .grants
            .read()
            .await
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|&(user_id, connection_id)| GrantEntry {
                user_id,
                connection_id,
            })
            .collect())
    }

    async fn list_by_data_source(
        &self,
        connection_id: DataSourceId,
    ) -> AppResult<Vec<GrantEntry>> {
        Ok(self
            .grants
            .read()
            .await
            .iter()
            .filter(|(_, c)| *c == connection_id)
            .map(|&(user_id, connection_id)| GrantEntry {
                user_id,
                connection_id,
            })
            .collect())
    }

    async fn add_grant(
        &self,
        user_id: UserId,
        connection_id: DataSourceId,
    ) -> AppResult<GrantEntry> {
        if !self.grants.write().await.insert((user_id, connection_id)) {
            return Err(AppError::Conflict(format!(
                "permission already exists for user {user_id} on connection {connection_id}"
            )));
        }
        Ok(GrantEntry {
            user_id,
            connection_id,
        })
    }

    async fn remove_grant(&self, user_id: UserId, connection_id: DataSourceId) -> AppResult<()> {
        if self.grants.write().await.remove(&(user_id, connection_id)) {
            Ok(())
        } else {
            Err(AppError::GrantNotFound(format!(
                "user {user_id} on connection {connection_id}"
            )))
        }
    }

    async fn remove_by_data_source(&self, connection_id: DataSourceId) -> AppResult<u64> {
        let mut grants = self.grants.write().await;
        let before = grants.len();
        grants.retain(|(_, c)| *c != connection_id);
        Ok((before - grants.len()) as u64)
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn find_user(&self, id: UserId) -> AppResult<Option<UserAccount>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dialect;

    fn new_source(name: &str) -> NewDataSource {
        NewDataSource {
            name: name.into(),
            dialect: Dialect::Embedded,
            url: "sqlite::memory:".into(),
            username: String::new(),
            encrypted_password: String::new(),
            schema_ddl: None,
        }
    }

    #[tokio::test]
    async fn test_descriptor_lifecycle() {
        let store = InMemoryStore::new();
        let a = store.insert_descriptor(new_source("a")).await.unwrap();
        let b = store.insert_descriptor(new_source("b")).await.unwrap();
        assert_ne!(a.id, b.id);

        store.save_descriptor(a.with_schema("-- No tables found")).await.unwrap();
        let reloaded = store.get_descriptor(a.id).await.unwrap();
        assert_eq!(reloaded.schema_ddl.as_deref(), Some("-- No tables found"));

        let names: Vec<_> = store
            .list_descriptors()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        store.delete_descriptor(a.id).await.unwrap();
        assert!(store.get_descriptor(a.id).await.unwrap_err().is_not_found());
        assert!(store.delete_descriptor(a.id).await.is_err());
    }

    #[tokio::test]
    async fn test_grant_pair_is_unique() {
        let store = InMemoryStore::new();
        store.add_grant(1, 10).await.unwrap();
        assert!(matches!(store.add_grant(1, 10).await, Err(AppError::Conflict(_))));
        assert!(store.has_grant(1, 10).await.unwrap());
        assert!(!store.has_grant(1, 11).await.unwrap());
    }

    #[tokio::test]
    async fn test_grant_listing_and_removal() {
        let store = InMemoryStore::new();
        store.add_grant(1, 10).await.unwrap();
        store.add_grant(2, 10).await.unwrap();
        store.add_grant(1, 11).await.unwrap();

        assert_eq!(store.list_by_user(1).await.unwrap().len(), 2);
        assert_eq!(store.list_by_data_source(10).await.unwrap().len(), 2);

        store.remove_grant(1, 11).await.unwrap();
        assert!(matches!(store.remove_grant(1, 11).await, Err(AppError::GrantNotFound(_))));

        assert_eq!(store.remove_by_data_source(10).await.unwrap(), 2);
        assert!(store.list_by_user(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_users_get_sequential_ids() {
        let store = InMemoryStore::new();
        let admin = store.add_user("admin", UserRole::Admin).await;
        let analyst = store.add_user("ann", UserRole::Analyst).await;
        assert_eq!(admin.id, 1);
        assert_eq!(analyst.id, 2);
        assert_eq!(store.find_user(2).await.unwrap(), Some(analyst));
        assert_eq!(store.find_user(99).await.unwrap(), None);
    }
}
