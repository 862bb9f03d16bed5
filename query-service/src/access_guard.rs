//! Access Guard
//!
//! 决定某个用户能否查询某个数据源，并维护授权关系。
//! ADMIN 拥有全部数据源的访问权；ANALYST 仅能访问显式授权的数据源。

use std::sync::Arc;

use common::errors::{AppError, AppResult};
use common::models::{ConnectionItem, DataSourceId, GrantEntry, UserAccount, UserId};
use common::store::{ConfigStore, GrantStore, UserStore};

pub struct AccessGuard {
    users: Arc<dyn UserStore>,
    grants: Arc<dyn GrantStore>,
    configs: Arc<dyn ConfigStore>,
}

impl AccessGuard {
    pub fn new(
        users: Arc<dyn UserStore>,
        grants: Arc<dyn GrantStore>,
        configs: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            users,
            grants,
            configs,
        }
    }

    async fn resolve_user(&self, user_id: UserId) -> AppResult<UserAccount> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))
    }

    /// 校验用户对数据源的访问权
    pub async fn authorize(&self, user_id: UserId, connection_id: DataSourceId) -> AppResult<()> {
        let user = self.resolve_user(user_id).await?;
        if user.is_admin() {
            return Ok(());
        }

        if self.grants.has_grant(user_id, connection_id).await? {
            Ok(())
        } else {
            tracing::warn!(user_id, connection_id, "Access denied");
            Err(AppError::AccessDenied(format!(
                "user does not have permission to access connection: {connection_id}"
            )))
        }
    }

    /// 管理端接口的角色校验
    pub async fn require_admin(&self, user_id: UserId) -> AppResult<UserAccount> {
        let user = self.resolve_user(user_id).await?;
        if !user.is_admin() {
            tracing::warn!(user_id, "Administration endpoint refused");
            return Err(AppError::AccessDenied("administrator role required".into()));
        }
        Ok(user)
    }

    /// 授权：用户与数据源都必须存在，重复授权返回冲突
    pub async fn grant(&self, user_id: UserId, connection_id: DataSourceId) -> AppResult<GrantEntry> {
        self.resolve_user(user_id).await?;
        self.configs.get_descriptor(connection_id).await?;

        let entry = self.grants.add_grant(user_id, connection_id).await?;
        tracing::info!(user_id, connection_id, "Permission granted");
        Ok(entry)
    }

    pub async fn revoke(&self, user_id: UserId, connection_id: DataSourceId) -> AppResult<()> {
        self.grants.remove_grant(user_id, connection_id).await?;
        tracing::info!(user_id, connection_id, "Permission revoked");
        Ok(())
    }

    pub async fn grants_for_user(&self, user_id: UserId) -> AppResult<Vec<GrantEntry>> {
        self.grants.list_by_user(user_id).await
    }

    pub async fn grants_for_data_source(
        &self,
        connection_id: DataSourceId,
    ) -> AppResult<Vec<GrantEntry>> {
        self.grants.list_by_data_source(connection_id).await
    }

    /// 用户可见的数据源：ADMIN 为全部，ANALYST 为已授权的部分
    pub async fn accessible_data_sources(&self, user_id: UserId) -> AppResult<Vec<ConnectionItem>> {
        let user = self.resolve_user(user_id).await?;
        if user.is_admin() {
            let all = self.configs.list_descriptors().await?;
            return Ok(all.into_iter().map(ConnectionItem::from).collect());
        }

        let mut items = Vec::new();
        for entry in self.grants.list_by_user(user_id).await? {
            match self.configs.get_descriptor(entry.connection_id).await {
                Ok(descriptor) => items.push(ConnectionItem::from(descriptor)),
                // 授权指向已删除的数据源时跳过
                Err(e) if e.is_not_found() => {
                    tracing::warn!(user_id, connection_id = entry.connection_id, "Grant points to a missing connection");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }
}
