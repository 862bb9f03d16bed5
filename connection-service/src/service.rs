//! 数据源管理服务模块

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use validator::Validate;

use common::errors::{AppError, AppResult};
use common::models::{ConnectionItem, CreateConnectionRequest, DataSourceId, NewDataSource};
use common::store::{ConfigStore, GrantStore};

use crate::crypto::CredentialCipher;
use crate::pool_manager::{self, PoolManager};
use crate::schema_extractor::SchemaExtractor;

/// 数据源管理 Trait
#[async_trait]
pub trait ConnectionServiceTrait: Send + Sync {
    /// 列出所有数据源
    async fn list(&self) -> AppResult<Vec<ConnectionItem>>;

    /// 创建数据源（测试连通性并提取 Schema 后保存）
    async fn create(&self, req: CreateConnectionRequest) -> AppResult<ConnectionItem>;

    /// 根据 ID 获取数据源
    async fn get(&self, id: DataSourceId) -> AppResult<ConnectionItem>;

    /// 删除数据源及其授权
    async fn delete(&self, id: DataSourceId) -> AppResult<()>;

    /// 重新提取并保存 Schema
    async fn refresh_schema(&self, id: DataSourceId) -> AppResult<ConnectionItem>;

    /// 测试连接，返回延迟
    async fn test(&self, id: DataSourceId) -> AppResult<Duration>;
}

/// 数据源管理服务
pub struct ConnectionService {
    store: Arc<dyn ConfigStore>,
    grants: Arc<dyn GrantStore>,
    pool_manager: Arc<PoolManager>,
    cipher: CredentialCipher,
}

impl ConnectionService {
    /// 创建新的服务实例
    pub fn new(
        store: Arc<dyn ConfigStore>,
        grants: Arc<dyn GrantStore>,
        pool_manager: Arc<PoolManager>,
        cipher: CredentialCipher,
    ) -> Self {
        Self {
            store,
            grants,
            pool_manager,
            cipher,
        }
    }

    pub fn pool_manager(&self) -> &Arc<PoolManager> {
        &self.pool_manager
    }
}

#[async_trait]
impl ConnectionServiceTrait for ConnectionService {
    async fn list(&self) -> AppResult<Vec<ConnectionItem>> {
        Ok(self
            .store
            .list_descriptors()
            .await?
            .into_iter()
            .map(ConnectionItem::from)
            .collect())
    }

    async fn create(&self, req: CreateConnectionRequest) -> AppResult<ConnectionItem> {
        req.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        tracing::info!(name = %req.name, dialect = %req.dialect, "创建数据源");

        // 临时连接池：测试连通性并提取 Schema，结束后关闭
        let pool = self
            .pool_manager
            .new_transient_pool(&req.url, &req.username, &req.password, req.dialect)
            .await?;
        let probed = async {
            pool_manager::ping(&pool).await?;
            SchemaExtractor::extract(&pool, req.dialect, &req.url).await
        }
        .await;
        pool_manager::close(pool).await;
        let schema_ddl = probed?;

        let encrypted_password = self.cipher.encrypt(&req.password)?;
        let descriptor = self
            .store
            .insert_descriptor(NewDataSource {
                name: req.name,
                dialect: req.dialect,
                url: req.url,
                username: req.username,
                encrypted_password,
                schema_ddl: Some(schema_ddl),
            })
            .await?;

        tracing::info!(connection_id = descriptor.id, name = %descriptor.name, "数据源已创建");
        Ok(ConnectionItem::from(descriptor))
    }

    async fn get(&self, id: DataSourceId) -> AppResult<ConnectionItem> {
        self.store.get_descriptor(id).await.map(ConnectionItem::from)
    }

    async fn delete(&self, id: DataSourceId) -> AppResult<()> {
        // 先确认存在
        self.store.get_descriptor(id).await?;

        let removed = self.grants.remove_by_data_source(id).await?;
        self.store.delete_descriptor(id).await?;
        // 描述删除后再回收，之后的请求无法再为该 ID 建池
        self.pool_manager.evict(id).await;

        tracing::info!(connection_id = id, grants_removed = removed, "数据源已删除");
        Ok(())
    }

    async fn refresh_schema(&self, id: DataSourceId) -> AppResult<ConnectionItem> {
        let descriptor = self.store.get_descriptor(id).await?;
        let pool = self.pool_manager.get_pool(id).await?;
        let ddl = SchemaExtractor::extract(&pool, descriptor.dialect, &descriptor.url).await?;

        let saved = self.store.save_descriptor(descriptor.with_schema(ddl)).await?;
        tracing::info!(connection_id = id, "Schema 已刷新");
        Ok(ConnectionItem::from(saved))
    }

    async fn test(&self, id: DataSourceId) -> AppResult<Duration> {
        let pool = self.pool_manager.get_pool(id).await?;
        let latency = pool_manager::ping(&pool).await?;
        tracing::debug!(connection_id = id, latency_ms = latency.as_millis() as u64, "连接测试成功");
        Ok(latency)
    }
}
