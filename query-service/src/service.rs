//! Query Orchestrator
//!
//! 一次自然语言查询的完整流程：
//! 权限校验 → 读取数据源配置与连接池 → 生成 SQL → 安全校验 → 执行。
//! 任一步骤失败立即返回，错误类型原样向上传递。

use std::sync::Arc;
use std::time::Instant;

use ai_service::SqlGenerator;
use common::errors::{AppError, AppResult};
use common::models::{DataSourceDescriptor, DataSourceId, QueryOutcome, UserId};
use common::store::ConfigStore;
use common::utils::SqlSanitizer;
use connection_service::pool_manager;
use connection_service::{PoolHandle, PoolManager, SchemaExtractor};

use crate::access_guard::AccessGuard;

pub struct QueryService {
    guard: Arc<AccessGuard>,
    store: Arc<dyn ConfigStore>,
    generator: Arc<SqlGenerator>,
    pool_manager: Arc<PoolManager>,
}

impl QueryService {
    pub fn new(
        guard: Arc<AccessGuard>,
        store: Arc<dyn ConfigStore>,
        generator: Arc<SqlGenerator>,
        pool_manager: Arc<PoolManager>,
    ) -> Self {
        Self {
            guard,
            store,
            generator,
            pool_manager,
        }
    }

    /// 执行一次自然语言查询
    pub async fn run(
        &self,
        user_id: UserId,
        connection_id: DataSourceId,
        question: &str,
    ) -> AppResult<QueryOutcome> {
        let started = Instant::now();

        self.guard.authorize(user_id, connection_id).await?;

        let descriptor = self.store.get_descriptor(connection_id).await?;
        let pool = self.pool_manager.get_pool(connection_id).await?;
        let descriptor = self.with_cached_schema(descriptor, &pool).await?;

        let candidate = self.generator.generate(question, &descriptor).await?;

        let sql = SqlSanitizer::for_dialect(descriptor.dialect).sanitize(&candidate)?;
        tracing::info!(user_id, connection_id, sql = %sql, "Executing sanitized SQL");

        let rows = pool_manager::execute(&pool, &sql).await?;

        let outcome = QueryOutcome::passed(sql, rows);
        tracing::info!(
            user_id,
            connection_id,
            rows = outcome.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query completed"
        );
        Ok(outcome)
    }

    /// 数据源尚无 Schema 缓存时提取一次并保存。
    /// 仅提取失败可忽略，模型会收到占位 Schema；其余错误原样返回。
    async fn with_cached_schema(
        &self,
        descriptor: DataSourceDescriptor,
        pool: &PoolHandle,
    ) -> AppResult<DataSourceDescriptor> {
        if descriptor.schema_ddl.is_some() {
            return Ok(descriptor);
        }

        match SchemaExtractor::extract(pool, descriptor.dialect, &descriptor.url).await {
            Ok(ddl) => {
                let refreshed = self.store.save_descriptor(descriptor.with_schema(ddl)).await?;
                tracing::info!(connection_id = refreshed.id, "Schema cached on first query");
                Ok(refreshed)
            }
            Err(AppError::SchemaExtraction(reason)) => {
                tracing::warn!(connection_id = descriptor.id, error = %reason, "Schema extraction skipped");
                Ok(descriptor)
            }
            Err(e) => Err(e),
        }
    }
}
