//! MySQL-backed metadata store.
//!
//! Persists data-source descriptors, grants and users in the metadata
//! database named by `DATABASE_URL`. Tables are created on startup.

use async_trait::async_trait;
use sqlx::MySqlPool;

use common::errors::{AppError, AppResult};
use common::models::{
    DataSourceDescriptor, DataSourceId, Dialect, GrantEntry, NewDataSource, UserAccount, UserId,
    UserRole,
};
use common::store::{ConfigStore, GrantStore, UserStore};

/// Row from the `data_sources` table.
#[derive(sqlx::FromRow)]
struct DataSourceRow {
    id: i64,
    name: String,
    db_type: String,
    url: String,
    username: Option<String>,
    encrypted_password: Option<String>,
    schema_ddl: Option<String>,
}

impl DataSourceRow {
    fn into_descriptor(self) -> AppResult<DataSourceDescriptor> {
        let dialect: Dialect = self
            .db_type
            .parse()
            .map_err(|e: String| AppError::DatabaseQuery(format!("data source {}: {e}", self.id)))?;
        Ok(DataSourceDescriptor {
            id: self.id,
            name: self.name,
            dialect,
            url: self.url,
            username: self.username.unwrap_or_default(),
            encrypted_password: self.encrypted_password.unwrap_or_default(),
            schema_ddl: self.schema_ddl,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    role: String,
}

const SELECT_DATA_SOURCE: &str = "SELECT `id`, `name`, `db_type`, `url`, `username`, \
     `encrypted_password`, `schema_ddl` FROM `data_sources`";

fn meta_err(action: &str) -> impl Fn(sqlx::Error) -> AppError + '_ {
    move |e| AppError::DatabaseQuery(format!("Failed to {action}: {e}"))
}

pub struct MySqlMetaStore {
    pool: MySqlPool,
}

impl MySqlMetaStore {
    /// Wraps the metadata pool and ensures the tables exist.
    pub async fn new(pool: MySqlPool) -> AppResult<Self> {
        let store = Self { pool };
        store.ensure_tables().await?;
        Ok(store)
    }

    async fn ensure_tables(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS `data_sources` (
                `id`                 BIGINT        NOT NULL AUTO_INCREMENT,
                `name`               VARCHAR(100)  NOT NULL,
                `db_type`            VARCHAR(32)   NOT NULL,
                `url`                VARCHAR(1024) NOT NULL,
                `username`           VARCHAR(128)  DEFAULT NULL,
                `encrypted_password` VARCHAR(1024) DEFAULT NULL,
                `schema_ddl`         MEDIUMTEXT    DEFAULT NULL,
                `created_at`         DATETIME      NOT NULL DEFAULT CURRENT_TIMESTAMP,
                `updated_at`         DATETIME      NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                PRIMARY KEY (`id`),
                KEY `idx_db_type` (`db_type`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        )
        .execute(&self.pool)
        .await
        .map_err(meta_err("create data_sources table"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS `users` (
                `id`         BIGINT       NOT NULL AUTO_INCREMENT,
                `username`   VARCHAR(64)  NOT NULL,
                `role`       VARCHAR(16)  NOT NULL,
                `created_at` DATETIME     NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (`id`),
                UNIQUE KEY `uk_username` (`username`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        )
        .execute(&self.pool)
        .await
        .map_err(meta_err("create users table"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS `user_permissions` (
                `user_id`       BIGINT   NOT NULL,
                `connection_id` BIGINT   NOT NULL,
                `created_at`    DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (`user_id`, `connection_id`),
                KEY `idx_connection_id` (`connection_id`)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        )
        .execute(&self.pool)
        .await
        .map_err(meta_err("create user_permissions table"))?;

        tracing::info!("Metadata tables ensured");
        Ok(())
    }

    /// Inserts the user when the username is not taken yet; returns the stored
    /// account either way.
    pub async fn ensure_user(&self, username: &str, role: UserRole) -> AppResult<UserAccount> {
        sqlx::query("INSERT IGNORE INTO `users` (`username`, `role`) VALUES (?, ?)")
            .bind(username)
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(meta_err("save user"))?;

        let row = sqlx::query_as::<_, UserRow>(
            "SELECT `id`, `username`, `role` FROM `users` WHERE `username` = ?",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(meta_err("load user"))?;
        user_from_row(row)
    }
}

fn user_from_row(row: UserRow) -> AppResult<UserAccount> {
    let role = row
        .role
        .parse()
        .map_err(|e: String| AppError::DatabaseQuery(format!("user {}: {e}", row.id)))?;
    Ok(UserAccount {
        id: row.id,
        username: row.username,
        role,
    })
}

#[async_trait]
impl ConfigStore for MySqlMetaStore {
    async fn get_descriptor(&self, id: DataSourceId) -> AppResult<DataSourceDescriptor> {
        sqlx::query_as::<_, DataSourceRow>(&format!("{SELECT_DATA_SOURCE} WHERE `id` = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(meta_err("load data source"))?
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))?
            .into_descriptor()
    }

    async fn insert_descriptor(&self, new: NewDataSource) -> AppResult<DataSourceDescriptor> {
        let result = sqlx::query(
            "INSERT INTO `data_sources` (`name`, `db_type`, `url`, `username`, `encrypted_password`, `schema_ddl`)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.name)
        .bind(new.dialect.as_str())
        .bind(&new.url)
        .bind(&new.username)
        .bind(&new.encrypted_password)
        .bind(&new.schema_ddl)
        .execute(&self.pool)
        .await
        .map_err(meta_err("save data source"))?;

        Ok(new.into_descriptor(result.last_insert_id() as DataSourceId))
    }

    async fn save_descriptor(
        &self,
        descriptor: DataSourceDescriptor,
    ) -> AppResult<DataSourceDescriptor> {
        // Existence is checked separately: MySQL reports 0 affected rows for
        // an update that changes nothing.
        self.get_descriptor(descriptor.id).await?;

        sqlx::query(
            "UPDATE `data_sources` SET `name` = ?, `db_type` = ?, `url` = ?, `username` = ?,
                    `encrypted_password` = ?, `schema_ddl` = ?
             WHERE `id` = ?",
        )
        .bind(&descriptor.name)
        .bind(descriptor.dialect.as_str())
        .bind(&descriptor.url)
        .bind(&descriptor.username)
        .bind(&descriptor.encrypted_password)
        .bind(&descriptor.schema_ddl)
        .bind(descriptor.id)
        .execute(&self.pool)
        .await
        .map_err(meta_err("update data source"))?;

        Ok(descriptor)
    }

    async fn list_descriptors(&self) -> AppResult<Vec<DataSourceDescriptor>> {
        sqlx::query_as::<_, DataSourceRow>(&format!("{SELECT_DATA_SOURCE} ORDER BY `id`"))
            .fetch_all(&self.pool)
            .await
            .map_err(meta_err("list data sources"))?
            .into_iter()
            .map(DataSourceRow::into_descriptor)
            .collect()
    }

    async fn delete_descriptor(&self, id: DataSourceId) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM `data_sources` WHERE `id` = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(meta_err("delete data source"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::ConnectionNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl GrantStore for MySqlMetaStore {
    async fn has_grant(&self, user_id: UserId, connection_id: DataSourceId) -> AppResult<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM `user_permissions` WHERE `user_id` = ? AND `connection_id` = ?",
        )
        .bind(user_id)
        .bind(connection_id)
        .fetch_one(&self.pool)
        .await
        .map_err(meta_err("check permission"))?;
        Ok(row.0 > 0)
    }

    async fn list_by_user(&self, user_id: UserId) -> AppResult<Vec<GrantEntry>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT `user_id`, `connection_id` FROM `user_permissions`
             WHERE `user_id` = ? ORDER BY `connection_id`",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(meta_err("list permissions"))?;
        Ok(rows.into_iter().map(grant_from_pair).collect())
    }

    async fn list_by_data_source(
        &self,
        connection_id: DataSourceId,
    ) -> AppResult<Vec<GrantEntry>> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT `user_id`, `connection_id` FROM `user_permissions`
             WHERE `connection_id` = ? ORDER BY `user_id`",
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await
        .map_err(meta_err("list permissions"))?;
        Ok(rows.into_iter().map(grant_from_pair).collect())
    }

    async fn add_grant(
        &self,
        user_id: UserId,
        connection_id: DataSourceId,
    ) -> AppResult<GrantEntry> {
        let result = sqlx::query(
            "INSERT IGNORE INTO `user_permissions` (`user_id`, `connection_id`) VALUES (?, ?)",
        )
        .bind(user_id)
        .bind(connection_id)
        .execute(&self.pool)
        .await
        .map_err(meta_err("save permission"))?;

        if result.rows_affected() == 0 {
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
        let result = sqlx::query(
            "DELETE FROM `user_permissions` WHERE `user_id` = ? AND `connection_id` = ?",
        )
        .bind(user_id)
        .bind(connection_id)
        .execute(&self.pool)
        .await
        .map_err(meta_err("delete permission"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::GrantNotFound(format!(
                "user {user_id} on connection {connection_id}"
            )));
        }
        Ok(())
    }

    async fn remove_by_data_source(&self, connection_id: DataSourceId) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM `user_permissions` WHERE `connection_id` = ?")
            .bind(connection_id)
            .execute(&self.pool)
            .await
            .map_err(meta_err("delete permissions"))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserStore for MySqlMetaStore {
    async fn find_user(&self, id: UserId) -> AppResult<Option<UserAccount>> {
        sqlx::query_as::<_, UserRow>("SELECT `id`, `username`, `role` FROM `users` WHERE `id` = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(meta_err("load user"))?
            .map(user_from_row)
            .transpose()
    }
}

fn grant_from_pair((user_id, connection_id): (i64, i64)) -> GrantEntry {
    GrantEntry {
        user_id,
        connection_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(db_type: &str) -> DataSourceRow {
        DataSourceRow {
            id: 8,
            name: "warehouse".into(),
            db_type: db_type.into(),
            url: "jdbc:h2:file:./data/warehouse".into(),
            username: None,
            encrypted_password: None,
            schema_ddl: None,
        }
    }

    #[test]
    fn test_row_maps_legacy_type_and_null_columns() {
        let descriptor = row("H2").into_descriptor().unwrap();
        assert_eq!(descriptor.dialect, Dialect::Embedded);
        assert_eq!(descriptor.username, "");
        assert_eq!(descriptor.encrypted_password, "");
        assert!(descriptor.schema_ddl.is_none());
    }

    #[test]
    fn test_unknown_type_is_a_store_error() {
        let err = row("ORACLE").into_descriptor().unwrap_err();
        assert!(matches!(err, AppError::DatabaseQuery(ref m) if m.contains("data source 8")));
    }

    #[test]
    fn test_user_row_roles() {
        let admin = user_from_row(UserRow {
            id: 1,
            username: "root".into(),
            role: "ADMIN".into(),
        })
        .unwrap();
        assert!(admin.is_admin());

        let bad = user_from_row(UserRow {
            id: 2,
            username: "ghost".into(),
            role: "OWNER".into(),
        });
        assert!(matches!(bad, Err(AppError::DatabaseQuery(_))));
    }

    #[test]
    fn test_grant_pair_order() {
        assert_eq!(
            grant_from_pair((3, 9)),
            GrantEntry {
                user_id: 3,
                connection_id: 9
            }
        );
    }
}
