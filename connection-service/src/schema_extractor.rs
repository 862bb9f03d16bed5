//! Schema catalog extraction.
//!
//! Reads table and column metadata from the target database and renders it as
//! `CREATE TABLE` text, which is what the SQL generator hands to the model.

use common::errors::{AppError, AppResult};
use common::models::Dialect;

use crate::pool_manager::{strip_jdbc_prefix, DatabasePool, PoolHandle};

/// Returned when the catalog query yields no columns.
pub const NO_TABLES_SENTINEL: &str = "-- No tables found";

/// Schema that stands in for the embedded dialect's catalog name.
pub const EMBEDDED_SCHEMA: &str = "main";

const MYSQL_COLUMNS: &str = "SELECT CAST(TABLE_NAME AS CHAR) AS table_name,
        CAST(COLUMN_NAME AS CHAR) AS column_name,
        CAST(DATA_TYPE AS CHAR) AS data_type,
        CAST(IS_NULLABLE AS CHAR) AS is_nullable,
        CAST(COLUMN_KEY AS CHAR) AS column_key
 FROM information_schema.COLUMNS
 WHERE TABLE_SCHEMA = ?
 ORDER BY TABLE_NAME, ORDINAL_POSITION";

const POSTGRES_COLUMNS: &str = "SELECT c.table_name::text AS table_name,
        c.column_name::text AS column_name,
        c.data_type::text AS data_type,
        c.is_nullable::text AS is_nullable,
        CASE WHEN EXISTS (
            SELECT 1
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name
             AND tc.table_schema = kcu.table_schema
             AND tc.table_name = kcu.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_schema = c.table_schema
              AND tc.table_name = c.table_name
              AND kcu.column_name = c.column_name
        ) THEN 'PRI' ELSE '' END AS column_key
 FROM information_schema.columns c
 WHERE c.table_catalog = $1 AND c.table_schema = 'public'
 ORDER BY c.table_name, c.ordinal_position";

const SQLITE_COLUMNS: &str = "SELECT m.name AS table_name,
        p.name AS column_name,
        p.type AS data_type,
        CASE WHEN p.\"notnull\" = 1 THEN 'NO' ELSE 'YES' END AS is_nullable,
        CASE WHEN p.pk > 0 THEN 'PRI' ELSE '' END AS column_key
 FROM sqlite_master m
 JOIN pragma_table_info(m.name) p
 WHERE m.type = 'table' AND m.name NOT LIKE 'sqlite_%'
 ORDER BY m.name, p.cid";

/// One (table, column) row from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CatalogColumn {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    /// `YES` / `NO`, as the information schema reports it.
    pub is_nullable: String,
    /// `PRI` for primary-key columns.
    pub column_key: String,
}

impl CatalogColumn {
    fn not_null(&self) -> bool {
        self.is_nullable.eq_ignore_ascii_case("NO")
    }

    fn primary_key(&self) -> bool {
        self.column_key.eq_ignore_ascii_case("PRI")
    }
}

pub struct SchemaExtractor;

impl SchemaExtractor {
    /// Extracts the schema reachable through `pool` as DDL text.
    ///
    /// `url` supplies the catalog name for MySQL and PostgreSQL. An empty
    /// catalog yields [`NO_TABLES_SENTINEL`]; only driver failures are errors.
    pub async fn extract(pool: &PoolHandle, dialect: Dialect, url: &str) -> AppResult<String> {
        let catalog = match dialect {
            Dialect::MySql | Dialect::PostgreSql => database_name_from_url(url),
            Dialect::Embedded => EMBEDDED_SCHEMA.to_string(),
        };
        tracing::info!(dialect = %dialect, catalog = %catalog, "Extracting schema");

        let result = match pool.pool() {
            DatabasePool::MySql(p) => {
                sqlx::query_as::<_, CatalogColumn>(MYSQL_COLUMNS)
                    .bind(&catalog)
                    .fetch_all(p)
                    .await
            }
            DatabasePool::Postgres(p) => {
                sqlx::query_as::<_, CatalogColumn>(POSTGRES_COLUMNS)
                    .bind(&catalog)
                    .fetch_all(p)
                    .await
            }
            DatabasePool::Sqlite(p) => {
                sqlx::query_as::<_, CatalogColumn>(SQLITE_COLUMNS)
                    .fetch_all(p)
                    .await
            }
        };

        let columns =
            result.map_err(|e| AppError::SchemaExtraction(format!("catalog query failed: {e}")))?;
        tracing::debug!(columns = columns.len(), "Catalog rows fetched");
        Ok(render_ddl(&columns))
    }
}

/// Groups columns by table in first-seen order and renders one
/// `CREATE TABLE` block per table.
pub fn render_ddl(columns: &[CatalogColumn]) -> String {
    if columns.is_empty() {
        return NO_TABLES_SENTINEL.to_string();
    }

    let mut tables: Vec<(&str, Vec<String>)> = Vec::new();
    for column in columns {
        let mut line = format!("  {} {}", column.column_name, column.data_type);
        if column.not_null() {
            line.push_str(" NOT NULL");
        }
        if column.primary_key() {
            line.push_str(" PRIMARY KEY");
        }

        match tables.iter_mut().find(|(name, _)| *name == column.table_name) {
            Some((_, lines)) => lines.push(line),
            None => tables.push((column.table_name.as_str(), vec![line])),
        }
    }

    tables
        .iter()
        .map(|(name, lines)| format!("CREATE TABLE {name} (\n{}\n);", lines.join(",\n")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Last path segment of the connection URL, without the query string.
pub fn database_name_from_url(url: &str) -> String {
    let url = strip_jdbc_prefix(url);
    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(name) = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
        {
            return name.to_string();
        }
    }

    let tail = url.rsplit('/').next().unwrap_or_default();
    let name = tail.split('?').next().unwrap_or_default();
    if name.is_empty() {
        tracing::warn!("Could not determine database name from connection URL");
    }
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn col(table: &str, name: &str, ty: &str, nullable: &str, key: &str) -> CatalogColumn {
        CatalogColumn {
            table_name: table.into(),
            column_name: name.into(),
            data_type: ty.into(),
            is_nullable: nullable.into(),
            column_key: key.into(),
        }
    }

    #[test]
    fn test_render_groups_by_table_in_first_seen_order() {
        let columns = vec![
            col("users", "id", "bigint", "NO", "PRI"),
            col("orders", "id", "int", "NO", "PRI"),
            col("users", "email", "varchar", "YES", ""),
            col("orders", "total", "decimal", "NO", ""),
        ];
        let expected = "CREATE TABLE users (\n  id bigint NOT NULL PRIMARY KEY,\n  email varchar\n);\n\n\
                        CREATE TABLE orders (\n  id int NOT NULL PRIMARY KEY,\n  total decimal NOT NULL\n);";
        assert_eq!(render_ddl(&columns), expected);
    }

    #[test]
    fn test_render_empty_catalog() {
        assert_eq!(render_ddl(&[]), NO_TABLES_SENTINEL);
    }

    #[test]
    fn test_database_name_from_url() {
        assert_eq!(database_name_from_url("mysql://db:3306/shop"), "shop");
        assert_eq!(
            database_name_from_url("jdbc:postgresql://pg:5432/analytics?sslmode=require"),
            "analytics"
        );
        assert_eq!(database_name_from_url("postgres://pg/"), "");
    }
}
