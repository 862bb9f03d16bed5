//! Data source models.
//!
//! Contains the stored descriptor of a target database and the request/response
//! shapes used to manage it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Identity of a configured data source.
pub type DataSourceId = i64;

/// Supported database engines. The set is closed; every dialect-specific
/// behaviour is a `match` on this enum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum Dialect {
    /// MySQL-compatible server.
    #[serde(rename = "MYSQL")]
    MySql,
    /// PostgreSQL-compatible server.
    #[serde(rename = "POSTGRESQL", alias = "POSTGRES")]
    PostgreSql,
    /// Embedded single-file database, served by the SQLite driver.
    #[serde(rename = "EMBEDDED", alias = "H2", alias = "SQLITE")]
    Embedded,
}

impl Dialect {
    /// Storage representation, stable across releases.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::MySql => "MYSQL",
            Dialect::PostgreSql => "POSTGRESQL",
            Dialect::Embedded => "EMBEDDED",
        }
    }

    /// Human-readable engine name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Dialect::MySql => "MySQL",
            Dialect::PostgreSql => "PostgreSQL",
            Dialect::Embedded => "SQLite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MYSQL" => Ok(Dialect::MySql),
            "POSTGRESQL" | "POSTGRES" => Ok(Dialect::PostgreSql),
            "EMBEDDED" | "H2" | "SQLITE" => Ok(Dialect::Embedded),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}

/// Stored configuration record for one target database.
///
/// Treated as an immutable value: a schema refresh produces a new descriptor
/// through [`DataSourceDescriptor::with_schema`] which the caller persists.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSourceDescriptor {
    pub id: DataSourceId,
    pub name: String,
    pub dialect: Dialect,
    pub url: String,
    pub username: String,
    /// Base64 of `IV || ciphertext`, see the credential cipher.
    pub encrypted_password: String,
    pub schema_ddl: Option<String>,
}

impl DataSourceDescriptor {
    /// Returns a copy carrying a freshly extracted schema.
    pub fn with_schema(&self, schema_ddl: impl Into<String>) -> Self {
        Self {
            schema_ddl: Some(schema_ddl.into()),
            ..self.clone()
        }
    }
}

/// Descriptor fields before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewDataSource {
    pub name: String,
    pub dialect: Dialect,
    pub url: String,
    pub username: String,
    pub encrypted_password: String,
    pub schema_ddl: Option<String>,
}

impl NewDataSource {
    /// Attaches the store-assigned id.
    pub fn into_descriptor(self, id: DataSourceId) -> DataSourceDescriptor {
        DataSourceDescriptor {
            id,
            name: self.name,
            dialect: self.dialect,
            url: self.url,
            username: self.username,
            encrypted_password: self.encrypted_password,
            schema_ddl: self.schema_ddl,
        }
    }
}

/// Request body for registering a new data source.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateConnectionRequest {
    /// Connection display name.
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    /// Database dialect.
    #[serde(rename = "type")]
    pub dialect: Dialect,
    /// Connection URL, e.g. `mysql://host:3306/shop` or `sqlite:data/app.db`.
    #[validate(length(min = 1, max = 1024, message = "URL is required"))]
    pub url: String,
    /// Database username.
    #[serde(default)]
    pub username: String,
    /// Database password (encrypted before it is stored).
    #[serde(default)]
    pub password: String,
}

/// Data source as returned by the API (never includes the credential).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionItem {
    pub id: DataSourceId,
    pub name: String,
    #[serde(rename = "type")]
    pub dialect: Dialect,
    pub url: String,
    pub username: String,
    /// Cached schema text given to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_ddl: Option<String>,
}

impl From<DataSourceDescriptor> for ConnectionItem {
    fn from(descriptor: DataSourceDescriptor) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.name,
            dialect: descriptor.dialect,
            url: descriptor.url,
            username: descriptor.username,
            schema_ddl: descriptor.schema_ddl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> DataSourceDescriptor {
        DataSourceDescriptor {
            id: 3,
            name: "shop".into(),
            dialect: Dialect::MySql,
            url: "mysql://localhost:3306/shop".into(),
            username: "reader".into(),
            encrypted_password: "c2VjcmV0".into(),
            schema_ddl: None,
        }
    }

    #[test]
    fn test_dialect_accepts_legacy_names() {
        let d: Dialect = serde_json::from_str("\"H2\"").unwrap();
        assert_eq!(d, Dialect::Embedded);
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::PostgreSql);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_with_schema_leaves_original_untouched() {
        let original = descriptor();
        let refreshed = original.with_schema("CREATE TABLE t (\n  id INT\n);");
        assert!(original.schema_ddl.is_none());
        assert_eq!(refreshed.id, original.id);
        assert!(refreshed.schema_ddl.unwrap().starts_with("CREATE TABLE t"));
    }

    #[test]
    fn test_item_hides_credential() {
        let json = serde_json::to_value(ConnectionItem::from(descriptor())).unwrap();
        assert!(json.get("encrypted_password").is_none());
        assert_eq!(json["type"], "MYSQL");
    }
}
