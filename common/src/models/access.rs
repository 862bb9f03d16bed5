//! Users and grants.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::connection::DataSourceId;

/// Identity of an application user.
pub type UserId = i64;

/// Application roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    /// Unconditional access to every data source.
    Admin,
    /// Access only through explicit grants.
    Analyst,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Analyst => "ANALYST",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ADMIN" => Ok(UserRole::Admin),
            "ANALYST" => Ok(UserRole::Analyst),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// User as seen by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct UserAccount {
    pub id: UserId,
    pub username: String,
    pub role: UserRole,
}

impl UserAccount {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Explicit permission linking a user to a data source.
/// At most one entry exists per pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct GrantEntry {
    pub user_id: UserId,
    pub connection_id: DataSourceId,
}

/// Request body (or query string) naming a grant.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GrantRequest {
    #[validate(range(min = 1, message = "User ID is required"))]
    pub user_id: UserId,
    #[validate(range(min = 1, message = "Connection ID is required"))]
    pub connection_id: DataSourceId,
}
