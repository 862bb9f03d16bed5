//! Application error taxonomy.
//!
//! Every pipeline stage fails with one of these variants and the orchestrator
//! propagates it unchanged. The `IntoResponse` impl is the only place a variant
//! is turned into a status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::response::ApiResponse;

/// Result alias used across all crates.
pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced by the gateway.
///
/// Messages are shown to callers, so they must never carry candidate SQL or
/// credentials.
#[derive(Debug, Error)]
pub enum AppError {
    /// The user may not access the requested data source.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The caller identity is missing or malformed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// User id does not resolve.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Data source id does not resolve.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// No grant exists for the (user, data source) pair.
    #[error("permission not found: {0}")]
    GrantNotFound(String),

    /// A uniqueness constraint would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Candidate SQL is unsafe or cannot be parsed.
    #[error("SQL safety violation: {0}")]
    UnsafeSql(String),

    /// The text-completion call failed or returned an unusable response.
    #[error("SQL generation failed: {0}")]
    Generation(String),

    /// Catalog introspection failed on the driver side.
    #[error("schema extraction failed: {0}")]
    SchemaExtraction(String),

    /// Credential encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Driver failure while running an already-sanitized statement.
    #[error("query execution failed: {0}")]
    QueryExecution(String),

    /// A pool for the target database could not be established.
    #[error("database connection failed: {0}")]
    DatabaseConnection(String),

    /// Metadata store failure.
    #[error("database query failed: {0}")]
    DatabaseQuery(String),

    /// Request validation failed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Machine-readable error code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::AccessDenied(_) => "ACCESS_DENIED",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::UserNotFound(_)
            | AppError::ConnectionNotFound(_)
            | AppError::GrantNotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::UnsafeSql(_) => "SQL_SAFETY_VIOLATION",
            AppError::Generation(_) => "GENERATION_FAILED",
            AppError::SchemaExtraction(_) => "SCHEMA_EXTRACTION_FAILED",
            AppError::Crypto(_) => "CRYPTO_ERROR",
            AppError::QueryExecution(_) => "QUERY_EXECUTION_FAILED",
            AppError::DatabaseConnection(_) => "DATABASE_CONNECTION_FAILED",
            AppError::DatabaseQuery(_) => "DATABASE_QUERY_FAILED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::UserNotFound(_)
            | AppError::ConnectionNotFound(_)
            | AppError::GrantNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UnsafeSql(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Generation(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SchemaExtraction(_)
            | AppError::Crypto(_)
            | AppError::QueryExecution(_)
            | AppError::DatabaseQuery(_)
            | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this is one of the not-found variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::UserNotFound(_) | AppError::ConnectionNotFound(_) | AppError::GrantNotFound(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::warn!(code = self.code(), error = %self, "request rejected");
        }

        let body = ApiResponse::err(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}
