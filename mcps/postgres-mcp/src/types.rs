//! Type definitions for Postgres MCP

use serde::Serialize;
use thiserror::Error;

use mcp_common::{internal_error, invalid_params, McpError};

/// MIME type attached to every resource and resource read
pub const JSON_MIME_TYPE: &str = "application/json";

/// A result row keyed by column name, in column order
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Response Types
// ============================================================================

/// One listed resource: an address plus a display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub mime_type: &'static str,
    pub name: String,
}

/// The body returned for a resource read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDocument {
    pub uri: String,
    pub mime_type: &'static str,
    pub text: String,
}

// ============================================================================
// Error Types
// ============================================================================

/// Failure reported by the database for a single statement
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DbError(pub String);

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        // Server-side errors carry severity, message, detail and hint
        match err.as_db_error() {
            Some(db) => DbError(db.to_string()),
            None => DbError(err.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum PgMcpError {
    #[error("Connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Invalid resource URI: {0}")]
    InvalidResourceAddress(String),

    #[error("Metadata query failed: {0}")]
    Metadata(DbError),

    #[error("{0}")]
    QueryExecution(DbError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PgMcpError> for McpError {
    fn from(err: PgMcpError) -> Self {
        match &err {
            PgMcpError::InvalidResourceAddress(_) => invalid_params(err.to_string()),
            PgMcpError::PoolExhausted(_)
            | PgMcpError::Connection(_)
            | PgMcpError::Metadata(_)
            | PgMcpError::QueryExecution(_)
            | PgMcpError::Config(_)
            | PgMcpError::Serialization(_) => internal_error(err.to_string()),
        }
    }
}

/// A rollback or session reset that did not go through
///
/// Never raised: it travels next to the primary result and is only logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackWarning {
    pub message: String,
}

impl RollbackWarning {
    pub fn log(&self) {
        tracing::warn!("Could not clean up after query: {}", self.message);
    }
}
