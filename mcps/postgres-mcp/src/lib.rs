//! Postgres MCP Library
//!
//! Exposes a PostgreSQL database to MCP clients:
//!
//! - every table and stored procedure is listed as a resource, one per aspect
//!   (table columns, procedure parameters, procedure definition)
//! - the `query` tool runs caller SQL inside a read-only transaction that is
//!   always rolled back
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use postgres_mcp::{AppContext, PgConfig, PostgresMcpServer};
//!
//! let ctx = AppContext::connect("postgres://app@localhost/shop", &PgConfig::default())?;
//! let server = PostgresMcpServer::new(ctx);
//! // Serve via stdio or call tools in-process through EmbeddableMcp
//! ```

pub mod address;
pub mod catalog;
pub mod config;
pub mod context;
pub mod executor;
pub mod handlers;
pub mod params;
pub mod provider;
pub mod rows;
pub mod server;
pub mod types;

// Re-export main server type
pub use server::PostgresMcpServer;

pub use config::{Cli, PgConfig};
pub use context::AppContext;

// Re-export parameter types for direct API usage
pub use params::*;
