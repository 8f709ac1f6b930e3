//! Parameter types for Postgres MCP tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryParams {
    #[schemars(description = "SQL statement to run inside a read-only transaction")]
    pub sql: String,
}
