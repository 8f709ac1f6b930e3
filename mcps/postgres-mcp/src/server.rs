//! MCP Server implementation for PostgreSQL
//!
//! Resources describe tables and procedures. The single `query` tool runs
//! read-only SQL. Handler implementations are in the handlers module.

use std::future::Future;

use mcp_common::{
    async_trait, CallToolResult, EmbeddableError, EmbeddableMcp, EmbeddableResult, McpError,
    Tool,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        ListResourcesResult, PaginatedRequestParam, ReadResourceRequestParam,
        ReadResourceResult, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router, RoleServer,
};
use serde_json::Value;

use crate::context::AppContext;
use crate::handlers;
use crate::params::QueryParams;

pub const SERVER_NAME: &str = "postgres-mcp";

/// The Postgres MCP Server
#[derive(Clone)]
pub struct PostgresMcpServer {
    ctx: AppContext,
    tool_router: ToolRouter<Self>,
}

// ============================================================================
// Tool Router
// ============================================================================

#[tool_router]
impl PostgresMcpServer {
    /// Create a server around an already built context
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    #[tool(description = "Run a read-only SQL query")]
    async fn query(
        &self,
        Parameters(params): Parameters<QueryParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::query(&self.ctx, params).await
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for PostgresMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "PostgreSQL MCP server. Resources describe table columns, procedure \
                 parameters and procedure definitions. The query tool runs SQL inside a \
                 read-only transaction that is always rolled back."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        handlers::list_resources(&self.ctx)
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move { handlers::read_resource(&self.ctx, &request.uri).await }
    }
}

// ============================================================================
// In-process embedding
// ============================================================================

#[async_trait]
impl EmbeddableMcp for PostgresMcpServer {
    fn server_name(&self) -> &str {
        SERVER_NAME
    }

    fn list_tools(&self) -> Vec<Tool> {
        self.tool_router.list_all()
    }

    async fn call_tool(&self, name: &str, params: Value) -> EmbeddableResult<CallToolResult> {
        match name {
            "query" => {
                let params: QueryParams = serde_json::from_value(params)
                    .map_err(|e| EmbeddableError::InvalidParams(e.to_string()))?;
                Ok(handlers::query(&self.ctx, params).await?)
            }
            other => Err(EmbeddableError::ToolNotFound(other.to_string())),
        }
    }
}
