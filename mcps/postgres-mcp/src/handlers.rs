//! Request handlers
//!
//! Each handler runs one catalog or executor operation and shapes the
//! outcome into the MCP response type.

use mcp_common::{json_success, text_error, CallToolResult, McpResult};
use rmcp::model::{
    AnnotateAble, ListResourcesResult, RawResource, ReadResourceResult, ResourceContents,
};

use crate::context::AppContext;
use crate::executor::run_read_only_query;
use crate::params::QueryParams;

pub async fn list_resources(ctx: &AppContext) -> McpResult<ListResourcesResult> {
    let descriptors = ctx.catalog().list_resources(ctx.provider()).await?;

    let resources = descriptors
        .into_iter()
        .map(|d| {
            let mut resource = RawResource::new(d.uri, d.name);
            resource.mime_type = Some(d.mime_type.to_string());
            resource.no_annotation()
        })
        .collect();

    Ok(ListResourcesResult::with_all_items(resources))
}

pub async fn read_resource(ctx: &AppContext, uri: &str) -> McpResult<ReadResourceResult> {
    let doc = ctx.catalog().read_resource(ctx.provider(), uri).await?;

    let mut contents = ResourceContents::text(doc.text, doc.uri);
    if let ResourceContents::TextResourceContents { mime_type, .. } = &mut contents {
        *mime_type = Some(doc.mime_type.to_string());
    }

    Ok(ReadResourceResult {
        contents: vec![contents],
    })
}

/// Run the caller's SQL read-only
///
/// A statement the database rejects is reported as a tool error
/// (`isError: true`) carrying the database message. Pool and connection
/// failures become protocol errors.
pub async fn query(ctx: &AppContext, params: QueryParams) -> McpResult<CallToolResult> {
    match run_read_only_query(ctx.provider(), &params.sql).await {
        Ok(outcome) => {
            outcome.warnings.iter().for_each(|w| w.log());
            json_success(&outcome.rows)
        }
        Err(failure) => {
            failure.warnings.iter().for_each(|w| w.log());
            if failure.is_execution_error() {
                tracing::info!("Query failed: {}", failure.error);
                Ok(text_error(failure.error.to_string()))
            } else {
                tracing::error!("Query could not run: {}", failure.error);
                Err(failure.error.into())
            }
        }
    }
}
