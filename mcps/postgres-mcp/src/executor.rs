//! Read-only query execution
//!
//! Every query runs in its own read-only transaction that is always rolled
//! back, whether the statement succeeded or not. Nothing on this path is
//! ever committed, and session state the statement left behind is cleared
//! before the connection goes back to the pool.

use crate::provider::{ConnectionProvider, PooledSession, RESET_SESSION};
use crate::types::{JsonRow, PgMcpError, RollbackWarning};

const BEGIN_READ_ONLY: &str = "BEGIN TRANSACTION READ ONLY";
const ROLLBACK: &str = "ROLLBACK";

/// Rows produced by a successful query
#[derive(Debug)]
pub struct QueryOutcome {
    pub rows: Vec<JsonRow>,
    /// Advisory only, never changes the result
    pub warnings: Vec<RollbackWarning>,
}

/// A query that did not produce rows
#[derive(Debug)]
pub struct QueryFailure {
    pub error: PgMcpError,
    pub warnings: Vec<RollbackWarning>,
}

impl From<PgMcpError> for QueryFailure {
    fn from(error: PgMcpError) -> Self {
        Self {
            error,
            warnings: Vec::new(),
        }
    }
}

impl QueryFailure {
    /// The caller's statement was rejected by the database
    pub fn is_execution_error(&self) -> bool {
        matches!(self.error, PgMcpError::QueryExecution(_))
    }
}

/// Run `sql` verbatim inside a read-only transaction
///
/// The connection is released before this returns on every path.
pub async fn run_read_only_query(
    provider: &dyn ConnectionProvider,
    sql: &str,
) -> Result<QueryOutcome, QueryFailure> {
    let mut session = provider.acquire().await?;

    session
        .execute_batch(BEGIN_READ_ONLY)
        .await
        .map_err(|e| PgMcpError::Connection(format!("Failed to open transaction: {}", e)))?;

    tracing::debug!(sql, "Executing read-only query");
    let result = session.query_rows(sql, &[]).await;

    let mut warnings = Vec::new();
    for statement in [ROLLBACK, RESET_SESSION] {
        warnings.extend(cleanup(&mut session, statement).await);
    }
    drop(session);

    match result {
        Ok(rows) => {
            tracing::debug!(rows = rows.len(), "Query completed");
            Ok(QueryOutcome { rows, warnings })
        }
        Err(e) => Err(QueryFailure {
            error: PgMcpError::QueryExecution(e),
            warnings,
        }),
    }
}

/// Run one cleanup statement; a failure is only a warning
async fn cleanup(session: &mut PooledSession, statement: &str) -> Option<RollbackWarning> {
    match session.execute_batch(statement).await {
        Ok(()) => None,
        Err(e) => Some(RollbackWarning { message: e.0 }),
    }
}
