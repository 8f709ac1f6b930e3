//! Connection provider
//!
//! Hands out one pooled connection per logical operation. The connection
//! goes back to the pool when the [`PooledSession`] guard is dropped, so it
//! is released exactly once on every exit path.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{
    Manager, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::config::PoolSettings;
use crate::rows::row_to_json;
use crate::types::{DbError, JsonRow, PgMcpError};

/// Clears session state that outlives a rolled back transaction
///
/// Advisory locks, prepared statements, open cursors, `LISTEN` registrations
/// and session settings all survive `ROLLBACK`.
pub const RESET_SESSION: &str =
    "SELECT pg_advisory_unlock_all(); CLOSE ALL; DEALLOCATE ALL; RESET ALL; UNLISTEN *";

/// Run on every checkout. The leading `ROLLBACK` ends a transaction left
/// open by a call that was dropped before it could roll back itself.
fn recycling_method() -> RecyclingMethod {
    RecyclingMethod::Custom(format!("ROLLBACK; {};", RESET_SESSION))
}

/// A single checked-out database connection
#[async_trait]
pub trait DbSession: Send {
    /// Run one statement and return its rows as JSON objects
    async fn query_rows(&mut self, sql: &str, params: &[&str]) -> Result<Vec<JsonRow>, DbError>;

    /// Run one or more statements that return no rows
    async fn execute_batch(&mut self, sql: &str) -> Result<(), DbError>;
}

/// Source of database sessions
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Wait for a free connection
    async fn acquire(&self) -> Result<PooledSession, PgMcpError>;
}

/// A session on loan from a provider
///
/// Dropping the guard returns the connection.
pub struct PooledSession {
    inner: Box<dyn DbSession>,
}

impl PooledSession {
    pub fn new(inner: Box<dyn DbSession>) -> Self {
        tracing::debug!("Connection acquired");
        Self { inner }
    }
}

impl Deref for PooledSession {
    type Target = dyn DbSession;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        tracing::debug!("Connection released");
    }
}

// ============================================================================
// deadpool-postgres implementation
// ============================================================================

/// Pool of PostgreSQL connections
#[derive(Clone)]
pub struct PgPoolProvider {
    pool: Pool,
}

impl PgPoolProvider {
    /// Build a pool from a connection string
    ///
    /// No connection is opened until the first acquire.
    pub fn new(database_url: &str, settings: &PoolSettings) -> Result<Self, PgMcpError> {
        settings.validate()?;

        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e| PgMcpError::Config(format!("Invalid database URL: {}", e)))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: recycling_method(),
            },
        );

        let pool = Pool::builder(manager)
            .max_size(settings.max_size)
            .runtime(Runtime::Tokio1)
            .wait_timeout(settings.wait_timeout_secs.map(Duration::from_secs))
            .build()
            .map_err(|e| PgMcpError::Config(format!("Failed to build connection pool: {}", e)))?;

        tracing::info!(max_size = settings.max_size, "Connection pool ready");

        Ok(Self { pool })
    }
}

#[async_trait]
impl ConnectionProvider for PgPoolProvider {
    async fn acquire(&self) -> Result<PooledSession, PgMcpError> {
        let client = self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(kind) => {
                PgMcpError::PoolExhausted(format!("timed out waiting for a connection ({:?})", kind))
            }
            PoolError::Backend(err) => PgMcpError::Connection(DbError::from(err).to_string()),
            other => PgMcpError::Connection(other.to_string()),
        })?;

        Ok(PooledSession::new(Box::new(PgSession { client })))
    }
}

struct PgSession {
    client: Object,
}

#[async_trait]
impl DbSession for PgSession {
    async fn query_rows(&mut self, sql: &str, params: &[&str]) -> Result<Vec<JsonRow>, DbError> {
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = self.client.query(sql, &params).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory provider that records every statement and every checkout

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Scripted reply for one `query_rows` call
    pub type Reply = Result<Vec<JsonRow>, DbError>;

    #[derive(Default)]
    pub struct FakeState {
        pub statements: Mutex<Vec<(String, Vec<String>)>>,
        pub replies: Mutex<VecDeque<Reply>>,
        /// Batch statements that should fail, matched by prefix
        pub failing_batches: Mutex<Vec<String>>,
        pub acquired: AtomicUsize,
        pub released: AtomicUsize,
        pub refuse_acquire: Mutex<Option<PgMcpError>>,
    }

    #[derive(Clone, Default)]
    pub struct FakeProvider {
        pub state: Arc<FakeState>,
    }

    impl FakeProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(&self, reply: Reply) -> &Self {
            self.state.replies.lock().unwrap().push_back(reply);
            self
        }

        pub fn fail_batch(&self, prefix: &str) -> &Self {
            self.state.failing_batches.lock().unwrap().push(prefix.to_string());
            self
        }

        pub fn refuse_acquire(&self, err: PgMcpError) {
            *self.state.refuse_acquire.lock().unwrap() = Some(err);
        }

        pub fn statements(&self) -> Vec<String> {
            self.state
                .statements
                .lock()
                .unwrap()
                .iter()
                .map(|(sql, _)| sql.clone())
                .collect()
        }

        pub fn params(&self) -> Vec<Vec<String>> {
            self.state
                .statements
                .lock()
                .unwrap()
                .iter()
                .map(|(_, params)| params.clone())
                .collect()
        }

        pub fn acquired(&self) -> usize {
            self.state.acquired.load(Ordering::SeqCst)
        }

        pub fn released(&self) -> usize {
            self.state.released.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectionProvider for FakeProvider {
        async fn acquire(&self) -> Result<PooledSession, PgMcpError> {
            if let Some(err) = self.state.refuse_acquire.lock().unwrap().take() {
                return Err(err);
            }
            self.state.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(PooledSession::new(Box::new(FakeSession {
                state: self.state.clone(),
            })))
        }
    }

    struct FakeSession {
        state: Arc<FakeState>,
    }

    impl FakeSession {
        fn record(&self, sql: &str, params: &[&str]) {
            self.state.statements.lock().unwrap().push((
                sql.to_string(),
                params.iter().map(|p| p.to_string()).collect(),
            ));
        }
    }

    #[async_trait]
    impl DbSession for FakeSession {
        async fn query_rows(&mut self, sql: &str, params: &[&str]) -> Result<Vec<JsonRow>, DbError> {
            self.record(sql, params);
            self.state
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
            self.record(sql, &[]);
            let failing = self.state.failing_batches.lock().unwrap();
            match failing.iter().find(|prefix| sql.starts_with(prefix.as_str())) {
                Some(_) => Err(DbError(format!("ERROR: {} failed", sql))),
                None => Ok(()),
            }
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.state.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Build a JSON row from column/value pairs
    pub fn row(pairs: &[(&str, serde_json::Value)]) -> JsonRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let provider = FakeProvider::new();
        {
            let mut session = provider.acquire().await.unwrap();
            session.execute_batch("SELECT 1").await.unwrap();
            assert_eq!(provider.released(), 0);
        }
        assert_eq!(provider.acquired(), 1);
        assert_eq!(provider.released(), 1);
    }

    #[tokio::test]
    async fn test_refused_acquire_hands_out_nothing() {
        let provider = FakeProvider::new();
        provider.refuse_acquire(PgMcpError::PoolExhausted("timed out".into()));
        let result = provider.acquire().await;
        assert!(matches!(result, Err(PgMcpError::PoolExhausted(_))));
        assert_eq!(provider.acquired(), 0);
        assert_eq!(provider.released(), 0);
    }

    #[test]
    fn test_pool_builds_without_connecting() {
        let settings = PoolSettings::default();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        assert!(PgPoolProvider::new("postgres://app@127.0.0.1:1/shop", &settings).is_ok());
    }

    #[test]
    fn test_pool_rejects_zero_size() {
        let settings = PoolSettings {
            max_size: 0,
            wait_timeout_secs: None,
        };
        let err = PgPoolProvider::new("postgres://app@127.0.0.1:1/shop", &settings)
            .err()
            .unwrap();
        assert!(matches!(err, PgMcpError::Config(ref m) if m.contains("max_size")));
    }

    #[test]
    fn test_checkout_rolls_back_and_resets_session() {
        match recycling_method() {
            RecyclingMethod::Custom(sql) => {
                assert!(sql.starts_with("ROLLBACK;"));
                assert!(sql.contains("pg_advisory_unlock_all()"));
                assert!(sql.contains("DEALLOCATE ALL"));
                assert!(sql.contains("RESET ALL"));
            }
            _ => panic!("expected custom recycling"),
        }
    }

    #[test]
    fn test_pool_rejects_garbage_url() {
        let settings = PoolSettings::default();
        let err = PgPoolProvider::new("postgres://app@host:notaport/db", &settings)
            .err()
            .unwrap();
        assert!(matches!(err, PgMcpError::Config(_)));
    }
}
