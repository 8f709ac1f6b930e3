//! Process-wide state, built once at startup and shared by every request

use std::sync::Arc;

use crate::address::ResourceBase;
use crate::catalog::Catalog;
use crate::config::PgConfig;
use crate::provider::{ConnectionProvider, PgPoolProvider};
use crate::types::PgMcpError;

/// Connection provider plus resource catalog
#[derive(Clone)]
pub struct AppContext {
    provider: Arc<dyn ConnectionProvider>,
    catalog: Catalog,
}

impl AppContext {
    /// Build the pool and catalog for `database_url`
    pub fn connect(database_url: &str, config: &PgConfig) -> Result<Self, PgMcpError> {
        let base = ResourceBase::from_connection_url(database_url)?;
        let provider = PgPoolProvider::new(database_url, &config.pool)?;

        tracing::info!(base = %base, "Resource base configured");

        Ok(Self::new(
            Arc::new(provider),
            Catalog::new(base, config.resources.include_procedures),
        ))
    }

    /// Assemble a context from parts
    pub fn new(provider: Arc<dyn ConnectionProvider>, catalog: Catalog) -> Self {
        Self { provider, catalog }
    }

    pub fn provider(&self) -> &dyn ConnectionProvider {
        self.provider.as_ref()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}
