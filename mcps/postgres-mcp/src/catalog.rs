//! Resource catalog and router
//!
//! Lists tables and stored procedures as resources and answers a resource
//! read with the metadata query for its aspect.

use serde_json::Value;

use crate::address::{ObjectKind, ResourceAddress, ResourceBase, SchemaAspect};
use crate::provider::ConnectionProvider;
use crate::types::{JsonRow, PgMcpError, ResourceDescriptor, ResourceDocument, JSON_MIME_TYPE};

// ============================================================================
// Metadata Queries
// ============================================================================

const SELECT_TABLES: &str =
    "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public'";

const SELECT_PROCEDURES: &str =
    "SELECT routine_name FROM information_schema.routines WHERE routine_type = 'PROCEDURE'";

const SELECT_TABLE_COLUMNS: &str = "SELECT column_name, data_type \
     FROM information_schema.columns \
     WHERE table_schema = 'public' AND table_name::text = $1 \
     ORDER BY ordinal_position";

const SELECT_PROCEDURE_PARAMETERS: &str = "SELECT r.specific_name, p.parameter_name, p.parameter_mode, p.data_type \
     FROM information_schema.routines r \
     LEFT JOIN information_schema.parameters p \
       ON r.specific_schema = p.specific_schema AND r.specific_name = p.specific_name \
     WHERE r.routine_name::text = $1 AND r.routine_type = 'PROCEDURE' \
     ORDER BY r.specific_schema, r.specific_name, p.ordinal_position";

const SELECT_PROCEDURE_BODY: &str = "SELECT n.nspname AS schema_name, pg_get_functiondef(p.oid) AS definition \
     FROM pg_catalog.pg_proc p \
     JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace \
     WHERE p.proname = $1 AND p.prokind = 'p' \
     ORDER BY n.nspname, p.oid";

/// One addressable object/aspect pair found in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub object_name: String,
    pub object_kind: ObjectKind,
    pub aspect: SchemaAspect,
}

impl CatalogEntry {
    fn display_name(&self) -> String {
        match self.aspect {
            SchemaAspect::TableSchema => format!("\"{}\" database schema", self.object_name),
            SchemaAspect::ProcedureParameters => {
                format!("\"{}\" procedure parameters", self.object_name)
            }
            SchemaAspect::ProcedureBody => format!("\"{}\" procedure definition", self.object_name),
        }
    }
}

/// Maps database objects to resource addresses and back
#[derive(Debug, Clone)]
pub struct Catalog {
    base: ResourceBase,
    include_procedures: bool,
}

impl Catalog {
    pub fn new(base: ResourceBase, include_procedures: bool) -> Self {
        Self {
            base,
            include_procedures,
        }
    }

    pub fn base(&self) -> &ResourceBase {
        &self.base
    }

    /// Enumerate every table and procedure aspect
    ///
    /// Tables come first, then procedures, each in the order the database
    /// returns them.
    pub async fn entries(
        &self,
        provider: &dyn ConnectionProvider,
    ) -> Result<Vec<CatalogEntry>, PgMcpError> {
        let mut session = provider.acquire().await?;

        let tables = session
            .query_rows(SELECT_TABLES, &[])
            .await
            .map_err(PgMcpError::Metadata)?;

        let procedures = if self.include_procedures {
            session
                .query_rows(SELECT_PROCEDURES, &[])
                .await
                .map_err(PgMcpError::Metadata)?
        } else {
            Vec::new()
        };

        let tables = names(&tables, "table_name").map(|name| (name, ObjectKind::Table));
        let procedures =
            names(&procedures, "routine_name").map(|name| (name, ObjectKind::Procedure));

        Ok(tables
            .chain(procedures)
            .flat_map(|(name, kind)| {
                SchemaAspect::for_kind(kind).iter().map(move |&aspect| CatalogEntry {
                    object_name: name.clone(),
                    object_kind: kind,
                    aspect,
                })
            })
            .collect())
    }

    /// List every resource
    pub async fn list_resources(
        &self,
        provider: &dyn ConnectionProvider,
    ) -> Result<Vec<ResourceDescriptor>, PgMcpError> {
        let entries = self.entries(provider).await?;
        tracing::debug!(count = entries.len(), "Listed catalog resources");

        Ok(entries
            .into_iter()
            .map(|entry| ResourceDescriptor {
                uri: ResourceAddress::new(entry.object_name.clone(), entry.aspect)
                    .format(&self.base),
                mime_type: JSON_MIME_TYPE,
                name: entry.display_name(),
            })
            .collect())
    }

    /// Read one resource
    ///
    /// The address is validated before a connection is taken. An object
    /// name that matches nothing yields `[]`.
    pub async fn read_resource(
        &self,
        provider: &dyn ConnectionProvider,
        uri: &str,
    ) -> Result<ResourceDocument, PgMcpError> {
        let address = ResourceAddress::parse(uri)?;
        let rows = self.read_rows(provider, &address).await?;

        Ok(ResourceDocument {
            uri: uri.to_string(),
            mime_type: JSON_MIME_TYPE,
            text: serde_json::to_string_pretty(&rows)?,
        })
    }

    async fn read_rows(
        &self,
        provider: &dyn ConnectionProvider,
        address: &ResourceAddress,
    ) -> Result<Vec<JsonRow>, PgMcpError> {
        let sql = match address.aspect {
            SchemaAspect::TableSchema => SELECT_TABLE_COLUMNS,
            SchemaAspect::ProcedureParameters => SELECT_PROCEDURE_PARAMETERS,
            SchemaAspect::ProcedureBody => SELECT_PROCEDURE_BODY,
        };

        tracing::debug!(
            object = %address.object_name,
            aspect = %address.aspect,
            "Reading resource"
        );

        let mut session = provider.acquire().await?;
        let mut rows = session
            .query_rows(sql, &[address.object_name.as_str()])
            .await
            .map_err(PgMcpError::Metadata)?;

        if address.aspect == SchemaAspect::ProcedureParameters {
            // The outer join gives a procedure without parameters one row with no parameter data
            rows.retain(is_parameter_row);
        }

        Ok(rows)
    }
}

fn is_parameter_row(row: &JsonRow) -> bool {
    ["parameter_name", "parameter_mode", "data_type"]
        .iter()
        .any(|column| row.get(*column).is_some_and(|v| !v.is_null()))
}

fn names<'a>(rows: &'a [JsonRow], column: &'a str) -> impl Iterator<Item = String> + 'a {
    rows.iter().filter_map(move |row| match row.get(column) {
        Some(Value::String(name)) => Some(name.clone()),
        _ => None,
    })
}
