//! Resource addresses
//!
//! Every listed resource names one database object and one aspect of it:
//!
//! ```text
//! postgres://user@host:5432/app/<object-name>/<aspect>
//! ```
//!
//! The base is the connection URL with the scheme normalized to `postgres`
//! and the password, query string and fragment removed. The object name is
//! percent-encoded as a single path segment, so names containing `/` still
//! parse back to the same value.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::types::PgMcpError;

/// Kind of database object a resource points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Table,
    Procedure,
}

/// The facet of an object a resource exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaAspect {
    /// Column names and types of a table
    TableSchema,
    /// Ordered parameter list of a procedure
    ProcedureParameters,
    /// Full definition text of a procedure
    ProcedureBody,
}

impl SchemaAspect {
    pub const ALL: [SchemaAspect; 3] = [
        SchemaAspect::TableSchema,
        SchemaAspect::ProcedureParameters,
        SchemaAspect::ProcedureBody,
    ];

    /// Path segment used in addresses
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaAspect::TableSchema => "table_schema",
            SchemaAspect::ProcedureParameters => "procedure_parameters",
            SchemaAspect::ProcedureBody => "procedure_body",
        }
    }

    pub fn object_kind(self) -> ObjectKind {
        match self {
            SchemaAspect::TableSchema => ObjectKind::Table,
            SchemaAspect::ProcedureParameters | SchemaAspect::ProcedureBody => {
                ObjectKind::Procedure
            }
        }
    }

    /// Aspects listed for an object of the given kind, in listing order
    pub fn for_kind(kind: ObjectKind) -> &'static [SchemaAspect] {
        match kind {
            ObjectKind::Table => &[SchemaAspect::TableSchema],
            ObjectKind::Procedure => &[
                SchemaAspect::ProcedureParameters,
                SchemaAspect::ProcedureBody,
            ],
        }
    }
}

impl fmt::Display for SchemaAspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaAspect {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SchemaAspect::ALL
            .into_iter()
            .find(|aspect| aspect.as_str() == s)
            .ok_or(())
    }
}

/// Base URL all resource addresses hang off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBase(Url);

impl ResourceBase {
    /// Derive the base from a connection URL, dropping anything secret
    pub fn from_connection_url(database_url: &str) -> Result<Self, PgMcpError> {
        let mut url = Url::parse(database_url).map_err(|e| {
            // The input may hold a password, so it is left out of the message
            PgMcpError::Config(format!("Database URL is not a valid URL: {}", e))
        })?;

        match url.scheme() {
            "postgres" => {}
            "postgresql" => url.set_scheme("postgres").map_err(|_| {
                PgMcpError::Config("Could not normalize database URL scheme".into())
            })?,
            other => {
                return Err(PgMcpError::Config(format!(
                    "Unsupported database URL scheme '{}'",
                    other
                )))
            }
        }

        // Host-less (Unix socket) URLs cannot carry a password to strip
        if url.password().is_some() {
            url.set_password(None)
                .map_err(|_| PgMcpError::Config("Could not remove password from database URL".into()))?;
        }
        url.set_query(None);
        url.set_fragment(None);

        Ok(Self(url))
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for ResourceBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// One database object and one aspect of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    pub object_name: String,
    pub aspect: SchemaAspect,
}

impl ResourceAddress {
    pub fn new(object_name: impl Into<String>, aspect: SchemaAspect) -> Self {
        Self {
            object_name: object_name.into(),
            aspect,
        }
    }

    /// Render the address under `base`
    pub fn format(&self, base: &ResourceBase) -> String {
        let mut url = base.as_url().clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&self.object_name)
                .push(self.aspect.as_str());
        }
        url.into()
    }

    /// Parse an address back into object name and aspect
    ///
    /// Only the last two path segments are read; the base is not compared,
    /// so addresses minted before a host rename still resolve.
    pub fn parse(uri: &str) -> Result<Self, PgMcpError> {
        let invalid = || PgMcpError::InvalidResourceAddress(uri.to_string());

        let url = Url::parse(uri).map_err(|_| invalid())?;
        let mut segments = url.path_segments().ok_or_else(invalid)?.rev();

        let aspect = segments
            .next()
            .and_then(|s| s.parse::<SchemaAspect>().ok())
            .ok_or_else(invalid)?;

        let encoded_name = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let object_name = urlencoding::decode(encoded_name).map_err(|_| invalid())?;

        Ok(Self::new(object_name.into_owned(), aspect))
    }
}
