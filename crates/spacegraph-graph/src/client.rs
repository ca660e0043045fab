//! Neo4j connection management and shared graph client.

use std::time::Duration;

use neo4rs::{ConfigBuilder, Graph, Query};
use spacegraph_core::config::Neo4jSettings;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Statement rejected by the store: {0}")]
    Rejected(String),

    #[error("Graph operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GraphError {
    /// Whether this error means the store itself is unreachable, as opposed
    /// to a single statement failing.
    pub fn is_systemic(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Query(e) => matches!(
                e,
                neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError { .. }
            ),
            Self::Rejected(_) | Self::Timeout(_) | Self::Serialization(_) => false,
        }
    }
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub fetch_size: usize,
    pub connect_timeout: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self::from(&Neo4jSettings::default())
    }
}

impl From<&Neo4jSettings> for GraphConfig {
    fn from(settings: &Neo4jSettings) -> Self {
        Self {
            uri: settings.uri.clone(),
            user: settings.user.clone(),
            password: settings.password.clone(),
            database: settings.database.clone(),
            max_connections: settings.max_connections,
            fetch_size: settings.fetch_size,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
        }
    }
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j and verify the connection with a round trip.
    ///
    /// Both steps are bounded by `connect_timeout`; exceeding it is a
    /// connection error.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .db(config.database.as_str())
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = tokio::time::timeout(config.connect_timeout, Graph::connect(neo_config))
            .await
            .map_err(|_| {
                GraphError::Connection(format!(
                    "timed out after {:?} connecting to {}",
                    config.connect_timeout, config.uri
                ))
            })?
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let client = Self { graph };
        tokio::time::timeout(config.connect_timeout, client.ping())
            .await
            .map_err(|_| {
                GraphError::Connection(format!(
                    "connectivity check timed out after {:?}",
                    config.connect_timeout
                ))
            })??;

        tracing::info!(uri = %config.uri, database = %config.database, "Connected to Neo4j");
        Ok(client)
    }

    /// Round-trip a trivial statement; any failure is a connection error.
    pub async fn ping(&self) -> Result<(), GraphError> {
        match self.query_one(neo4rs::query("RETURN 1 AS ok")).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(GraphError::Connection(
                "connectivity check returned no rows".to_string(),
            )),
            Err(e) => Err(GraphError::Connection(e.to_string())),
        }
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Execute a write-only statement (CREATE, MERGE, DELETE, SET, schema DDL).
    pub async fn run(&self, query: Query) -> Result<(), GraphError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    /// Execute a query returning a single integer column; no row counts as zero.
    pub(crate) async fn query_count(&self, query: Query, column: &str) -> Result<u64, GraphError> {
        match self.query_one(query).await? {
            Some(row) => Ok(count_column(&row, column)?),
            None => Ok(0),
        }
    }
}

// ── Row helpers ──────────────────────────────────────────────────

/// Read a required string column.
pub(crate) fn text(row: &neo4rs::Row, column: &str) -> Result<String, GraphError> {
    row.get::<String>(column)
        .map_err(|e| GraphError::Serialization(format!("column {column}: {e}")))
}

/// Read a string column where the empty string (the query's `coalesce` default) means absent.
pub(crate) fn opt_text(row: &neo4rs::Row, column: &str) -> Result<Option<String>, GraphError> {
    let value = text(row, column)?;
    Ok(if value.is_empty() { None } else { Some(value) })
}

pub(crate) fn count_column(row: &neo4rs::Row, column: &str) -> Result<u64, GraphError> {
    let value = row
        .get::<i64>(column)
        .map_err(|e| GraphError::Serialization(format!("column {column}: {e}")))?;
    Ok(value.max(0) as u64)
}
