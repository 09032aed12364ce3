//! Schema provider boundary
//!
//! Host-framework coupling (live model registries, database catalogs) stays
//! behind this trait; the rest of the workspace only ever sees a `SchemaGraph`.

use crate::schema::{SchemaError, SchemaGraph};

/// Builds a schema snapshot for the given scope identifiers
pub trait SchemaProvider: Send + Sync {
    /// Build the graph. An empty scope list means "every scope".
    fn build_schema(&self, scopes: &[String]) -> Result<SchemaGraph, SchemaError>;
}

/// Provider over a precomputed graph
pub struct StaticSchemaProvider {
    graph: SchemaGraph,
}

impl StaticSchemaProvider {
    pub fn new(graph: SchemaGraph) -> Self {
        Self { graph }
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn build_schema(&self, scopes: &[String]) -> Result<SchemaGraph, SchemaError> {
        Ok(self.graph.restrict_to(scopes))
    }
}
