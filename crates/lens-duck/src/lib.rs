//! DuckDB executor for query plans

use duckdb::{params_from_iter, Connection, Result as DuckResult};
use lens_ir::QueryPlan;
use serde_json::{Map, Value};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

mod catalog;
pub mod sql;

pub use catalog::{map_type, DuckDbCatalog};
pub use sql::{render, CompiledQuery, QueryParam, RenderError};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("Plan rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Execution failed: {0}")]
    Failed(String),
}

pub struct DuckExecutor {
    conn: Connection,
}

impl DuckExecutor {
    pub fn new() -> DuckResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> DuckResult<Self> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Catalog over a second connection to the same database
    pub fn catalog(&self) -> DuckResult<DuckDbCatalog> {
        Ok(DuckDbCatalog::new(self.conn.try_clone()?))
    }

    /// Render `plan` to SQL and run it, one JSON object per row keyed by output name
    pub fn execute(&self, plan: &QueryPlan) -> Result<QueryResult, ExecutionError> {
        let query = render(plan)?;
        debug!(sql = %query.sql, params = query.params.len(), "Executing plan");

        let columns: Vec<String> = plan.output_columns().iter().map(|c| c.name.clone()).collect();
        let values: Vec<duckdb::types::Value> = query.params.iter().map(Into::into).collect();

        let mut stmt = self.conn.prepare(&query.sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;

        let mut result_rows = Vec::new();
        while let Some(row) = rows.next()? {
            let mut json_row = Map::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                json_row.insert(name.clone(), value_to_json(row, idx)?);
            }
            result_rows.push(json_row);
        }

        let row_count = result_rows.len();
        debug!(row_count, "Plan executed");

        Ok(QueryResult {
            columns,
            rows: result_rows,
            row_count,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
}

fn value_to_json(row: &duckdb::Row, idx: usize) -> DuckResult<Value> {
    use duckdb::types::ValueRef;

    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i),
        ValueRef::SmallInt(i) => Value::from(i),
        ValueRef::Int(i) => Value::from(i),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::HugeInt(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        ValueRef::UTinyInt(i) => Value::from(i),
        ValueRef::USmallInt(i) => Value::from(i),
        ValueRef::UInt(i) => Value::from(i),
        ValueRef::UBigInt(i) => Value::from(i),
        ValueRef::Float(f) => float(f64::from(f)),
        ValueRef::Double(f) => float(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
        _ => Value::String("<unsupported>".to_string()),
    })
}

// NaN and infinities have no JSON form
fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
