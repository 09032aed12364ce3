//! Schema graph introspection from a DuckDB catalog
//!
//! Every table becomes an entity in the namespace of its schema. Single
//! column foreign keys become a pair of relations: a "one" relation on the
//! referencing table named after the column without its `_id` suffix, and a
//! "many" relation `<table>_set` on the referenced table.

use duckdb::{Connection, Result as DuckResult};
use lens_ir::{
    EntityType, FieldSpec, RelationSpec, ScalarKind, SchemaError, SchemaGraph, SchemaProvider,
};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, warn};

pub struct DuckDbCatalog {
    conn: Mutex<Connection>,
}

struct ColumnRow {
    schema: String,
    table: String,
    column: String,
    data_type: String,
    nullable: bool,
}

struct ForeignKey {
    schema: String,
    table: String,
    column: String,
    referenced_table: String,
    referenced_column: String,
}

impl DuckDbCatalog {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn read_columns(conn: &Connection) -> DuckResult<Vec<ColumnRow>> {
        let mut stmt = conn.prepare(
            "SELECT table_schema, table_name, column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema NOT IN ('information_schema', 'pg_catalog') \
             ORDER BY table_schema, table_name, ordinal_position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ColumnRow {
                    schema: row.get(0)?,
                    table: row.get(1)?,
                    column: row.get(2)?,
                    data_type: row.get(3)?,
                    nullable: row.get::<_, String>(4)? == "YES",
                })
            })?
            .collect::<DuckResult<Vec<_>>>()?;
        Ok(rows)
    }

    fn read_foreign_keys(conn: &Connection) -> DuckResult<Vec<ForeignKey>> {
        let mut stmt = conn.prepare(
            "SELECT schema_name, table_name, constraint_column_names[1], \
                    referenced_table, referenced_column_names[1] \
             FROM duckdb_constraints() \
             WHERE constraint_type = 'FOREIGN KEY' AND len(constraint_column_names) = 1 \
             ORDER BY schema_name, table_name, constraint_index",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ForeignKey {
                    schema: row.get(0)?,
                    table: row.get(1)?,
                    column: row.get(2)?,
                    referenced_table: row.get(3)?,
                    referenced_column: row.get(4)?,
                })
            })?
            .collect::<DuckResult<Vec<_>>>()?;
        Ok(rows)
    }
}

impl SchemaProvider for DuckDbCatalog {
    fn build_schema(&self, scopes: &[String]) -> Result<SchemaGraph, SchemaError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SchemaError::Provider("catalog connection poisoned".to_string()))?;
        let columns = Self::read_columns(&conn).map_err(|e| SchemaError::Provider(e.to_string()))?;
        let foreign_keys =
            Self::read_foreign_keys(&conn).map_err(|e| SchemaError::Provider(e.to_string()))?;
        drop(conn);

        let mut entities: Vec<EntityType> = Vec::new();
        for col in columns {
            let Some((kind, choices)) = map_type(&col.data_type) else {
                debug!(table = %col.table, column = %col.column, data_type = %col.data_type, "Skipping unsupported column");
                continue;
            };
            let name = entity_name(&col.schema, &col.table);
            let slot = match entities.iter().position(|e| e.name == name) {
                Some(slot) => slot,
                None => {
                    entities.push(
                        EntityType::new(name.clone())
                            .in_namespace(col.schema.clone())
                            .with_table(table_ref(&col.schema, &col.table)),
                    );
                    entities.len() - 1
                }
            };
            let mut field = FieldSpec::new(col.column, kind).with_choices(choices);
            field.nullable = col.nullable;
            entities[slot].fields.push(field);
        }

        let mut seen = HashSet::new();
        for fk in foreign_keys {
            if !seen.insert((fk.schema.clone(), fk.table.clone(), fk.column.clone())) {
                continue;
            }
            let source = entity_name(&fk.schema, &fk.table);
            // duckdb_constraints() reports the referenced table unqualified
            let target = entity_name(&fk.schema, &fk.referenced_table);
            let (Some(src), Some(dst)) = (
                entities.iter().position(|e| e.name == source),
                entities.iter().position(|e| e.name == target),
            ) else {
                warn!(table = %fk.table, column = %fk.column, "Foreign key to an unknown table");
                continue;
            };

            let forward = unique_member(
                &entities[src],
                fk.column.strip_suffix("_id").filter(|s| !s.is_empty()).unwrap_or(&fk.column),
                &format!("{}_rel", fk.column),
            );
            entities[src].relations.push(RelationSpec::one(
                forward,
                target.clone(),
                fk.column.clone(),
                fk.referenced_column.clone(),
            ));

            let reverse = unique_member(
                &entities[dst],
                &format!("{}_set", fk.table),
                &format!("{}_{}_set", fk.table, fk.column),
            );
            entities[dst].relations.push(RelationSpec::many(
                reverse,
                source,
                fk.referenced_column,
                fk.column,
            ));
        }

        let graph = SchemaGraph::new(entities)?.restrict_to(scopes);
        debug!(entities = graph.entities().len(), "Built schema graph from DuckDB catalog");
        Ok(graph)
    }
}

/// Tables in `main` keep their bare name
fn entity_name(schema: &str, table: &str) -> String {
    if schema == "main" {
        table.to_string()
    } else {
        format!("{}_{}", schema, table)
    }
}

fn table_ref(schema: &str, table: &str) -> String {
    if schema == "main" {
        table.to_string()
    } else {
        format!("{}.{}", schema, table)
    }
}

fn unique_member(entity: &EntityType, preferred: &str, fallback: &str) -> String {
    let taken: HashSet<&str> = entity
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .chain(entity.relations.iter().map(|r| r.name.as_str()))
        .collect();
    if !taken.contains(preferred) {
        return preferred.to_string();
    }
    let mut candidate = fallback.to_string();
    let mut n = 2;
    while taken.contains(candidate.as_str()) {
        candidate = format!("{}{}", fallback, n);
        n += 1;
    }
    candidate
}

/// Map a DuckDB type name to a scalar kind; `None` for types a query cannot use
pub fn map_type(data_type: &str) -> Option<(ScalarKind, Vec<String>)> {
    let upper = data_type.trim().to_ascii_uppercase();
    if upper.starts_with("ENUM(") {
        return Some((ScalarKind::Choice, enum_values(data_type)));
    }
    if upper.starts_with("DECIMAL") || upper.starts_with("NUMERIC") {
        return Some((ScalarKind::Decimal, Vec::new()));
    }
    let kind = match upper.as_str() {
        "BOOLEAN" | "BOOL" => ScalarKind::Boolean,
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "HUGEINT" | "UTINYINT"
        | "USMALLINT" | "UINTEGER" | "UBIGINT" => ScalarKind::Integer,
        "FLOAT" | "REAL" | "DOUBLE" => ScalarKind::Decimal,
        "VARCHAR" | "TEXT" | "STRING" | "UUID" => ScalarKind::Text,
        "DATE" => ScalarKind::Date,
        "TIMESTAMP" | "DATETIME" | "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => ScalarKind::DateTime,
        _ => return None,
    };
    Some((kind, Vec::new()))
}

/// `ENUM('a', 'b')` → `["a", "b"]`
fn enum_values(data_type: &str) -> Vec<String> {
    let inner = data_type
        .trim()
        .get(5..data_type.trim().len().saturating_sub(1))
        .unwrap_or("");
    inner
        .split(',')
        .map(|v| v.trim().trim_matches('\'').replace("''", "'"))
        .filter(|v| !v.is_empty())
        .collect()
}
