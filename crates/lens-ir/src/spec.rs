//! Validated query specification
//!
//! Values of these types only come out of the validator: every path is already
//! resolved against one schema snapshot and every literal is already coerced.

use serde::{Deserialize, Serialize};

use crate::literal::Literal;
use crate::schema::{FieldPath, RelationHop, ResolvedPath};
use crate::types::{AggregateFunction, ChartType, FilterOperator, JoinKind, SortDirection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpecification {
    pub root_entity: String,
    pub root_table: String,
    /// Fingerprint of the schema snapshot this was validated against
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<ExplicitJoin>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<OutputField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterClause>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<ResolvedPath>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderKey>,
    /// Already clamped to `[1, max_limit]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartSpec>,
}

impl QuerySpecification {
    pub fn is_aggregating(&self) -> bool {
        !self.aggregations.is_empty()
    }

    /// Some aggregates cross a "many" relation while others do not. The
    /// join repeats root rows, so the root-level aggregates are inflated.
    pub fn mixes_fanout_aggregates(&self) -> bool {
        let fanned = self
            .aggregations
            .iter()
            .filter(|a| a.path.first_fanout().is_some())
            .count();
        fanned > 0 && fanned < self.aggregations.len()
    }

    /// Grouping keys that no field selects. They are still output, named by their path.
    pub fn implied_group_keys(&self) -> impl Iterator<Item = &ResolvedPath> {
        self.group_by
            .iter()
            .filter(move |g| !self.fields.iter().any(|f| f.path.path == g.path))
    }

    /// Output names in plan order: fields, implied group keys, then aggregations
    pub fn output_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(OutputField::output_name)
            .chain(self.implied_group_keys().map(|g| g.path.to_string()))
            .chain(self.aggregations.iter().map(|a| a.alias.clone()))
            .collect()
    }
}

/// A relation chain the caller asked to join explicitly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitJoin {
    pub path: FieldPath,
    pub hops: Vec<RelationHop>,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputField {
    pub path: ResolvedPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl OutputField {
    /// The alias if given, the dotted path otherwise
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.path.path.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    pub path: ResolvedPath,
    pub operator: FilterOperator,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub function: AggregateFunction,
    pub path: ResolvedPath,
    pub alias: String,
    /// Restricts only this aggregate (`AGG(x) FILTER (WHERE ...)`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterClause>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum OrderTarget {
    /// An alias declared in `fields` or `aggregations`
    Alias(String),
    Path(ResolvedPath),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub target: OrderTarget,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_field: Option<String>,
}
