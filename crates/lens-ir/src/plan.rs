//! Query plan - the storage-agnostic output of the compiler
//!
//! Steps are kept in execution order: joins, filters, grouping, aggregation,
//! selection, ordering, limiting. A plan is built per request and consumed by
//! exactly one executor call.

use serde::{Deserialize, Serialize};

use crate::literal::Literal;
use crate::types::{AggregateFunction, Cardinality, FilterOperator, JoinKind, ScalarKind, SortDirection};

/// Alias of the root entity inside a plan
pub const ROOT_ALIAS: &str = "t0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub root: PlanSource,
    pub schema_version: String,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSource {
    pub entity: String,
    pub table: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum PlanStep {
    Join(JoinStep),
    Filter(FilterStep),
    Group(GroupStep),
    Aggregate(AggregationStep),
    Select(SelectionStep),
    Order(OrderStep),
    Limit(LimitStep),
}

impl PlanStep {
    /// Position of this step kind in the fixed step order
    pub fn rank(&self) -> u8 {
        match self {
            PlanStep::Join(_) => 0,
            PlanStep::Filter(_) => 1,
            PlanStep::Group(_) => 2,
            PlanStep::Aggregate(_) => 3,
            PlanStep::Select(_) => 4,
            PlanStep::Order(_) => 5,
            PlanStep::Limit(_) => 6,
        }
    }
}

/// Column of a plan source (`t0` or a join alias)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub source: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(source: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStep {
    pub alias: String,
    /// Alias of the source this join hangs off
    pub parent: String,
    /// Relation chain from the root, e.g. `items.product`
    pub path: String,
    pub relation: String,
    pub target_entity: String,
    pub target_table: String,
    pub local_key: String,
    pub remote_key: String,
    pub cardinality: Cardinality,
    pub kind: JoinKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    pub column: ColumnRef,
    pub kind: ScalarKind,
    pub operator: FilterOperator,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStep {
    pub keys: Vec<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationStep {
    pub function: AggregateFunction,
    pub column: ColumnRef,
    pub alias: String,
    /// Kind of the aggregate's result
    pub kind: ScalarKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputSource {
    Column { column: ColumnRef },
    /// Refers to an `AggregationStep` by alias
    Aggregate { alias: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub name: String,
    pub source: OutputSource,
    pub kind: ScalarKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionStep {
    pub columns: Vec<OutputColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Output column name
    pub output: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStep {
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitStep {
    pub limit: u32,
}

impl QueryPlan {
    pub fn joins(&self) -> impl Iterator<Item = &JoinStep> {
        self.steps.iter().filter_map(|s| match s {
            PlanStep::Join(j) => Some(j),
            _ => None,
        })
    }

    pub fn filters(&self) -> impl Iterator<Item = &FilterStep> {
        self.steps.iter().filter_map(|s| match s {
            PlanStep::Filter(f) => Some(f),
            _ => None,
        })
    }

    pub fn group(&self) -> Option<&GroupStep> {
        self.steps.iter().find_map(|s| match s {
            PlanStep::Group(g) => Some(g),
            _ => None,
        })
    }

    pub fn aggregations(&self) -> impl Iterator<Item = &AggregationStep> {
        self.steps.iter().filter_map(|s| match s {
            PlanStep::Aggregate(a) => Some(a),
            _ => None,
        })
    }

    pub fn selection(&self) -> Option<&SelectionStep> {
        self.steps.iter().find_map(|s| match s {
            PlanStep::Select(sel) => Some(sel),
            _ => None,
        })
    }

    pub fn order(&self) -> Option<&OrderStep> {
        self.steps.iter().find_map(|s| match s {
            PlanStep::Order(o) => Some(o),
            _ => None,
        })
    }

    pub fn limit(&self) -> Option<u32> {
        self.steps.iter().find_map(|s| match s {
            PlanStep::Limit(l) => Some(l.limit),
            _ => None,
        })
    }

    /// Output columns in selection order
    pub fn output_columns(&self) -> &[OutputColumn] {
        self.selection().map(|s| s.columns.as_slice()).unwrap_or(&[])
    }
}
