use lens_ir::{
    AggregationStep, ColumnRef, ExplicitJoin, FilterClause, FilterOperator, FilterStep, GroupStep,
    JoinKind, JoinStep, LimitStep, Literal, OrderStep, OrderTarget, OutputColumn, OutputSource, PlanSource, PlanStep,
    QueryPlan, QuerySpecification, RelationHop, ResolvedPath, SelectionStep, SortKey, ROOT_ALIAS,
};
use lens_registry::{Registry, RegistryError};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Field '{0}' is neither grouped nor aggregated; add it to group_by or remove it")]
    UngroupedField(String),

    #[error("Cannot order by '{0}': it must be a group_by path, an alias or a selected field")]
    UnorderableKey(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub struct Compiler<'a> {
    registry: &'a Registry,
    max_limit: u32,
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a Registry, max_limit: u32) -> Self {
        Self {
            registry,
            max_limit: max_limit.max(1),
        }
    }

    pub fn compile(&self, spec: &QuerySpecification) -> Result<QueryPlan, CompileError> {
        let grouped = spec.is_aggregating() || !spec.group_by.is_empty();
        if grouped {
            if let Some(field) = spec
                .fields
                .iter()
                .find(|f| !spec.group_by.iter().any(|g| g.path == f.path.path))
            {
                return Err(CompileError::UngroupedField(field.output_name()));
            }
        }

        let mut joins = JoinBuilder::new(&spec.joins, &spec.filters);
        for join in &spec.joins {
            joins.register(&join.hops, &join.path.segments().join("."));
        }

        let mut columns: Vec<OutputColumn> = spec
            .fields
            .iter()
            .map(|field| OutputColumn {
                name: field.output_name(),
                source: OutputSource::Column {
                    column: joins.column(&field.path),
                },
                kind: field.path.kind(),
            })
            .collect();
        for key in spec.implied_group_keys() {
            columns.push(OutputColumn {
                name: key.path.to_string(),
                source: OutputSource::Column {
                    column: joins.column(key),
                },
                kind: key.kind(),
            });
        }

        let filters: Vec<FilterStep> = spec
            .filters
            .iter()
            .map(|filter| filter_step(&mut joins, filter))
            .collect();

        let aggregations = spec
            .aggregations
            .iter()
            .map(|agg| {
                let signature = self.registry.lookup_function(agg.function, agg.path.kind())?;
                Ok(AggregationStep {
                    function: agg.function,
                    column: joins.column(&agg.path),
                    alias: agg.alias.clone(),
                    kind: signature.result_kind(agg.path.kind()),
                    filter: agg.filter.as_ref().map(|f| filter_step(&mut joins, f)),
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        let group_keys: Vec<ColumnRef> = spec.group_by.iter().map(|g| joins.column(g)).collect();

        columns.extend(aggregations.iter().map(|agg| OutputColumn {
            name: agg.alias.clone(),
            source: OutputSource::Aggregate {
                alias: agg.alias.clone(),
            },
            kind: agg.kind,
        }));

        let mut sort_keys = Vec::with_capacity(spec.order_by.len());
        for key in &spec.order_by {
            let output = match &key.target {
                OrderTarget::Alias(alias) => columns
                    .iter()
                    .find(|c| &c.name == alias)
                    .map(|c| c.name.clone())
                    .ok_or_else(|| CompileError::UnorderableKey(alias.clone()))?,
                OrderTarget::Path(path) => {
                    if let Some(field) = spec.fields.iter().find(|f| f.path.path == path.path) {
                        field.output_name()
                    } else if spec.group_by.iter().any(|g| g.path == path.path) {
                        path.path.to_string()
                    } else {
                        return Err(CompileError::UnorderableKey(path.path.to_string()));
                    }
                }
            };
            sort_keys.push(SortKey {
                output,
                direction: key.direction,
            });
        }

        let mut steps: Vec<PlanStep> = joins.into_steps().into_iter().map(PlanStep::Join).collect();
        steps.extend(filters.into_iter().map(PlanStep::Filter));
        if !group_keys.is_empty() {
            steps.push(PlanStep::Group(GroupStep { keys: group_keys }));
        }
        steps.extend(aggregations.into_iter().map(PlanStep::Aggregate));
        steps.push(PlanStep::Select(SelectionStep { columns }));
        if !sort_keys.is_empty() {
            steps.push(PlanStep::Order(OrderStep { keys: sort_keys }));
        }
        if let Some(limit) = spec.limit {
            steps.push(PlanStep::Limit(LimitStep {
                limit: limit.clamp(1, self.max_limit),
            }));
        }

        let plan = QueryPlan {
            root: PlanSource {
                entity: spec.root_entity.clone(),
                table: spec.root_table.clone(),
                alias: ROOT_ALIAS.to_string(),
            },
            schema_version: spec.schema_version.clone(),
            steps,
        };
        debug!(
            root = %plan.root.entity,
            steps = plan.steps.len(),
            joins = plan.joins().count(),
            "Compiled query plan"
        );
        Ok(plan)
    }
}

fn filter_step(joins: &mut JoinBuilder, filter: &FilterClause) -> FilterStep {
    FilterStep {
        column: joins.column(&filter.path),
        kind: filter.path.kind(),
        operator: filter.operator,
        value: filter.value.clone(),
    }
}

/// Assigns one join alias per distinct relation chain, in first-use order
struct JoinBuilder {
    explicit: Vec<(String, JoinKind)>,
    /// Chains an `is-null: true` filter reaches through
    null_checked: HashSet<String>,
    aliases: HashMap<String, String>,
    steps: Vec<JoinStep>,
}

impl JoinBuilder {
    fn new(explicit: &[ExplicitJoin], filters: &[FilterClause]) -> Self {
        let null_checked = filters
            .iter()
            .filter(|f| {
                f.operator == FilterOperator::IsNull && matches!(f.value, Literal::Boolean(true))
            })
            .flat_map(|f| (1..=f.path.hops.len()).map(move |n| f.path.relation_prefix(n).to_string()))
            .collect();
        Self {
            explicit: explicit
                .iter()
                .map(|j| (j.path.segments().join("."), j.kind))
                .collect(),
            null_checked,
            aliases: HashMap::new(),
            steps: Vec::new(),
        }
    }

    /// Join every hop of `hops` and return the alias of the last source
    fn register(&mut self, hops: &[RelationHop], path: &str) -> String {
        let segments: Vec<&str> = path.split('.').collect();
        let mut parent = ROOT_ALIAS.to_string();

        for (idx, hop) in hops.iter().enumerate() {
            let chain = segments[..=idx].join(".");
            if let Some(alias) = self.aliases.get(&chain) {
                parent = alias.clone();
                continue;
            }
            let alias = format!("j{}", self.steps.len());
            self.steps.push(JoinStep {
                alias: alias.clone(),
                parent: parent.clone(),
                path: chain.clone(),
                relation: hop.relation.clone(),
                target_entity: hop.to_entity.clone(),
                target_table: hop.to_table.clone(),
                local_key: hop.local_key.clone(),
                remote_key: hop.remote_key.clone(),
                cardinality: hop.cardinality,
                kind: self.kind_for(&chain),
            });
            self.aliases.insert(chain, alias.clone());
            parent = alias;
        }
        parent
    }

    fn column(&mut self, path: &ResolvedPath) -> ColumnRef {
        let source = self.register(&path.hops, &path.path.to_string());
        ColumnRef::new(source, path.field.name.clone())
    }

    /// Explicit joins covering `chain` decide its kind. Otherwise a chain
    /// checked for null must keep unmatched rows, and the rest join inner.
    fn kind_for(&self, chain: &str) -> JoinKind {
        let explicit = self
            .explicit
            .iter()
            .find(|(path, _)| path == chain || path.starts_with(&format!("{}.", chain)))
            .map(|(_, kind)| *kind);
        match explicit {
            Some(kind) => kind,
            None if self.null_checked.contains(chain) => JoinKind::Left,
            None => JoinKind::Inner,
        }
    }

    fn into_steps(self) -> Vec<JoinStep> {
        self.steps
    }
}
