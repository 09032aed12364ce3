//! Validation of untrusted candidate specifications
//!
//! A candidate is checked section by section (root, joins, fields, filters,
//! aggregations, group-by, order-by, limit, aliases) and the first violation
//! is returned. Nothing is ever auto-corrected except the limit clamp.

use lens_ir::{
    Aggregation, Cardinality, ChartSpec, ChartType, EntityType, ExplicitJoin, FieldPath, FilterClause, JoinKind,
    OrderKey, OrderTarget, OutputField, QuerySpecification, ResolveError, ResolvedPath,
    SchemaGraph, SortDirection,
};
use lens_registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::coerce::coerce_literal;
use crate::error::{ValidationError, Violation};
use crate::parser::{check_alias, parse_path};
use crate::raw::{RawAggregation, RawField, RawFilter, RawJoin, RawOrder, RawSpecification};

/// What to do with a limit above the configured maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    #[default]
    Clamp,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorOptions {
    pub max_limit: u32,
    pub limit_policy: LimitPolicy,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            max_limit: 1000,
            limit_policy: LimitPolicy::Clamp,
        }
    }
}

/// Where a path is used; fan-out rules differ per section
#[derive(Debug, Clone, Copy)]
enum Usage {
    Field,
    Filter,
    Aggregate,
    GroupBy,
    OrderBy,
}

pub struct Validator<'a> {
    schema: &'a SchemaGraph,
    registry: &'a Registry,
    options: ValidatorOptions,
    schema_version: String,
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a SchemaGraph, registry: &'a Registry, options: ValidatorOptions) -> Self {
        Self {
            schema,
            registry,
            options,
            schema_version: schema.fingerprint(),
        }
    }

    pub fn options(&self) -> ValidatorOptions {
        self.options
    }

    /// Parse JSON text, then validate it
    pub fn validate_str(&self, text: &str) -> Result<QuerySpecification, ValidationError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ValidationError::malformed("$", format!("not valid JSON: {}", e)))?;
        self.validate(&value)
    }

    /// Validate a candidate document into a `QuerySpecification`
    pub fn validate(&self, candidate: &Value) -> Result<QuerySpecification, ValidationError> {
        if !candidate.is_object() {
            return Err(ValidationError::malformed(
                "$",
                "a query specification must be a JSON object",
            ));
        }
        let raw: RawSpecification = serde_json::from_value(candidate.clone())
            .map_err(|e| ValidationError::malformed("$", e.to_string()))?;

        let root = self.root(&raw.root_entity)?;

        let joins = raw
            .joins
            .iter()
            .enumerate()
            .map(|(idx, join)| self.join(root, join, &format!("joins[{}]", idx)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut group_by = raw
            .group_by
            .iter()
            .enumerate()
            .map(|(idx, text)| {
                let location = format!("group_by[{}]", idx);
                let path = self.path(text, &location)?;
                let resolved = self.resolve(root, &path, &location, text)?;
                self.check_fanout(&resolved, &joins, Usage::GroupBy, &location)?;
                Ok(resolved)
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;
        let mut seen = HashSet::new();
        group_by.retain(|g: &ResolvedPath| seen.insert(g.path.clone()));

        let nothing_selected = raw.fields.is_empty() && raw.aggregations.is_empty();
        let fields = if nothing_selected && !group_by.is_empty() {
            // Nothing selected but a grouping: the grouping keys
            group_by
                .iter()
                .map(|path| OutputField { path: path.clone(), alias: None })
                .collect()
        } else if nothing_selected {
            // Nothing selected: every scalar field of the root entity
            root.fields
                .iter()
                .map(|f| {
                    self.resolve(root, &FieldPath::new(vec![f.name.clone()]), "fields", f.name.as_str())
                        .map(|path| OutputField { path, alias: None })
                })
                .collect::<Result<Vec<_>, _>>()?
        } else {
            raw.fields
                .iter()
                .enumerate()
                .map(|(idx, field)| self.field(root, field, &joins, &format!("fields[{}]", idx)))
                .collect::<Result<Vec<_>, _>>()?
        };

        let filters = raw
            .filters
            .iter()
            .enumerate()
            .map(|(idx, filter)| {
                self.filter(root, filter, &joins, Usage::Filter, &format!("filters[{}]", idx))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let aggregations = raw
            .aggregations
            .iter()
            .enumerate()
            .map(|(idx, agg)| self.aggregation(root, agg, &joins, &format!("aggregations[{}]", idx)))
            .collect::<Result<Vec<_>, _>>()?;

        let aliases: HashSet<&str> = raw
            .fields
            .iter()
            .filter_map(|f| match f {
                RawField::Aliased(entry) => entry.alias.as_deref(),
                RawField::Path(_) => None,
            })
            .chain(raw.aggregations.iter().map(|a| a.alias.as_str()))
            .collect();

        let order_by = raw
            .order_by
            .iter()
            .enumerate()
            .map(|(idx, order)| self.order(root, order, &aliases, &joins, &format!("order_by[{}]", idx)))
            .collect::<Result<Vec<_>, _>>()?;

        let limit = self.limit(raw.limit)?;

        let spec = QuerySpecification {
            root_entity: root.name.clone(),
            root_table: root.table_name().to_string(),
            schema_version: self.schema_version.clone(),
            joins,
            fields,
            filters,
            aggregations,
            group_by,
            order_by,
            limit,
            chart: None,
        };

        self.check_aliases(&spec)?;
        if spec.mixes_fanout_aggregates() {
            warn!(
                root = %spec.root_entity,
                "Aggregates across a to-many relation repeat root rows; root-level aggregates will be inflated"
            );
        }

        let chart = self.chart(raw.chart_type.as_deref(), raw.label_field.as_deref())?;

        debug!(
            root = %spec.root_entity,
            fields = spec.fields.len(),
            filters = spec.filters.len(),
            aggregations = spec.aggregations.len(),
            "Specification validated"
        );

        Ok(QuerySpecification { chart, ..spec })
    }

    fn root(&self, name: &str) -> Result<&'a EntityType, ValidationError> {
        self.schema.entity(name).ok_or_else(|| {
            let known: Vec<&str> = self
                .schema
                .entities()
                .iter()
                .map(|e| e.name.as_str())
                .take(25)
                .collect();
            ValidationError::new(
                Violation::UnresolvedPath,
                "root_entity",
                format!("unknown entity '{}'; known entities: {}", name, known.join(", ")),
            )
            .with_path(name)
        })
    }

    fn join(&self, root: &EntityType, join: &RawJoin, location: &str) -> Result<ExplicitJoin, ValidationError> {
        let (text, kind, model) = match join {
            RawJoin::Path(text) => (text.as_str(), None, None),
            RawJoin::Detailed(entry) => (entry.path.as_str(), entry.kind.as_deref(), entry.model.as_deref()),
        };
        let path = self.path(text, location)?;
        let hops = self
            .schema
            .resolve_relations(&root.name, &path)
            .map_err(|e| unresolved(location, text, e))?;

        let kind = match kind.map(|k| k.trim().to_ascii_lowercase()) {
            None => JoinKind::Inner,
            Some(k) if k == "inner" => JoinKind::Inner,
            Some(k) if k == "left" || k == "left outer" => JoinKind::Left,
            Some(other) => {
                return Err(ValidationError::malformed(
                    format!("{}.kind", location),
                    format!("unknown join kind '{}' (expected inner or left)", other),
                ))
            }
        };

        if let (Some(expected), Some(last)) = (model, hops.last()) {
            if expected != last.to_entity {
                return Err(ValidationError::new(
                    Violation::UnresolvedPath,
                    location,
                    format!("'{}' leads to {}, not {}", text, last.to_entity, expected),
                )
                .with_path(text));
            }
        }

        Ok(ExplicitJoin { path, hops, kind })
    }

    fn field(
        &self,
        root: &EntityType,
        field: &RawField,
        joins: &[ExplicitJoin],
        location: &str,
    ) -> Result<OutputField, ValidationError> {
        let (text, alias) = match field {
            RawField::Path(text) => (text.as_str(), None),
            RawField::Aliased(entry) => (entry.path.as_str(), entry.alias.clone()),
        };
        let path = self.path(text, location)?;
        let resolved = self.resolve(root, &path, location, text)?;
        self.check_fanout(&resolved, joins, Usage::Field, location)?;
        if let Some(alias) = &alias {
            self.alias(alias, &format!("{}.alias", location))?;
        }
        Ok(OutputField { path: resolved, alias })
    }

    fn filter(
        &self,
        root: &EntityType,
        filter: &RawFilter,
        joins: &[ExplicitJoin],
        usage: Usage,
        location: &str,
    ) -> Result<FilterClause, ValidationError> {
        let path = self.path(&filter.path, location)?;
        let resolved = self.resolve(root, &path, location, &filter.path)?;
        self.check_fanout(&resolved, joins, usage, location)?;

        let operator = self.registry.parse_operator(&filter.operator).map_err(|e| {
            ValidationError::new(
                Violation::DisallowedOperator,
                format!("{}.operator", location),
                format!("{}; allowed: {}", e, self.operator_names()),
            )
            .with_path(filter.path.as_str())
        })?;
        let signature = self
            .registry
            .lookup_operator(operator, resolved.kind())
            .map_err(|e| {
                ValidationError::new(
                    Violation::DisallowedOperator,
                    format!("{}.operator", location),
                    format!("{} ('{}')", e, filter.path),
                )
                .with_path(filter.path.as_str())
            })?;

        let value = coerce_literal(&filter.value, &resolved.field, operator, signature.shape)
            .map_err(|message| {
                ValidationError::new(Violation::InvalidLiteral, format!("{}.value", location), message)
                    .with_path(filter.path.as_str())
            })?;

        Ok(FilterClause {
            path: resolved,
            operator,
            value,
        })
    }

    fn aggregation(
        &self,
        root: &EntityType,
        agg: &RawAggregation,
        joins: &[ExplicitJoin],
        location: &str,
    ) -> Result<Aggregation, ValidationError> {
        let function = self.registry.parse_function(&agg.function).map_err(|e| {
            ValidationError::new(
                Violation::DisallowedFunction,
                format!("{}.function", location),
                format!("{}; allowed: {}", e, self.function_names()),
            )
        })?;

        let path = self.path(&agg.path, location)?;
        let resolved = self.resolve(root, &path, location, &agg.path)?;
        self.check_fanout(&resolved, joins, Usage::Aggregate, location)?;

        self.registry
            .lookup_function(function, resolved.kind())
            .map_err(|e| {
                ValidationError::new(
                    Violation::DisallowedFunction,
                    format!("{}.function", location),
                    format!("{} ('{}')", e, agg.path),
                )
                .with_path(agg.path.as_str())
            })?;

        self.alias(&agg.alias, &format!("{}.alias", location))?;

        let flat = match (&agg.filter_field, &agg.filter_operator) {
            (Some(path), Some(operator)) => Some(RawFilter {
                path: path.clone(),
                operator: operator.clone(),
                value: agg.filter_value.clone().unwrap_or(Value::Null),
            }),
            (None, None) => None,
            _ => {
                return Err(ValidationError::malformed(
                    location,
                    "filter_field and filter_operator must be given together",
                ))
            }
        };
        let filter = match agg.filter.as_ref().or(flat.as_ref()) {
            Some(raw) => Some(self.filter(
                root,
                raw,
                joins,
                Usage::Aggregate,
                &format!("{}.filter", location),
            )?),
            None => None,
        };

        Ok(Aggregation {
            function,
            path: resolved,
            alias: agg.alias.clone(),
            filter,
        })
    }

    fn order(
        &self,
        root: &EntityType,
        order: &RawOrder,
        aliases: &HashSet<&str>,
        joins: &[ExplicitJoin],
        location: &str,
    ) -> Result<OrderKey, ValidationError> {
        let (key, direction) = match order {
            RawOrder::Key(text) => match text.trim().strip_prefix('-') {
                Some(rest) => (rest.trim(), SortDirection::Desc),
                None => (text.trim(), SortDirection::Asc),
            },
            RawOrder::Detailed(entry) => {
                let direction = match entry.direction.as_deref().map(|d| d.trim().to_ascii_lowercase()) {
                    None => SortDirection::Asc,
                    Some(d) if d == "asc" || d == "ascending" => SortDirection::Asc,
                    Some(d) if d == "desc" || d == "descending" => SortDirection::Desc,
                    Some(other) => {
                        return Err(ValidationError::malformed(
                            format!("{}.direction", location),
                            format!("unknown direction '{}' (expected asc or desc)", other),
                        ))
                    }
                };
                (entry.key.trim(), direction)
            }
        };

        if aliases.contains(key) {
            return Ok(OrderKey {
                target: OrderTarget::Alias(key.to_string()),
                direction,
            });
        }

        let path = self.path(key, location)?;
        let resolved = self.resolve(root, &path, location, key)?;
        self.check_fanout(&resolved, joins, Usage::OrderBy, location)?;
        Ok(OrderKey {
            target: OrderTarget::Path(resolved),
            direction,
        })
    }

    fn limit(&self, limit: Option<i64>) -> Result<Option<u32>, ValidationError> {
        let Some(requested) = limit else {
            return Ok(None);
        };
        let max = i64::from(self.options.max_limit.max(1));
        if requested > max {
            if self.options.limit_policy == LimitPolicy::Reject {
                return Err(ValidationError::new(
                    Violation::LimitExceeded,
                    "limit",
                    format!("limit {} exceeds the maximum of {}", requested, max),
                ));
            }
            debug!(requested, max, "Clamping limit");
        }
        // Bounded by `max`, which came from a u32
        Ok(Some(requested.clamp(1, max) as u32))
    }

    fn check_aliases(&self, spec: &QuerySpecification) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        let locations = spec
            .fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.output_name(), format!("fields[{}]", idx)))
            .chain(
                spec.group_by
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| !spec.fields.iter().any(|f| f.path.path == g.path))
                    .map(|(idx, g)| (g.path.to_string(), format!("group_by[{}]", idx))),
            )
            .chain(
                spec.aggregations
                    .iter()
                    .enumerate()
                    .map(|(idx, a)| (a.alias.clone(), format!("aggregations[{}].alias", idx))),
            );
        for (name, location) in locations {
            if !seen.insert(name.clone()) {
                return Err(ValidationError::new(
                    Violation::AliasCollision,
                    location,
                    format!("output name '{}' is used more than once", name),
                ));
            }
        }
        Ok(())
    }

    /// A chart without a usable label column degrades to no chart
    fn chart(
        &self,
        chart_type: Option<&str>,
        label_field: Option<&str>,
    ) -> Result<Option<ChartSpec>, ValidationError> {
        let chart_type: Option<ChartType> = match chart_type {
            Some(name) => ChartType::parse(name).map_err(|e| ValidationError::malformed("chart_type", e))?,
            None => None,
        };
        let label_field = label_field.map(|label| {
            // Accept `customer__country` for an output named `customer.country`
            parse_path(label)
                .map(|p| p.to_string())
                .unwrap_or_else(|_| label.to_string())
        });
        Ok(chart_type.map(|chart_type| ChartSpec {
            chart_type,
            label_field,
        }))
    }

    fn path(&self, text: &str, location: &str) -> Result<FieldPath, ValidationError> {
        parse_path(text).map_err(|e| {
            ValidationError::malformed(location, format!("'{}' is not a field path: {}", text, e))
                .with_path(text)
        })
    }

    fn resolve(
        &self,
        root: &EntityType,
        path: &FieldPath,
        location: &str,
        text: &str,
    ) -> Result<ResolvedPath, ValidationError> {
        self.schema
            .resolve_path(&root.name, path)
            .map_err(|e| unresolved(location, text, e))
    }

    fn alias(&self, alias: &str, location: &str) -> Result<(), ValidationError> {
        check_alias(alias).map_err(|_| {
            ValidationError::malformed(
                location,
                format!("alias '{}' must be letters, digits and underscores", alias),
            )
        })
    }

    /// Paths through a one-to-many relation multiply root rows. Aggregates may
    /// cross such relations freely; anywhere else the relation must have been
    /// joined explicitly.
    fn check_fanout(
        &self,
        resolved: &ResolvedPath,
        joins: &[ExplicitJoin],
        usage: Usage,
        location: &str,
    ) -> Result<(), ValidationError> {
        if matches!(usage, Usage::Aggregate) {
            return Ok(());
        }
        let Some(first) = resolved.first_fanout() else {
            return Ok(());
        };
        for (idx, hop) in resolved.hops.iter().enumerate().skip(first) {
            if hop.cardinality != Cardinality::Many {
                continue;
            }
            let prefix = resolved.relation_prefix(idx + 1);
            if !joins.iter().any(|join| join.path.starts_with(&prefix)) {
                return Err(ValidationError::new(
                    Violation::AmbiguousFanout,
                    location,
                    format!(
                        "'{}' crosses the one-to-many relation '{}' of {}; aggregate over it or add \"{}\" to joins",
                        resolved.path, hop.relation, hop.from_entity, prefix
                    ),
                )
                .with_path(resolved.path.to_string()));
            }
        }
        Ok(())
    }

    fn operator_names(&self) -> String {
        self.registry
            .operators()
            .iter()
            .map(|sig| sig.operator.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn function_names(&self) -> String {
        self.registry
            .functions()
            .iter()
            .map(|sig| sig.function.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn unresolved(location: &str, text: &str, error: ResolveError) -> ValidationError {
    ValidationError::new(
        Violation::UnresolvedPath,
        location,
        format!("cannot resolve '{}': {}", text, error),
    )
    .with_path(text)
}
