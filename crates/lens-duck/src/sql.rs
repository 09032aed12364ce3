//! Plan → DuckDB SQL rendering
//!
//! Identifiers come from the schema graph and are always quoted; values from
//! a query specification only ever travel as bound parameters.

use lens_ir::{
    AggregateFunction, AggregationStep, ColumnRef, FilterOperator, FilterStep, JoinKind, Literal,
    OutputSource, QueryPlan, ScalarKind, SortDirection,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Plan has no selection step")]
    MissingSelection,

    #[error("Output '{0}' refers to an unknown aggregate")]
    UnknownAggregate(String),

    #[error("Operator {operator} got an unexpected value: {value}")]
    UnexpectedValue {
        operator: FilterOperator,
        value: String,
    },
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

impl From<&QueryParam> for duckdb::types::Value {
    fn from(param: &QueryParam) -> Self {
        match param {
            QueryParam::Int(i) => duckdb::types::Value::BigInt(*i),
            QueryParam::Float(f) => duckdb::types::Value::Double(*f),
            QueryParam::Bool(b) => duckdb::types::Value::Boolean(*b),
            QueryParam::String(s) => duckdb::types::Value::Text(s.clone()),
            QueryParam::Null => duckdb::types::Value::Null,
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `schema.table` is quoted part by part
fn quote_table(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

fn column(col: &ColumnRef) -> String {
    format!("{}.{}", quote_ident(&col.source), quote_ident(&col.column))
}

pub fn render(plan: &QueryPlan) -> Result<CompiledQuery, RenderError> {
    let mut params = Vec::new();

    let selection = plan.selection().ok_or(RenderError::MissingSelection)?;
    let aggregates: Vec<&AggregationStep> = plan.aggregations().collect();

    let mut select_list = Vec::with_capacity(selection.columns.len());
    for output in &selection.columns {
        let expr = match &output.source {
            OutputSource::Column { column: col } => column(col),
            OutputSource::Aggregate { alias } => {
                let agg = aggregates
                    .iter()
                    .find(|a| &a.alias == alias)
                    .ok_or_else(|| RenderError::UnknownAggregate(alias.clone()))?;
                aggregate(agg, &mut params)?
            }
        };
        select_list.push(format!("{} AS {}", output_cast(&expr, output.kind), quote_ident(&output.name)));
    }

    let mut sql = format!(
        "SELECT {} FROM {} AS {}",
        select_list.join(", "),
        quote_table(&plan.root.table),
        quote_ident(&plan.root.alias)
    );

    for join in plan.joins() {
        let kind = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        sql.push_str(&format!(
            " {} {} AS {} ON {}.{} = {}.{}",
            kind,
            quote_table(&join.target_table),
            quote_ident(&join.alias),
            quote_ident(&join.alias),
            quote_ident(&join.remote_key),
            quote_ident(&join.parent),
            quote_ident(&join.local_key)
        ));
    }

    // Parameters bind positionally: select-list placeholders precede these
    let conditions = plan
        .filters()
        .map(|f| condition(f, &mut params))
        .collect::<Result<Vec<_>, _>>()?;
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if let Some(group) = plan.group() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group.keys.iter().map(column).collect::<Vec<_>>().join(", "));
    }

    if let Some(order) = plan.order() {
        let keys: Vec<String> = order
            .keys
            .iter()
            .map(|k| {
                let dir = match k.direction {
                    SortDirection::Asc => "ASC",
                    SortDirection::Desc => "DESC",
                };
                format!("{} {}", quote_ident(&k.output), dir)
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));
    }

    if let Some(limit) = plan.limit() {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Ok(CompiledQuery { sql, params })
}

/// Normalize result values: ISO text for temporal kinds, DOUBLE for decimals
fn output_cast(expr: &str, kind: ScalarKind) -> String {
    match kind {
        ScalarKind::Integer => format!("CAST({} AS BIGINT)", expr),
        ScalarKind::Decimal => format!("CAST({} AS DOUBLE)", expr),
        ScalarKind::Date => format!("strftime({}, '%Y-%m-%d')", expr),
        ScalarKind::DateTime => format!("strftime({}, '%Y-%m-%dT%H:%M:%S')", expr),
        ScalarKind::Text | ScalarKind::Choice | ScalarKind::Boolean => expr.to_string(),
    }
}

fn aggregate(agg: &AggregationStep, params: &mut Vec<QueryParam>) -> Result<String, RenderError> {
    let func = match agg.function {
        AggregateFunction::Count => "COUNT",
        AggregateFunction::Sum => "SUM",
        AggregateFunction::Average => "AVG",
        AggregateFunction::Minimum => "MIN",
        AggregateFunction::Maximum => "MAX",
    };
    let mut expr = format!("{}({})", func, column(&agg.column));
    if let Some(filter) = &agg.filter {
        expr.push_str(&format!(" FILTER (WHERE {})", condition(filter, params)?));
    }
    Ok(expr)
}

fn placeholder(value: &Literal, params: &mut Vec<QueryParam>) -> String {
    match value {
        Literal::Date(d) => {
            params.push(QueryParam::String(d.format("%Y-%m-%d").to_string()));
            "CAST(? AS DATE)".to_string()
        }
        Literal::DateTime(dt) => {
            params.push(QueryParam::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()));
            "CAST(? AS TIMESTAMP)".to_string()
        }
        Literal::Text(s) => {
            params.push(QueryParam::String(s.clone()));
            "?".to_string()
        }
        Literal::Integer(i) => {
            params.push(QueryParam::Int(*i));
            "?".to_string()
        }
        Literal::Decimal(f) => {
            params.push(QueryParam::Float(*f));
            "?".to_string()
        }
        Literal::Boolean(b) => {
            params.push(QueryParam::Bool(*b));
            "?".to_string()
        }
        Literal::Null | Literal::List(_) => {
            params.push(QueryParam::Null);
            "?".to_string()
        }
    }
}

fn condition(filter: &FilterStep, params: &mut Vec<QueryParam>) -> Result<String, RenderError> {
    let col = column(&filter.column);
    let unexpected = || RenderError::UnexpectedValue {
        operator: filter.operator,
        value: filter.value.to_string(),
    };

    let sql = match filter.operator {
        FilterOperator::Equals => format!("{} = {}", col, placeholder(&filter.value, params)),
        FilterOperator::NotEquals => format!("{} <> {}", col, placeholder(&filter.value, params)),
        FilterOperator::GreaterThan => format!("{} > {}", col, placeholder(&filter.value, params)),
        FilterOperator::GreaterOrEqual => format!("{} >= {}", col, placeholder(&filter.value, params)),
        FilterOperator::LessThan => format!("{} < {}", col, placeholder(&filter.value, params)),
        FilterOperator::LessOrEqual => format!("{} <= {}", col, placeholder(&filter.value, params)),
        FilterOperator::Range => match filter.value.as_list() {
            Some([low, high]) => format!(
                "{} BETWEEN {} AND {}",
                col,
                placeholder(low, params),
                placeholder(high, params)
            ),
            _ => return Err(unexpected()),
        },
        FilterOperator::Contains => format!("contains({}, {})", col, placeholder(&filter.value, params)),
        FilterOperator::IContains => {
            format!("contains(lower({}), lower({}))", col, placeholder(&filter.value, params))
        }
        FilterOperator::StartsWith => {
            format!("starts_with({}, {})", col, placeholder(&filter.value, params))
        }
        FilterOperator::EndsWith => format!("suffix({}, {})", col, placeholder(&filter.value, params)),
        FilterOperator::InSet => {
            let items = filter.value.as_list().filter(|l| !l.is_empty()).ok_or_else(unexpected)?;
            let marks: Vec<String> = items.iter().map(|item| placeholder(item, params)).collect();
            format!("{} IN ({})", col, marks.join(", "))
        }
        FilterOperator::IsNull => match filter.value {
            Literal::Boolean(true) => format!("{} IS NULL", col),
            Literal::Boolean(false) => format!("{} IS NOT NULL", col),
            _ => return Err(unexpected()),
        },
        FilterOperator::Year => format!("year({}) = {}", col, placeholder(&filter.value, params)),
        FilterOperator::Quarter => format!("quarter({}) = {}", col, placeholder(&filter.value, params)),
        FilterOperator::Month => format!("month({}) = {}", col, placeholder(&filter.value, params)),
        FilterOperator::Week => format!("week({}) = {}", col, placeholder(&filter.value, params)),
        FilterOperator::Day => format!("day({}) = {}", col, placeholder(&filter.value, params)),
        // dayofweek counts from 0 = Sunday
        FilterOperator::WeekDay => {
            format!("dayofweek({}) + 1 = {}", col, placeholder(&filter.value, params))
        }
    };
    Ok(sql)
}
