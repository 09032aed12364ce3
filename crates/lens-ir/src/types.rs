//! Scalar kinds and the closed vocabularies shared by specifications and plans

use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage-independent kind of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    /// Enumerated choice; the allowed values live on the `FieldSpec`
    Choice,
}

impl ScalarKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ScalarKind::Integer | ScalarKind::Decimal)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, ScalarKind::Date | ScalarKind::DateTime)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScalarKind::Text => "text",
            ScalarKind::Integer => "integer",
            ScalarKind::Decimal => "decimal",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Date => "date",
            ScalarKind::DateTime => "datetime",
            ScalarKind::Choice => "choice",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How many target rows a relation yields per source row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

/// Filter operators. This list is the whole allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOperator {
    // Comparison
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Range,
    // String
    Contains,
    #[serde(rename = "icontains")]
    IContains,
    StartsWith,
    EndsWith,
    // Membership
    InSet,
    // Null checks
    IsNull,
    // Date extractors
    Year,
    Quarter,
    Month,
    Week,
    Day,
    WeekDay,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 19] = [
        FilterOperator::Equals,
        FilterOperator::NotEquals,
        FilterOperator::GreaterThan,
        FilterOperator::GreaterOrEqual,
        FilterOperator::LessThan,
        FilterOperator::LessOrEqual,
        FilterOperator::Range,
        FilterOperator::Contains,
        FilterOperator::IContains,
        FilterOperator::StartsWith,
        FilterOperator::EndsWith,
        FilterOperator::InSet,
        FilterOperator::IsNull,
        FilterOperator::Year,
        FilterOperator::Quarter,
        FilterOperator::Month,
        FilterOperator::Week,
        FilterOperator::Day,
        FilterOperator::WeekDay,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Equals => "equals",
            FilterOperator::NotEquals => "not-equals",
            FilterOperator::GreaterThan => "greater-than",
            FilterOperator::GreaterOrEqual => "greater-or-equal",
            FilterOperator::LessThan => "less-than",
            FilterOperator::LessOrEqual => "less-or-equal",
            FilterOperator::Range => "range",
            FilterOperator::Contains => "contains",
            FilterOperator::IContains => "icontains",
            FilterOperator::StartsWith => "starts-with",
            FilterOperator::EndsWith => "ends-with",
            FilterOperator::InSet => "in-set",
            FilterOperator::IsNull => "is-null",
            FilterOperator::Year => "year",
            FilterOperator::Quarter => "quarter",
            FilterOperator::Month => "month",
            FilterOperator::Week => "week",
            FilterOperator::Day => "day",
            FilterOperator::WeekDay => "week-day",
        }
    }

    /// Ordered comparisons (`<`, `>`, `BETWEEN` and friends)
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            FilterOperator::GreaterThan
                | FilterOperator::GreaterOrEqual
                | FilterOperator::LessThan
                | FilterOperator::LessOrEqual
                | FilterOperator::Range
        )
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate functions. This list is the whole allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregateFunction {
    Count,
    Sum,
    Average,
    Minimum,
    Maximum,
}

impl AggregateFunction {
    pub const ALL: [AggregateFunction; 5] = [
        AggregateFunction::Count,
        AggregateFunction::Sum,
        AggregateFunction::Average,
        AggregateFunction::Minimum,
        AggregateFunction::Maximum,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Average => "average",
            AggregateFunction::Minimum => "minimum",
            AggregateFunction::Maximum => "maximum",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Doughnut,
    Radar,
    Scatter,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Doughnut => "doughnut",
            ChartType::Radar => "radar",
            ChartType::Scatter => "scatter",
        }
    }

    /// Parse a chart type name. `None` means "no chart" (`"none"` or empty).
    pub fn parse(name: &str) -> Result<Option<ChartType>, String> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(None),
            "bar" => Ok(Some(ChartType::Bar)),
            "line" => Ok(Some(ChartType::Line)),
            "pie" => Ok(Some(ChartType::Pie)),
            "doughnut" => Ok(Some(ChartType::Doughnut)),
            "radar" => Ok(Some(ChartType::Radar)),
            "scatter" => Ok(Some(ChartType::Scatter)),
            other => Err(format!(
                "unknown chart type '{}' (expected bar, line, pie, doughnut, radar, scatter or none)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_names_match_serde() {
        for op in FilterOperator::ALL {
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json, format!("\"{}\"", op.as_str()));
        }
    }

    #[test]
    fn test_chart_type_none_is_absent() {
        assert_eq!(ChartType::parse("none").unwrap(), None);
        assert_eq!(ChartType::parse("Bar").unwrap(), Some(ChartType::Bar));
        assert!(ChartType::parse("histogram").is_err());
    }
}
