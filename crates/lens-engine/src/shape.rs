//! Result shaping: row maps plus an optional chart series

use lens_ir::{ChartSpec, ChartType, OutputColumn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub label: String,
    pub data: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    pub label_field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapedResult {
    pub data: Vec<Map<String, Value>>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<ChartType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_data: Option<ChartSeries>,
}

/// Rows stay in executor order. The chart is dropped, not failed, when its
/// label column is missing from the output.
pub fn shape(rows: Vec<Map<String, Value>>, columns: &[OutputColumn], chart: Option<&ChartSpec>) -> ShapedResult {
    let chart_data = chart.and_then(|chart| series(&rows, columns, chart));
    ShapedResult {
        row_count: rows.len(),
        chart_type: chart.map(|c| c.chart_type),
        chart_data,
        data: rows,
    }
}

fn series(rows: &[Map<String, Value>], columns: &[OutputColumn], chart: &ChartSpec) -> Option<ChartSeries> {
    let label_field = chart.label_field.as_deref()?;
    if !columns.iter().any(|c| c.name == label_field) {
        return None;
    }

    let labels = rows
        .iter()
        .map(|row| label_text(row.get(label_field)))
        .collect();

    let datasets = columns
        .iter()
        .filter(|c| c.name != label_field && c.kind.is_numeric())
        .map(|c| Dataset {
            label: title_case(&c.name),
            data: rows
                .iter()
                .map(|row| row.get(&c.name).and_then(Value::as_f64))
                .collect(),
        })
        .collect();

    Some(ChartSeries {
        labels,
        datasets,
        label_field: label_field.to_string(),
    })
}

fn label_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// `total_revenue` -> `Total Revenue`
fn title_case(name: &str) -> String {
    name.split(['_', '.'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_ir::{ColumnRef, OutputSource, ScalarKind};
    use serde_json::json;

    fn columns() -> Vec<OutputColumn> {
        vec![
            OutputColumn {
                name: "country".to_string(),
                source: OutputSource::Column {
                    column: ColumnRef::new("j0", "country"),
                },
                kind: ScalarKind::Text,
            },
            OutputColumn {
                name: "total".to_string(),
                source: OutputSource::Aggregate {
                    alias: "total".to_string(),
                },
                kind: ScalarKind::Decimal,
            },
        ]
    }

    fn rows() -> Vec<Map<String, Value>> {
        vec![
            json!({"country": "US", "total": 100}),
            json!({"country": "UK", "total": 50}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
    }

    #[test]
    fn test_chart_follows_row_order() {
        let chart = ChartSpec {
            chart_type: ChartType::Bar,
            label_field: Some("country".to_string()),
        };
        let shaped = shape(rows(), &columns(), Some(&chart));
        assert_eq!(shaped.row_count, 2);
        let series = shaped.chart_data.unwrap();
        assert_eq!(series.labels, vec!["US", "UK"]);
        assert_eq!(series.datasets.len(), 1);
        assert_eq!(series.datasets[0].label, "Total");
        assert_eq!(series.datasets[0].data, vec![Some(100.0), Some(50.0)]);
    }

    #[test]
    fn test_unknown_label_degrades() {
        let chart = ChartSpec {
            chart_type: ChartType::Pie,
            label_field: Some("region".to_string()),
        };
        let shaped = shape(rows(), &columns(), Some(&chart));
        assert_eq!(shaped.chart_type, Some(ChartType::Pie));
        assert!(shaped.chart_data.is_none());
        assert_eq!(shaped.data.len(), 2);
    }

    #[test]
    fn test_no_chart() {
        let shaped = shape(Vec::new(), &columns(), None);
        assert_eq!(shaped.row_count, 0);
        assert!(shaped.chart_type.is_none());
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("total_revenue"), "Total Revenue");
        assert_eq!(title_case("items.quantity"), "Items Quantity");
    }
}
