//! Prompt text for the language model
//!
//! The schema listing and the operator table are generated from the same
//! snapshot and registry the validator uses, so the model is never told about
//! anything the validator would reject.

use lens_ir::{Cardinality, SchemaGraph};
use lens_registry::{Registry, ValueShape};
use std::fmt::Write;

use crate::error::AttemptFailure;

const FORMAT: &str = r#"Respond with one JSON object describing the query:

```json
{
  "root_entity": "Order",
  "joins": [{"path": "customer", "kind": "left"}],
  "fields": [{"path": "customer.country", "alias": "country"}],
  "filters": [{"path": "status", "operator": "equals", "value": "paid"}],
  "aggregations": [
    {"function": "sum", "path": "total", "alias": "revenue",
     "filter": {"path": "status", "operator": "equals", "value": "paid"}}
  ],
  "group_by": ["customer.country"],
  "order_by": [{"key": "revenue", "direction": "desc"}],
  "limit": 10,
  "chart_type": "bar",
  "label_field": "country"
}
```

Rules:
1. Paths walk relations with "." starting from root_entity and end on a field.
2. Every selected field must appear in group_by when aggregations are present. group_by paths are always returned, named by their path unless a field aliases them.
3. A path through a "many" relation outside an aggregation needs a matching entry in joins.
4. Output names must be unique across fields, group_by paths and aggregations.
5. order_by keys name an output alias or a selected path; "-key" sorts descending.
6. chart_type is one of bar, line, pie, doughnut, radar, scatter, none.
7. Return ONLY the JSON, no other text."#;

const HUMAN_FRIENDLY: &str = "Prefer a single aggregated row or a short grouped list over raw records. \
Name every aggregation with a readable alias.";

/// Entity listing in the form the model reads
pub fn schema_text(graph: &SchemaGraph) -> String {
    let mut out = String::new();
    for entity in graph.entities() {
        let _ = writeln!(out, "{} (table {}):", entity.name, entity.table_name());
        for field in &entity.fields {
            let mut line = format!("  - {}: {}", field.name, field.kind.as_str());
            if field.nullable {
                line.push_str(", nullable");
            }
            if !field.choices.is_empty() {
                line.push_str(&format!(", one of [{}]", field.choices.join(", ")));
            }
            let _ = writeln!(out, "{}", line);
        }
        for relation in &entity.relations {
            let many = match relation.cardinality {
                Cardinality::One => "one",
                Cardinality::Many => "many",
            };
            let _ = writeln!(out, "  - {} -> {} ({})", relation.name, relation.target, many);
        }
    }
    out
}

pub fn system_prompt(schema_text: &str, registry: &Registry, max_limit: u32, human_friendly: bool) -> String {
    let mut prompt = String::from(
        "You convert questions about a database into a JSON query specification.\n\n## Entities\n\n",
    );
    prompt.push_str(schema_text);

    let _ = write!(prompt, "\n## Filter operators (allowlist {})\n\n", registry.version());
    for signature in registry.operators() {
        let kinds: Vec<&str> = signature.accepts.iter().map(|k| k.as_str()).collect();
        let _ = writeln!(
            prompt,
            "- {} ({}; value: {}): {}",
            signature.operator,
            kinds.join("/"),
            shape_hint(signature.shape),
            signature.description
        );
    }

    prompt.push_str("\n## Aggregate functions\n\n");
    for signature in registry.functions() {
        let kinds: Vec<&str> = signature.accepts.iter().map(|k| k.as_str()).collect();
        let _ = writeln!(prompt, "- {} ({})", signature.function, kinds.join("/"));
    }

    let _ = write!(prompt, "\nAt most {} rows are returned.\n\n", max_limit);
    if human_friendly {
        prompt.push_str(HUMAN_FRIENDLY);
        prompt.push_str("\n\n");
    }
    prompt.push_str(FORMAT);
    prompt
}

fn shape_hint(shape: ValueShape) -> String {
    match shape {
        ValueShape::Scalar => "single value".to_string(),
        ValueShape::Pair => "[low, high]".to_string(),
        ValueShape::List => "non-empty list".to_string(),
        ValueShape::Flag => "true or false".to_string(),
        ValueShape::Needle => "text".to_string(),
        ValueShape::DatePart { min, max } => format!("whole number {}-{}", min, max),
    }
}

/// Feedback sent back after a failed attempt
pub fn repair_message(failure: &AttemptFailure) -> String {
    let mut message = format!("Error ({}", failure.kind);
    if let Some(location) = &failure.location {
        let _ = write!(message, " at {}", location);
    }
    let _ = write!(
        message,
        "): {}\nFix this and return the corrected JSON only.",
        failure.message
    );
    message
}

pub fn summary_prompt(question: &str, plan_summary: &str, data: &serde_json::Value) -> String {
    format!(
        "Question: {}\n\nQuery plan:\n{}\n\nResult rows:\n{}\n\n\
         Answer the question in one or two plain sentences using only these rows.",
        question, plan_summary, data
    )
}
