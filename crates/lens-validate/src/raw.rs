//! Wire shape of an untrusted candidate specification
//!
//! Only structure is checked here. Names stay strings until the validator
//! resolves them against the schema graph and the registry.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawSpecification {
    #[serde(alias = "rootEntity", alias = "root", alias = "model")]
    pub root_entity: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub joins: Vec<RawJoin>,
    #[serde(
        default,
        alias = "select_fields",
        alias = "selectFields",
        deserialize_with = "null_as_empty"
    )]
    pub fields: Vec<RawField>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub filters: Vec<RawFilter>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub aggregations: Vec<RawAggregation>,
    #[serde(default, alias = "groupBy", deserialize_with = "null_as_empty")]
    pub group_by: Vec<String>,
    #[serde(default, alias = "orderBy", deserialize_with = "null_as_empty")]
    pub order_by: Vec<RawOrder>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default, alias = "chartType")]
    pub chart_type: Option<String>,
    #[serde(default, alias = "labelField")]
    pub label_field: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawJoin {
    Path(String),
    Detailed(RawJoinEntry),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawJoinEntry {
    #[serde(alias = "from_field", alias = "fromField")]
    pub path: String,
    #[serde(default, alias = "join_type", alias = "joinType")]
    pub kind: Option<String>,
    /// Expected target entity; checked when present
    #[serde(default, alias = "entity")]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawField {
    Path(String),
    Aliased(RawFieldEntry),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawFieldEntry {
    #[serde(alias = "field")]
    pub path: String,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawFilter {
    #[serde(alias = "field")]
    pub path: String,
    #[serde(alias = "op", alias = "lookup")]
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawAggregation {
    #[serde(alias = "operation", alias = "func")]
    pub function: String,
    #[serde(alias = "field")]
    pub path: String,
    pub alias: String,
    #[serde(default)]
    pub filter: Option<RawFilter>,
    // Flat per-aggregate filter form: filter_field / filter_operator / filter_value
    #[serde(default, alias = "filterField")]
    pub filter_field: Option<String>,
    #[serde(default, alias = "filterOperator")]
    pub filter_operator: Option<String>,
    #[serde(default, alias = "filterValue")]
    pub filter_value: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawOrder {
    /// `"total"` or `"-total"` for descending
    Key(String),
    Detailed(RawOrderEntry),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawOrderEntry {
    #[serde(alias = "field", alias = "path")]
    pub key: String,
    #[serde(default)]
    pub direction: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
