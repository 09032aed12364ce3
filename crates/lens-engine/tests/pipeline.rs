//! Repair loop and entry point with scripted collaborators

use async_trait::async_trait;
use lens_duck::{DuckExecutor, ExecutionError};
use lens_engine::config::QueryConfig;
use lens_engine::{
    DuckDbQueryExecutor, EngineError, FailureKind, LanguageModel, LlmError, QueryEngine, QueryExecutor,
    QueryRequest, Turn,
};
use lens_ir::{
    ChartType, EntityType, FieldSpec, QueryPlan, RelationSpec, ScalarKind, SchemaGraph, StaticSchemaProvider,
};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const VALID: &str = r#"{
    "root_entity": "Order",
    "fields": [{"path": "customer.country", "alias": "country"}],
    "aggregations": [{"function": "sum", "path": "total", "alias": "revenue"}],
    "group_by": ["customer.country"],
    "order_by": ["-revenue"],
    "chart_type": "bar",
    "label_field": "country"
}"#;

const UNKNOWN_FIELD: &str = r#"{"root_entity": "Order", "fields": ["customer.continent"]}"#;

struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    summary: Option<String>,
    calls: AtomicUsize,
    history: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            summary: None,
            calls: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn history_lengths(&self) -> Vec<usize> {
        self.history.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn propose(&self, system: &str, _question: &str, history: &[Turn]) -> Result<String, LlmError> {
        assert!(system.contains("## Filter operators"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history.lock().unwrap().push(history.to_vec());

        let mut replies = self.replies.lock().unwrap();
        // the last scripted reply repeats once the script runs out
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            match replies.front() {
                Some(Ok(reply)) => Ok(reply.clone()),
                _ => Err(LlmError::EmptyResponse),
            }
        }
    }

    async fn summarize(&self, prompt: &str) -> Result<String, LlmError> {
        assert!(prompt.contains("Query plan:"));
        self.summary.clone().ok_or(LlmError::EmptyResponse)
    }
}

struct FakeExecutor {
    failures_left: AtomicUsize,
    executed: AtomicUsize,
}

impl FakeExecutor {
    fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            executed: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn execute(&self, plan: &QueryPlan) -> Result<Vec<Map<String, Value>>, ExecutionError> {
        self.executed.fetch_add(1, Ordering::SeqCst);
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(ExecutionError::Failed("connection reset".to_string()));
        }

        let names: Vec<&str> = plan.output_columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["country", "revenue"]);
        Ok(vec![
            json!({"country": "US", "revenue": 100.0}),
            json!({"country": "UK", "revenue": 50.0}),
        ]
        .into_iter()
        .filter_map(|row| row.as_object().cloned())
        .collect())
    }
}

fn shop() -> SchemaGraph {
    SchemaGraph::new(vec![
        EntityType::new("Order")
            .in_namespace("shop")
            .with_table("orders")
            .field(FieldSpec::new("id", ScalarKind::Integer))
            .field(FieldSpec::new("total", ScalarKind::Decimal))
            .relation(RelationSpec::one("customer", "Customer", "customer_id", "id")),
        EntityType::new("Customer")
            .in_namespace("shop")
            .with_table("customers")
            .field(FieldSpec::new("id", ScalarKind::Integer))
            .field(FieldSpec::new("country", ScalarKind::Text)),
    ])
    .unwrap()
}

fn engine(model: Arc<ScriptedModel>, executor: Arc<FakeExecutor>) -> QueryEngine {
    let config = QueryConfig {
        scopes: vec!["shop".to_string()],
        ..QueryConfig::default()
    };
    QueryEngine::new(config, Arc::new(StaticSchemaProvider::new(shop())), model, executor)
}

#[tokio::test]
async fn test_first_attempt_success_with_chart() {
    let model = Arc::new(ScriptedModel::replying(&[VALID]));
    let executor = Arc::new(FakeExecutor::failing(0));
    let engine = engine(model.clone(), executor);

    let response = engine.run(QueryRequest::new("Revenue by country?")).await.unwrap();

    assert!(response.success);
    assert_eq!(response.attempts, 1);
    assert!(response.failures.is_empty());
    assert_eq!(response.row_count, 2);
    assert_eq!(response.chart_type, Some(ChartType::Bar));
    let chart = response.chart_data.unwrap();
    assert_eq!(chart.labels, vec!["US", "UK"]);
    assert_eq!(chart.datasets[0].label, "Revenue");
    assert_eq!(chart.datasets[0].data, vec![Some(100.0), Some(50.0)]);
    assert_eq!(response.raw_specification["root_entity"], json!("Order"));
    assert!(response.plan_summary.contains("FROM orders AS t0"));
    assert!(response.summary.is_none());
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_repair_after_unknown_field() {
    let model = Arc::new(ScriptedModel::replying(&[UNKNOWN_FIELD, VALID]));
    let engine = engine(model.clone(), Arc::new(FakeExecutor::failing(0)));

    let response = engine.run(QueryRequest::new("Revenue by country?")).await.unwrap();

    assert_eq!(response.attempts, 2);
    assert_eq!(response.failures.len(), 1);
    assert_eq!(response.failures[0].kind, FailureKind::UnresolvedPath);
    assert_eq!(response.failures[0].raw_specification, UNKNOWN_FIELD);
    assert_eq!(model.history_lengths(), vec![0, 1]);

    let history = model.history.lock().unwrap();
    assert_eq!(history[1][0].raw, UNKNOWN_FIELD);
    assert!(history[1][0].feedback.contains("UnresolvedPath"));
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let model = Arc::new(ScriptedModel::replying(&[UNKNOWN_FIELD]));
    let executor = Arc::new(FakeExecutor::failing(0));
    let engine = engine(model.clone(), executor.clone());

    let err = engine
        .run(QueryRequest::new("Revenue by country?").with_max_retries(2))
        .await
        .unwrap_err();

    match err {
        EngineError::RetryBudgetExhausted { attempts } => {
            let numbers: Vec<u32> = attempts.iter().map(|a| a.attempt).collect();
            assert_eq!(numbers, vec![1, 2, 3]);
            assert!(attempts.iter().all(|a| a.kind == FailureKind::UnresolvedPath));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(model.calls(), 3);
    assert_eq!(model.history_lengths(), vec![0, 1, 2]);
    assert_eq!(executor.executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_zero_retries_asks_once() {
    let model = Arc::new(ScriptedModel::replying(&["not json at all"]));
    let engine = engine(model.clone(), Arc::new(FakeExecutor::failing(0)));

    let err = engine
        .run(QueryRequest::new("Revenue?").with_max_retries(0))
        .await
        .unwrap_err();

    match err {
        EngineError::RetryBudgetExhausted { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].kind, FailureKind::MalformedSpecification);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_execution_failure_is_retried() {
    let model = Arc::new(ScriptedModel::replying(&[VALID, VALID]));
    let executor = Arc::new(FakeExecutor::failing(1));
    let engine = engine(model.clone(), executor.clone());

    let response = engine.run(QueryRequest::new("Revenue by country?")).await.unwrap();

    assert_eq!(response.attempts, 2);
    assert_eq!(response.failures[0].kind, FailureKind::ExecutionFailure);
    assert!(response.failures[0].message.contains("connection reset"));
    assert_eq!(executor.executed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_missing_scope_is_input_error() {
    let model = Arc::new(ScriptedModel::replying(&[VALID]));
    let engine = QueryEngine::new(
        QueryConfig::default(),
        Arc::new(StaticSchemaProvider::new(shop())),
        model.clone(),
        Arc::new(FakeExecutor::failing(0)),
    );

    let err = engine.run(QueryRequest::new("Revenue?")).await.unwrap_err();
    assert!(matches!(err, EngineError::Input(_)));

    let err = engine
        .run(QueryRequest::new("Revenue?").with_scopes(["warehouse"]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Input(_)));

    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_empty_question() {
    let model = Arc::new(ScriptedModel::replying(&[VALID]));
    let engine = engine(model.clone(), Arc::new(FakeExecutor::failing(0)));

    let err = engine.run(QueryRequest::new("   ")).await.unwrap_err();
    assert!(matches!(err, EngineError::Input(_)));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_model_transport_error_is_not_retried() {
    let model = Arc::new(ScriptedModel::new(vec![Err(LlmError::EmptyResponse)]));
    let engine = engine(model.clone(), Arc::new(FakeExecutor::failing(0)));

    let err = engine.run(QueryRequest::new("Revenue?")).await.unwrap_err();
    assert!(matches!(err, EngineError::Model(LlmError::EmptyResponse)));
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_summary_pass() {
    let model = Arc::new(ScriptedModel::replying(&[VALID]).with_summary(" The US leads with 100. "));
    let engine = engine(model, Arc::new(FakeExecutor::failing(0)));

    let response = engine
        .run(QueryRequest::new("Who buys the most?").summarize())
        .await
        .unwrap();
    assert_eq!(response.summary.as_deref(), Some("The US leads with 100."));
}

#[tokio::test]
async fn test_failed_summary_degrades() {
    let model = Arc::new(ScriptedModel::replying(&[VALID]));
    let engine = engine(model, Arc::new(FakeExecutor::failing(0)));

    let response = engine
        .run(QueryRequest::new("Who buys the most?").summarize())
        .await
        .unwrap();
    assert!(response.success);
    assert!(response.summary.is_none());
}

#[tokio::test]
async fn test_fenced_reply_is_accepted() {
    let fenced = format!("```json\n{}\n```", VALID);
    let model = Arc::new(ScriptedModel::replying(&[fenced.as_str()]));
    let engine = engine(model, Arc::new(FakeExecutor::failing(0)));

    let response = engine.run(QueryRequest::new("Revenue by country?")).await.unwrap();
    assert_eq!(response.attempts, 1);
    assert_eq!(response.specification.root_table, "orders");
}

fn duck_shop() -> Result<DuckExecutor, Box<dyn std::error::Error>> {
    let duck = DuckExecutor::new()?;
    duck.connection().execute_batch(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, country VARCHAR);
         CREATE TABLE orders (
             id INTEGER PRIMARY KEY,
             customer_id INTEGER REFERENCES customers(id),
             total DECIMAL(10, 2)
         );
         INSERT INTO customers VALUES (1, 'US'), (2, 'UK');
         INSERT INTO orders VALUES (1, 1, 60.00), (2, 1, 40.00), (3, 2, 50.00);",
    )?;
    Ok(duck)
}

fn duck_engine(duck: DuckExecutor, model: Arc<ScriptedModel>) -> Result<QueryEngine, Box<dyn std::error::Error>> {
    let catalog = duck.catalog()?;
    let config = QueryConfig {
        scopes: vec!["main".to_string()],
        ..QueryConfig::default()
    };
    Ok(QueryEngine::new(
        config,
        Arc::new(catalog),
        model,
        Arc::new(DuckDbQueryExecutor::new(duck)),
    ))
}

#[tokio::test]
async fn test_duckdb_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let duck = duck_shop()?;
    let model = Arc::new(ScriptedModel::replying(&[r#"{
        "root_entity": "orders",
        "fields": [{"path": "customer.country", "alias": "country"}],
        "aggregations": [{"function": "sum", "path": "total", "alias": "revenue"}],
        "group_by": ["customer.country"],
        "order_by": ["-revenue"],
        "chart_type": "pie",
        "label_field": "country"
    }"#]));

    let engine = duck_engine(duck, model)?;

    let response = engine.run(QueryRequest::new("Revenue per country")).await?;
    assert_eq!(response.row_count, 2);
    assert_eq!(response.data[0]["country"], json!("US"));
    assert_eq!(response.data[0]["revenue"], json!(100.0));
    let chart = response.chart_data.unwrap();
    assert_eq!(chart.labels, vec!["US", "UK"]);
    assert_eq!(chart.datasets[0].data, vec![Some(100.0), Some(50.0)]);
    Ok(())
}

#[tokio::test]
async fn test_chart_labelled_by_unselected_group_key() -> Result<(), Box<dyn std::error::Error>> {
    let model = Arc::new(ScriptedModel::replying(&[r#"{
        "rootEntity": "orders",
        "aggregations": [{"function": "sum", "path": "total", "alias": "revenue"}],
        "groupBy": ["customer.country"],
        "orderBy": ["-revenue"],
        "chartType": "bar",
        "labelField": "customer.country"
    }"#]));
    let engine = duck_engine(duck_shop()?, model)?;

    let response = engine.run(QueryRequest::new("Revenue per country")).await?;
    assert!(response.success);
    assert_eq!(response.data[0]["customer.country"], json!("US"));
    assert_eq!(response.chart_type, Some(ChartType::Bar));
    let chart = response.chart_data.unwrap();
    assert_eq!(chart.labels, vec!["US", "UK"]);
    assert_eq!(chart.datasets[0].data, vec![Some(100.0), Some(50.0)]);
    Ok(())
}
