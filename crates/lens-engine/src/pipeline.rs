//! Public entry point: question in, shaped and validated result out

use lens_compile::{explain, Compiler};
use lens_duck::DuckExecutor;
use lens_ir::{ChartType, QueryPlan, QuerySpecification, SchemaGraph, SchemaProvider};
use lens_registry::Registry;
use lens_validate::Validator;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Config, ConfigError, QueryConfig};
use crate::error::{AttemptFailure, EngineError, FailureKind};
use crate::executor::{DuckDbQueryExecutor, QueryExecutor};
use crate::llm::{extract_json, LanguageModel, OpenAiModel, Turn};
use crate::prompt;
use crate::repair::{Event, Phase, RepairLoop};
use crate::schema_cache::SchemaCache;
use crate::shape::{shape, ChartSeries};

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub question: String,
    /// Schema namespaces to expose; the configured defaults when empty
    pub scopes: Vec<String>,
    /// Overrides `query.max_retries`
    pub max_retries: Option<u32>,
    pub force_regenerate: bool,
    /// Ask the model for a plain-language answer after execution
    pub summarize: bool,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn force_regenerate(mut self) -> Self {
        self.force_regenerate = true;
        self
    }

    pub fn summarize(mut self) -> Self {
        self.summarize = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub request_id: String,
    pub question: String,
    pub specification: QuerySpecification,
    /// The accepted model output as parsed JSON
    pub raw_specification: Value,
    pub plan_summary: String,
    pub data: Vec<Map<String, Value>>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<ChartType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_data: Option<ChartSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Number of proposals it took
    pub attempts: u32,
    /// Failed proposals before the accepted one
    pub failures: Vec<AttemptFailure>,
}

struct Accepted {
    raw: Value,
    specification: QuerySpecification,
    plan: QueryPlan,
    rows: Vec<Map<String, Value>>,
}

pub struct QueryEngine {
    config: QueryConfig,
    registry: Registry,
    provider: Arc<dyn SchemaProvider>,
    model: Arc<dyn LanguageModel>,
    executor: Arc<dyn QueryExecutor>,
    cache: Option<SchemaCache>,
}

impl QueryEngine {
    pub fn new(
        config: QueryConfig,
        provider: Arc<dyn SchemaProvider>,
        model: Arc<dyn LanguageModel>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            config,
            registry: Registry::default(),
            provider,
            model,
            executor,
            cache: None,
        }
    }

    pub fn with_schema_cache(mut self, cache: SchemaCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// OpenAI model, DuckDB storage and catalog, on-disk schema cache
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        config.validate()?;
        let model = OpenAiModel::from_config(&config.llm)?;

        let duck = match &config.database.path {
            Some(path) => DuckExecutor::open(path),
            None => DuckExecutor::new(),
        }
        .map_err(|e| ConfigError::Database(e.to_string()))?;
        let catalog = duck.catalog().map_err(|e| ConfigError::Database(e.to_string()))?;

        Ok(Self::new(
            config.query.clone(),
            Arc::new(catalog),
            Arc::new(model),
            Arc::new(DuckDbQueryExecutor::new(duck)),
        )
        .with_schema_cache(SchemaCache::new(&config.schema.cache_dir)))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn run(&self, request: QueryRequest) -> Result<QueryResponse, EngineError> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("query", request_id = %request_id);
        self.run_request(request, request_id).instrument(span).await
    }

    async fn run_request(&self, request: QueryRequest, request_id: String) -> Result<QueryResponse, EngineError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(EngineError::Input("question is empty".to_string()));
        }

        let scopes = if request.scopes.is_empty() {
            self.config.scopes.clone()
        } else {
            request.scopes.clone()
        };
        if scopes.is_empty() {
            return Err(EngineError::Input(
                "no schema scope given and none configured".to_string(),
            ));
        }

        let graph = self.schema(&scopes, request.force_regenerate)?;
        if graph.is_empty() {
            return Err(EngineError::Input(format!(
                "no entities found in scopes [{}]",
                scopes.join(", ")
            )));
        }
        info!(entities = graph.entities().len(), version = %graph.fingerprint(), "Schema ready");

        let validator = Validator::new(&graph, &self.registry, self.config.validator_options());
        let compiler = Compiler::new(&self.registry, self.config.max_limit);
        let system = prompt::system_prompt(
            &prompt::schema_text(&graph),
            &self.registry,
            self.config.max_limit,
            request.summarize,
        );

        let max_retries = request.max_retries.unwrap_or(self.config.max_retries);
        let mut repair = RepairLoop::new(max_retries);
        let mut history: Vec<Turn> = Vec::new();

        let (attempts, accepted) = loop {
            match repair.phase().clone() {
                Phase::Proposing { .. } | Phase::Retrying { .. } => {
                    let raw = self.model.propose(&system, question, &history).await?;
                    repair.transition(Event::Proposed(raw));
                }
                Phase::Validating { attempt, raw } => {
                    match self.attempt(&validator, &compiler, attempt, &raw).await {
                        Ok(result) => {
                            repair.transition(Event::Passed);
                            break (attempt, result);
                        }
                        Err(failure) => {
                            warn!(attempt, kind = %failure.kind, message = %failure.message, "Attempt failed");
                            history.push(Turn {
                                raw,
                                feedback: prompt::repair_message(&failure),
                            });
                            repair.transition(Event::Failed(failure));
                        }
                    }
                }
                // Succeeded is left through the break above
                Phase::Succeeded { .. } | Phase::Exhausted => {
                    return Err(EngineError::RetryBudgetExhausted {
                        attempts: repair.into_failures(),
                    })
                }
            }
        };

        let Accepted {
            raw,
            specification,
            plan,
            rows,
        } = accepted;

        let plan_summary = explain(&plan);
        let shaped = shape(rows, plan.output_columns(), specification.chart.as_ref());
        crate::log_event!(
            INFO,
            "query_answered",
            attempts = attempts,
            rows = shaped.row_count,
            chart = shaped.chart_data.is_some()
        );

        let summary = if request.summarize {
            self.summarize(question, &plan_summary, &shaped.data).await
        } else {
            None
        };

        Ok(QueryResponse {
            success: true,
            request_id,
            question: question.to_string(),
            specification,
            raw_specification: raw,
            plan_summary,
            data: shaped.data,
            row_count: shaped.row_count,
            chart_type: shaped.chart_type,
            chart_data: shaped.chart_data,
            summary,
            attempts,
            failures: repair.into_failures(),
        })
    }

    fn schema(&self, scopes: &[String], force: bool) -> Result<SchemaGraph, EngineError> {
        let graph = match &self.cache {
            Some(cache) => cache.get_or_build(self.provider.as_ref(), scopes, force)?,
            None => self.provider.build_schema(scopes)?,
        };
        Ok(graph)
    }

    /// Parse, validate, compile and execute one proposal
    async fn attempt(
        &self,
        validator: &Validator<'_>,
        compiler: &Compiler<'_>,
        attempt: u32,
        raw: &str,
    ) -> Result<Accepted, AttemptFailure> {
        let value: Value = serde_json::from_str(extract_json(raw)).map_err(|e| {
            AttemptFailure::new(
                attempt,
                FailureKind::MalformedSpecification,
                format!("Response is not a JSON object: {}", e),
                raw,
            )
        })?;

        let specification = validator
            .validate(&value)
            .map_err(|e| AttemptFailure::from_validation(attempt, e, raw))?;
        let plan = compiler
            .compile(&specification)
            .map_err(|e| AttemptFailure::from_compile(attempt, e, raw))?;
        debug!(attempt, steps = plan.steps.len(), "Plan compiled");

        let rows = self
            .executor
            .execute(&plan)
            .await
            .map_err(|e| AttemptFailure::from_execution(attempt, e, raw))?;

        Ok(Accepted {
            raw: value,
            specification,
            plan,
            rows,
        })
    }

    async fn summarize(&self, question: &str, plan_summary: &str, data: &[Map<String, Value>]) -> Option<String> {
        let rows = Value::Array(data.iter().cloned().map(Value::Object).collect());
        let prompt = prompt::summary_prompt(question, plan_summary, &rows);
        match self.model.summarize(&prompt).await {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                warn!(error = %e, "Summary failed");
                None
            }
        }
    }
}
