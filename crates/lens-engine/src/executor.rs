use async_trait::async_trait;
use lens_duck::{DuckExecutor, ExecutionError};
use lens_ir::QueryPlan;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// Runs a compiled plan against storage
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, plan: &QueryPlan) -> Result<Vec<Map<String, Value>>, ExecutionError>;
}

/// DuckDB calls block, so each plan runs on the blocking pool
#[derive(Clone)]
pub struct DuckDbQueryExecutor {
    inner: Arc<Mutex<DuckExecutor>>,
}

impl DuckDbQueryExecutor {
    pub fn new(executor: DuckExecutor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(executor)),
        }
    }
}

#[async_trait]
impl QueryExecutor for DuckDbQueryExecutor {
    async fn execute(&self, plan: &QueryPlan) -> Result<Vec<Map<String, Value>>, ExecutionError> {
        let inner = Arc::clone(&self.inner);
        let plan = plan.clone();

        let result = tokio::task::spawn_blocking(move || {
            let executor = inner
                .lock()
                .map_err(|_| ExecutionError::Failed("executor lock poisoned".to_string()))?;
            executor.execute(&plan)
        })
        .await
        .map_err(|e| ExecutionError::Failed(format!("execution task failed: {}", e)))??;

        Ok(result.rows)
    }
}
