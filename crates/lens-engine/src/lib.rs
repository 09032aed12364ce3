//! Question answering over a schema-bound query pipeline
//!
//! A language model proposes a query specification; the engine validates it
//! against a schema snapshot, compiles it to a plan, executes it and shapes
//! the rows for charting. Failures are fed back to the model a bounded number
//! of times.

pub mod config;
pub mod error;
pub mod executor;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod prompt;
pub mod repair;
pub mod schema_cache;
pub mod shape;

pub use config::{Config, ConfigError};
pub use error::{AttemptFailure, EngineError, FailureKind};
pub use executor::{DuckDbQueryExecutor, QueryExecutor};
pub use llm::{extract_json, LanguageModel, LlmError, OpenAiModel, Turn};
pub use pipeline::{QueryEngine, QueryRequest, QueryResponse};
pub use repair::{Event, Phase, RepairLoop};
pub use schema_cache::{CacheError, SchemaCache};
pub use shape::{shape, ChartSeries, Dataset, ShapedResult};
