//! Engine configuration
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. `lens.yaml` (any section or key may be omitted)
//! 3. environment variables, including a `.env` file loaded with dotenvy
//!
//! Secrets never live in the YAML file: the OpenAI key is read from
//! `OPENAI_API_KEY` only when a model client is built.

use lens_validate::{LimitPolicy, ValidatorOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::logging::{LogFormat, LogOutput};

const API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Cannot open database: {0}")]
    Database(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    /// Upper bound on completion tokens per call
    pub max_tokens: u32,
    /// OpenAI-compatible endpoint other than api.openai.com
    pub api_base: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 2048,
            api_base: None,
        }
    }
}

/// Row cap, limit policy, repair budget and default scopes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub max_limit: u32,
    pub limit_policy: LimitPolicy,
    /// Corrections allowed after the first proposal
    pub max_retries: u32,
    /// Used when a request names no scopes
    pub scopes: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_limit: 1000,
            limit_policy: LimitPolicy::Clamp,
            max_retries: 2,
            scopes: Vec::new(),
        }
    }
}

impl QueryConfig {
    pub fn validator_options(&self) -> ValidatorOptions {
        ValidatorOptions {
            max_limit: self.max_limit,
            limit_policy: self.limit_policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub cache_dir: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            cache_dir: ".lens".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// DuckDB file; in-memory when absent
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `info,lens_engine=debug`
    pub level: String,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Where rotated log files go when `output` includes a file
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            output: LogOutput::Stdout,
            directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub query: QueryConfig,
    pub schema: SchemaConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Read `path`, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.overridden_by_env()
    }

    /// Defaults plus environment overrides, for deployments without a YAML file
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Config::default().overridden_by_env()
    }

    fn overridden_by_env(mut self) -> Result<Self, ConfigError> {
        env_string("LENS_MODEL", &mut self.llm.model);
        env_parsed("LENS_MAX_LIMIT", &mut self.query.max_limit)?;
        env_parsed("LENS_MAX_RETRIES", &mut self.query.max_retries)?;
        env_string("LENS_SCHEMA_CACHE_DIR", &mut self.schema.cache_dir);

        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            self.llm.api_base = Some(base);
        }
        if let Ok(path) = std::env::var("LENS_DATABASE") {
            self.database.path = Some(path);
        }
        if let Ok(scopes) = std::env::var("LENS_SCOPES") {
            self.query.scopes = scopes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        env_string("RUST_LOG", &mut self.logging.level);
        env_parsed("LOG_FORMAT", &mut self.logging.format)?;
        env_parsed("LOG_OUTPUT", &mut self.logging.output)?;
        env_string("LOG_DIR", &mut self.logging.directory);

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query.max_limit == 0 {
            return Err(ConfigError::Invalid("query.max_limit must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid(format!(
                "llm.temperature must be within 0..=2, got {}",
                self.llm.temperature
            )));
        }
        Ok(())
    }

    /// The OpenAI key, from the environment only
    pub fn get_openai_api_key() -> Result<String, ConfigError> {
        std::env::var(API_KEY_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(API_KEY_VAR.to_string()))
    }
}

fn env_string(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key) {
        *target = value;
    }
}

fn env_parsed<T: FromStr>(key: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(key) {
        *target = value
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("{}={}", key, value)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.query.max_limit, 1000);
        assert_eq!(config.query.max_retries, 2);
        assert_eq!(config.query.limit_policy, LimitPolicy::Clamp);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.query.scopes.is_empty());
        assert!(config.database.path.is_none());
    }

    #[test]
    fn test_partial_yaml_and_env_override() {
        std::env::set_var("LENS_MAX_RETRIES", "4");

        let yaml = r#"
llm:
  model: "gpt-4o"
query:
  max_limit: 200
  limit_policy: reject
  scopes: ["shop", "catalog"]
logging:
  format: json
"#;
        let path = std::env::temp_dir().join(format!("lens-config-{}.yaml", std::process::id()));
        std::fs::write(&path, yaml).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 2048);
        assert_eq!(config.query.max_limit, 200);
        assert_eq!(config.query.limit_policy, LimitPolicy::Reject);
        assert_eq!(config.query.scopes, vec!["shop", "catalog"]);
        assert_eq!(config.query.max_retries, 4);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.output, LogOutput::Stdout);

        std::env::remove_var("LENS_MAX_RETRIES");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_bad_numeric_override() {
        std::env::set_var("LENS_TEST_BAD_NUMBER", "lots");
        let mut limit = 10u32;
        let result = env_parsed("LENS_TEST_BAD_NUMBER", &mut limit);
        std::env::remove_var("LENS_TEST_BAD_NUMBER");
        assert!(matches!(result, Err(ConfigError::Invalid(message)) if message.contains("lots")));
        assert_eq!(limit, 10);
    }

    #[test]
    fn test_rejects_zero_limit() {
        let mut config = Config::default();
        config.query.max_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
