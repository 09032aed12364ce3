//! Credentials are checked before any model call. Every test here leaves
//! `OPENAI_API_KEY` unset or blank, so they may share the process.

use lens_engine::config::LlmConfig;
use lens_engine::{Config, ConfigError, EngineError, OpenAiModel, QueryEngine};

#[test]
fn test_engine_refuses_to_start_without_api_key() {
    std::env::remove_var("OPENAI_API_KEY");

    match QueryEngine::from_config(&Config::default()) {
        Err(EngineError::Configuration(ConfigError::MissingEnvVar(var))) => {
            assert_eq!(var, "OPENAI_API_KEY")
        }
        Err(other) => panic!("expected a configuration error, got {other}"),
        Ok(_) => panic!("engine started without credentials"),
    }
}

#[test]
fn test_model_client_needs_non_blank_key() {
    std::env::set_var("OPENAI_API_KEY", "   ");

    let result = OpenAiModel::from_config(&LlmConfig::default());
    assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));

    std::env::remove_var("OPENAI_API_KEY");
    let result = OpenAiModel::from_config(&LlmConfig::default());
    assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));
}
