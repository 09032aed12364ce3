use lens_compile::CompileError;
use lens_duck::ExecutionError;
use lens_ir::SchemaError;
use lens_validate::{ValidationError, Violation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::llm::LlmError;

/// Why one proposal failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    MalformedSpecification,
    UnresolvedPath,
    DisallowedOperator,
    DisallowedFunction,
    InvalidLiteral,
    AliasCollision,
    LimitExceeded,
    AmbiguousFanout,
    UngroupedField,
    UnorderableKey,
    ExecutionFailure,
}

impl From<Violation> for FailureKind {
    fn from(violation: Violation) -> Self {
        match violation {
            Violation::MalformedSpecification => FailureKind::MalformedSpecification,
            Violation::UnresolvedPath => FailureKind::UnresolvedPath,
            Violation::DisallowedOperator => FailureKind::DisallowedOperator,
            Violation::DisallowedFunction => FailureKind::DisallowedFunction,
            Violation::InvalidLiteral => FailureKind::InvalidLiteral,
            Violation::AliasCollision => FailureKind::AliasCollision,
            Violation::LimitExceeded => FailureKind::LimitExceeded,
            Violation::AmbiguousFanout => FailureKind::AmbiguousFanout,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One failed attempt of the repair loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub message: String,
    /// The model output that failed, verbatim
    pub raw_specification: String,
}

impl AttemptFailure {
    pub fn new(attempt: u32, kind: FailureKind, message: impl Into<String>, raw: &str) -> Self {
        Self {
            attempt,
            kind,
            location: None,
            message: message.into(),
            raw_specification: raw.to_string(),
        }
    }

    pub fn from_validation(attempt: u32, error: ValidationError, raw: &str) -> Self {
        Self {
            attempt,
            kind: error.violation.into(),
            location: Some(error.location),
            message: error.message,
            raw_specification: raw.to_string(),
        }
    }

    pub fn from_compile(attempt: u32, error: CompileError, raw: &str) -> Self {
        let kind = match &error {
            CompileError::UngroupedField(_) => FailureKind::UngroupedField,
            CompileError::UnorderableKey(_) => FailureKind::UnorderableKey,
            CompileError::Registry(_) => FailureKind::DisallowedFunction,
        };
        Self::new(attempt, kind, error.to_string(), raw)
    }

    pub fn from_execution(attempt: u32, error: ExecutionError, raw: &str) -> Self {
        Self::new(attempt, FailureKind::ExecutionFailure, error.to_string(), raw)
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt {}: {}", self.attempt, self.kind)?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("No valid query after {} attempts: {}", .attempts.len(), chain(.attempts))]
    RetryBudgetExhausted { attempts: Vec<AttemptFailure> },

    #[error("Language model error: {0}")]
    Model(#[from] LlmError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

fn chain(attempts: &[AttemptFailure]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
