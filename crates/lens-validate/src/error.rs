use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The rule a rejected specification broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Violation {
    MalformedSpecification,
    UnresolvedPath,
    DisallowedOperator,
    DisallowedFunction,
    InvalidLiteral,
    AliasCollision,
    LimitExceeded,
    AmbiguousFanout,
}

impl Violation {
    pub fn as_str(self) -> &'static str {
        match self {
            Violation::MalformedSpecification => "MalformedSpecification",
            Violation::UnresolvedPath => "UnresolvedPath",
            Violation::DisallowedOperator => "DisallowedOperator",
            Violation::DisallowedFunction => "DisallowedFunction",
            Violation::InvalidLiteral => "InvalidLiteral",
            Violation::AliasCollision => "AliasCollision",
            Violation::LimitExceeded => "LimitExceeded",
            Violation::AmbiguousFanout => "AmbiguousFanout",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First violation found in a candidate specification.
///
/// `location` points into the candidate document (`filters[1].value`), and the
/// message is phrased so it can be fed back to the model verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{violation} at {location}: {message}")]
pub struct ValidationError {
    pub violation: Violation,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(violation: Violation, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violation,
            location: location.into(),
            path: None,
            message: message.into(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn malformed(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Violation::MalformedSpecification, location, message)
    }
}
