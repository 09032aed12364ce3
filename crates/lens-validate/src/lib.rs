//! Validation of model-proposed query specifications
//!
//! A candidate arrives as JSON from a language model and is treated as
//! untrusted input: every path is resolved against the schema graph, every
//! operator and function against the registry, and every literal is coerced
//! to the kind of the field it is compared with.

mod coerce;
mod error;
pub mod parser;
mod raw;
mod validator;

pub use coerce::{coerce_literal, coerce_scalar};
pub use error::{ValidationError, Violation};
pub use parser::{parse_path, ParseError};
pub use validator::{LimitPolicy, Validator, ValidatorOptions};
