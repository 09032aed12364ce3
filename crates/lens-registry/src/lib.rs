//! Operator and aggregate-function allowlist
//!
//! The registry is the closed world a query specification is checked against:
//! a name that does not map to a registered operator or function is rejected,
//! and a registered one is only usable on the scalar kinds its signature lists.

use lens_ir::{AggregateFunction, FilterOperator, ScalarKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Operator not allowed: {0}")]
    UnknownOperator(String),

    #[error("Function not allowed: {0}")]
    UnknownFunction(String),

    #[error("Operator {operator} cannot be applied to a {kind} field (allowed on: {})", kinds(.accepted))]
    OperatorKindMismatch {
        operator: FilterOperator,
        kind: ScalarKind,
        accepted: Vec<ScalarKind>,
    },

    #[error("Function {function} cannot be applied to a {kind} field (allowed on: {})", kinds(.accepted))]
    FunctionKindMismatch {
        function: AggregateFunction,
        kind: ScalarKind,
        accepted: Vec<ScalarKind>,
    },
}

fn kinds(accepted: &[ScalarKind]) -> String {
    accepted
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

const ALL_KINDS: [ScalarKind; 7] = [
    ScalarKind::Text,
    ScalarKind::Integer,
    ScalarKind::Decimal,
    ScalarKind::Boolean,
    ScalarKind::Date,
    ScalarKind::DateTime,
    ScalarKind::Choice,
];

const ORDERED_KINDS: [ScalarKind; 5] = [
    ScalarKind::Integer,
    ScalarKind::Decimal,
    ScalarKind::Date,
    ScalarKind::DateTime,
    ScalarKind::Text,
];

/// Shape of the literal an operator takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    /// One value of the field's kind
    Scalar,
    /// `[low, high]`, both of the field's kind
    Pair,
    /// Non-empty list of values of the field's kind
    List,
    /// Boolean switch (`is-null: true`)
    Flag,
    /// Text searched for inside the field
    Needle,
    /// Whole number in `min..=max`, compared to a part of a date
    DatePart { min: i64, max: i64 },
}

/// Kind of an aggregate's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Fixed(ScalarKind),
    SameAsInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorSignature {
    pub operator: FilterOperator,
    pub accepts: Vec<ScalarKind>,
    pub shape: ValueShape,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub function: AggregateFunction,
    pub accepts: Vec<ScalarKind>,
    pub result: ResultKind,
}

impl FunctionSignature {
    pub fn result_kind(&self, input: ScalarKind) -> ScalarKind {
        match self.result {
            ResultKind::Fixed(kind) => kind,
            ResultKind::SameAsInput => input,
        }
    }
}

pub struct Registry {
    operators: HashMap<FilterOperator, OperatorSignature>,
    functions: HashMap<AggregateFunction, FunctionSignature>,
    operator_names: HashMap<String, FilterOperator>,
    function_names: HashMap<String, AggregateFunction>,
    version: String, // Semver for prompt/plan compatibility
}

impl Registry {
    pub fn new(version: impl Into<String>) -> Self {
        let mut registry = Self {
            operators: HashMap::new(),
            functions: HashMap::new(),
            operator_names: HashMap::new(),
            function_names: HashMap::new(),
            version: version.into(),
        };
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        use FilterOperator::*;

        // Comparison
        self.register_operator(Equals, &ALL_KINDS, ValueShape::Scalar, "field equals value");
        self.register_operator(NotEquals, &ALL_KINDS, ValueShape::Scalar, "field differs from value");
        self.register_operator(GreaterThan, &ORDERED_KINDS, ValueShape::Scalar, "field > value");
        self.register_operator(GreaterOrEqual, &ORDERED_KINDS, ValueShape::Scalar, "field >= value");
        self.register_operator(LessThan, &ORDERED_KINDS, ValueShape::Scalar, "field < value");
        self.register_operator(LessOrEqual, &ORDERED_KINDS, ValueShape::Scalar, "field <= value");
        self.register_operator(Range, &ORDERED_KINDS, ValueShape::Pair, "low <= field <= high, value is [low, high]");

        // String
        let textual = [ScalarKind::Text, ScalarKind::Choice];
        self.register_operator(Contains, &textual, ValueShape::Needle, "field contains the text (case-sensitive)");
        self.register_operator(IContains, &textual, ValueShape::Needle, "field contains the text, ignoring case");
        self.register_operator(StartsWith, &textual, ValueShape::Needle, "field starts with the text");
        self.register_operator(EndsWith, &textual, ValueShape::Needle, "field ends with the text");

        // Membership
        let listable = [
            ScalarKind::Text,
            ScalarKind::Integer,
            ScalarKind::Decimal,
            ScalarKind::Date,
            ScalarKind::DateTime,
            ScalarKind::Choice,
        ];
        self.register_operator(InSet, &listable, ValueShape::List, "field is one of the listed values");

        // Null checks
        self.register_operator(IsNull, &ALL_KINDS, ValueShape::Flag, "true: field is null, false: field is not null");

        // Date extractors
        let temporal = [ScalarKind::Date, ScalarKind::DateTime];
        let part = |min, max| ValueShape::DatePart { min, max };
        self.register_operator(Year, &temporal, part(1, 9999), "calendar year of the field equals value");
        self.register_operator(Quarter, &temporal, part(1, 4), "quarter (1-4) of the field equals value");
        self.register_operator(Month, &temporal, part(1, 12), "month (1-12) of the field equals value");
        self.register_operator(Week, &temporal, part(1, 53), "ISO week (1-53) of the field equals value");
        self.register_operator(Day, &temporal, part(1, 31), "day of month (1-31) of the field equals value");
        self.register_operator(WeekDay, &temporal, part(1, 7), "day of week (1 = Sunday, 7 = Saturday) equals value");

        for (name, op) in [
            ("exact", Equals),
            ("eq", Equals),
            ("=", Equals),
            ("==", Equals),
            ("ne", NotEquals),
            ("neq", NotEquals),
            ("!=", NotEquals),
            ("gt", GreaterThan),
            (">", GreaterThan),
            ("gte", GreaterOrEqual),
            (">=", GreaterOrEqual),
            ("lt", LessThan),
            ("<", LessThan),
            ("lte", LessOrEqual),
            ("<=", LessOrEqual),
            ("between", Range),
            ("i-contains", IContains),
            ("startswith", StartsWith),
            ("endswith", EndsWith),
            ("in", InSet),
            ("isnull", IsNull),
            ("weekday", WeekDay),
            ("day-of-week", WeekDay),
            ("iso-week", Week),
        ] {
            self.operator_names.insert(name.to_string(), op);
        }

        // Standard aggregates
        let numeric = [ScalarKind::Integer, ScalarKind::Decimal];
        let orderable = ORDERED_KINDS;
        self.register_function(
            AggregateFunction::Count,
            &ALL_KINDS,
            ResultKind::Fixed(ScalarKind::Integer),
        );
        self.register_function(AggregateFunction::Sum, &numeric, ResultKind::SameAsInput);
        self.register_function(
            AggregateFunction::Average,
            &numeric,
            ResultKind::Fixed(ScalarKind::Decimal),
        );
        self.register_function(AggregateFunction::Minimum, &orderable, ResultKind::SameAsInput);
        self.register_function(AggregateFunction::Maximum, &orderable, ResultKind::SameAsInput);

        for (name, func) in [
            ("avg", AggregateFunction::Average),
            ("mean", AggregateFunction::Average),
            ("min", AggregateFunction::Minimum),
            ("max", AggregateFunction::Maximum),
        ] {
            self.function_names.insert(name.to_string(), func);
        }
    }

    pub fn register_operator(
        &mut self,
        operator: FilterOperator,
        accepts: &[ScalarKind],
        shape: ValueShape,
        description: &str,
    ) {
        self.operator_names
            .insert(operator.as_str().to_string(), operator);
        self.operators.insert(
            operator,
            OperatorSignature {
                operator,
                accepts: accepts.to_vec(),
                shape,
                description: description.to_string(),
            },
        );
    }

    pub fn register_function(
        &mut self,
        function: AggregateFunction,
        accepts: &[ScalarKind],
        result: ResultKind,
    ) {
        self.function_names
            .insert(function.as_str().to_string(), function);
        self.functions.insert(
            function,
            FunctionSignature {
                function,
                accepts: accepts.to_vec(),
                result,
            },
        );
    }

    /// Map an operator name (canonical or alias, any case, `_`/`-`/space) to the allowlist
    pub fn parse_operator(&self, name: &str) -> Result<FilterOperator, RegistryError> {
        self.operator_names
            .get(&normalize(name))
            .copied()
            .ok_or_else(|| RegistryError::UnknownOperator(name.to_string()))
    }

    pub fn parse_function(&self, name: &str) -> Result<AggregateFunction, RegistryError> {
        self.function_names
            .get(&normalize(name))
            .copied()
            .ok_or_else(|| RegistryError::UnknownFunction(name.to_string()))
    }

    pub fn lookup_operator(
        &self,
        operator: FilterOperator,
        kind: ScalarKind,
    ) -> Result<&OperatorSignature, RegistryError> {
        let sig = self
            .operators
            .get(&operator)
            .ok_or_else(|| RegistryError::UnknownOperator(operator.as_str().to_string()))?;

        if sig.accepts.contains(&kind) {
            Ok(sig)
        } else {
            Err(RegistryError::OperatorKindMismatch {
                operator,
                kind,
                accepted: sig.accepts.clone(),
            })
        }
    }

    pub fn lookup_function(
        &self,
        function: AggregateFunction,
        kind: ScalarKind,
    ) -> Result<&FunctionSignature, RegistryError> {
        let sig = self
            .functions
            .get(&function)
            .ok_or_else(|| RegistryError::UnknownFunction(function.as_str().to_string()))?;

        if sig.accepts.contains(&kind) {
            Ok(sig)
        } else {
            Err(RegistryError::FunctionKindMismatch {
                function,
                kind,
                accepted: sig.accepts.clone(),
            })
        }
    }

    /// Operator signatures in declaration order
    pub fn operators(&self) -> Vec<&OperatorSignature> {
        FilterOperator::ALL
            .iter()
            .filter_map(|op| self.operators.get(op))
            .collect()
    }

    pub fn functions(&self) -> Vec<&FunctionSignature> {
        AggregateFunction::ALL
            .iter()
            .filter_map(|f| self.functions.get(f))
            .collect()
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new("0.1.0")
    }
}

fn normalize(name: &str) -> String {
    name.trim()
        .to_ascii_lowercase()
        .replace(['_', ' '], "-")
}
