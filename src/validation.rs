//! Schema validation adapter.
//!
//! Routes declare schemas for their body, search params, path params and
//! response as `Arc<dyn Schema>`. Two backends are provided:
//!
//! - [`Validated<T>`]: serde deserialization into `T` followed by the
//!   `validator` crate's `Validate` rules. The output is `T` serialized back,
//!   so defaults and renames are normalized.
//! - [`JsonSchema`]: a compiled JSON Schema document. The input passes
//!   through unchanged when valid.
//!
//! The backend is picked when the route is declared; nothing downstream
//! knows which one is in use.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::ApiError;

/// Which part of the request (or response) failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTarget {
    Body,
    SearchParams,
    Params,
    Response,
}

impl ValidationTarget {
    /// Message key the error translator resolves into user-facing text.
    pub fn message_key(&self) -> &'static str {
        match self {
            ValidationTarget::Body => "unprocessable.body",
            ValidationTarget::SearchParams => "unprocessable.searchParams",
            ValidationTarget::Params => "unprocessable.params",
            ValidationTarget::Response => "unprocessable.response",
        }
    }
}

impl fmt::Display for ValidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message_key())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{}", .issues.join("; "))]
pub struct SchemaError {
    pub issues: Vec<String>,
}

impl SchemaError {
    pub fn new(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
        }
    }
}

/// Capability every validation backend implements.
pub trait Schema: Send + Sync {
    /// Validates `data`, returning the (possibly normalized) value.
    fn validate(&self, data: Value) -> Result<Value, SchemaError>;
}

pub type SharedSchema = Arc<dyn Schema>;

/// Runs `data` through `schema`, tagging failures with `target`.
pub fn parse(data: Value, schema: &dyn Schema, target: ValidationTarget) -> Result<Value, ApiError> {
    schema.validate(data).map_err(|err| {
        tracing::debug!(target_kind = %target, issues = %err, "Schema validation failed");
        ApiError::validation(target, err.to_string())
    })
}

/// Backend built on serde + the `validator` crate.
pub struct Validated<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Validated<T>
where
    T: DeserializeOwned + Serialize + Validate + 'static,
{
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn shared() -> SharedSchema {
        Arc::new(Self::new())
    }
}

impl<T> Default for Validated<T>
where
    T: DeserializeOwned + Serialize + Validate + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Schema for Validated<T>
where
    T: DeserializeOwned + Serialize + Validate + 'static,
{
    fn validate(&self, data: Value) -> Result<Value, SchemaError> {
        let parsed: T = serde_json::from_value(data).map_err(|e| SchemaError::new(e.to_string()))?;
        parsed.validate().map_err(|errors| SchemaError {
            issues: flatten_errors(&errors, ""),
        })?;
        serde_json::to_value(&parsed).map_err(|e| SchemaError::new(e.to_string()))
    }
}

fn flatten_errors(errors: &ValidationErrors, prefix: &str) -> Vec<String> {
    let mut issues = Vec::new();
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for error in field_errors {
                    issues.push(format!("{}: {}", path, error.code));
                }
            }
            ValidationErrorsKind::Struct(nested) => {
                issues.extend(flatten_errors(nested, &path));
            }
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    issues.extend(flatten_errors(nested, &format!("{}[{}]", path, index)));
                }
            }
        }
    }
    issues
}

/// Backend built on a compiled JSON Schema document.
pub struct JsonSchema {
    validator: jsonschema::Validator,
}

impl JsonSchema {
    pub fn new(document: &Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(document)
            .map_err(|e| SchemaError::new(format!("invalid schema document: {}", e)))?;
        Ok(Self { validator })
    }

    pub fn shared(document: &Value) -> Result<SharedSchema, SchemaError> {
        Ok(Arc::new(Self::new(document)?))
    }
}

impl Schema for JsonSchema {
    fn validate(&self, data: Value) -> Result<Value, SchemaError> {
        let issues: Vec<String> = self
            .validator
            .iter_errors(&data)
            .map(|error| error.to_string())
            .collect();

        if issues.is_empty() {
            Ok(data)
        } else {
            Err(SchemaError { issues })
        }
    }
}
