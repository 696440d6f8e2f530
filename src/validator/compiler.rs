//! Compiles project schemas into reusable request validators.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::store::SchemaDefinition;

/// One reason a payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// JSON pointer to the offending value (empty for the document root).
    pub path: String,
    pub message: String,
}

/// Result of running a validator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldError>,
}

impl ValidationReport {
    fn pass() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid schema: {0}")]
pub struct SchemaCompileError(pub String);

/// A compiled, stateless payload predicate.
///
/// Cloning is cheap: every module of a project shares one compiled schema.
#[derive(Clone, Default)]
pub struct Validator {
    compiled: Option<Arc<jsonschema::Validator>>,
}

impl Validator {
    /// A validator that accepts everything.
    pub fn noop() -> Self {
        Self { compiled: None }
    }

    pub fn is_noop(&self) -> bool {
        self.compiled.is_none()
    }

    /// Check a payload, collecting every violation.
    pub fn validate(&self, payload: &Value) -> ValidationReport {
        let Some(schema) = &self.compiled else {
            return ValidationReport::pass();
        };

        let errors: Vec<FieldError> = schema
            .iter_errors(payload)
            .map(|e| FieldError {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("noop", &self.is_noop())
            .finish()
    }
}

/// Compile a schema, failing on malformed definitions.
///
/// Empty schemas (`null`, `{}`) compile to the no-op validator.
pub fn try_compile(schema: &SchemaDefinition) -> Result<Validator, SchemaCompileError> {
    if schema.is_empty() {
        return Ok(Validator::noop());
    }

    jsonschema::validator_for(&schema.0)
        .map(|compiled| Validator {
            compiled: Some(Arc::new(compiled)),
        })
        .map_err(|e| SchemaCompileError(e.to_string()))
}

/// Outcome of [`compile`], kept so callers can report degraded projects.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub validator: Validator,
    pub fallback: Option<SchemaCompileError>,
}

/// Compile a project's optional schema, degrading to no-op on failure.
///
/// Availability wins over strictness: a malformed schema never blocks a
/// reload, it only disables validation for that project.
pub fn compile(project: &str, schema: Option<&SchemaDefinition>) -> Compiled {
    let Some(schema) = schema else {
        return Compiled {
            validator: Validator::noop(),
            fallback: None,
        };
    };

    match try_compile(schema) {
        Ok(validator) => Compiled {
            validator,
            fallback: None,
        },
        Err(e) => {
            tracing::warn!(project = %project, error = %e, "Schema failed to compile, validation disabled for project");
            Compiled {
                validator: Validator::noop(),
                fallback: Some(e),
            }
        }
    }
}
