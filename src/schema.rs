//! JSON Schema validation for step inputs and outputs.

use std::sync::Arc;

use jsonschema::{Draft, Validator};
use serde_json::Value;

use crate::error::{RatchetError, Result};

/// A compiled JSON Schema (Draft 2020-12), or the permissive schema that
/// accepts anything.
#[derive(Clone)]
pub struct Schema {
    source: Value,
    validator: Option<Arc<Validator>>,
}

impl Schema {
    /// Compile a schema document.
    pub fn compile(source: Value) -> Result<Self> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&source)
            .map_err(|e| RatchetError::InvalidPipeline(format!("invalid schema: {}", e)))?;
        Ok(Self {
            source,
            validator: Some(Arc::new(validator)),
        })
    }

    /// Schema that accepts every value.
    pub fn any() -> Self {
        Self {
            source: Value::Bool(true),
            validator: None,
        }
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Validate an instance, collecting every violation message.
    pub fn validate(&self, instance: &Value) -> std::result::Result<(), Vec<String>> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        if validator.is_valid(instance) {
            return Ok(());
        }
        Err(validator.iter_errors(instance).map(|err| err.to_string()).collect())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::any()
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema").field("source", &self.source).finish()
    }
}
