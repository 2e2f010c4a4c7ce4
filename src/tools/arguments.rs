//! Structured tool call arguments.

use serde_json::{Map, Value};

use crate::error::TetherError;

use super::definition::ToolDefinition;
use super::validation::validate_arguments;

/// Arguments for one tool call, always a JSON object.
///
/// Models sometimes send the argument object as a JSON-encoded string; that
/// form is accepted and decoded. Anything that does not decode to an object is
/// rejected with [`TetherError::ArgumentValidation`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    value: Map<String, Value>,
}

impl ToolArguments {
    pub fn new(value: Map<String, Value>) -> Self {
        Self { value }
    }

    /// Coerce raw model output into an argument object.
    pub fn from_value(tool_name: &str, value: Value) -> Result<Self, TetherError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self::new(map)),
            Value::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(Self::default());
                }
                let parsed: Value =
                    serde_json::from_str(trimmed).map_err(|e| TetherError::ArgumentValidation {
                        tool_name: tool_name.to_string(),
                        message: format!("arguments must be valid JSON: {e}"),
                    })?;
                match parsed {
                    Value::String(_) => Err(TetherError::ArgumentValidation {
                        tool_name: tool_name.to_string(),
                        message: "arguments must be a JSON object; got a nested string".into(),
                    }),
                    other => Self::from_value(tool_name, other),
                }
            }
            other => Err(TetherError::ArgumentValidation {
                tool_name: tool_name.to_string(),
                message: format!("arguments must be a JSON object; got {other}"),
            }),
        }
    }

    /// Coerce and check against the tool's input schema.
    pub fn parse(definition: &ToolDefinition, value: Value) -> Result<Self, TetherError> {
        let arguments = Self::from_value(&definition.name, value)?;
        validate_arguments(&arguments.to_value(), &definition.input_schema).map_err(|message| {
            TetherError::ArgumentValidation {
                tool_name: definition.name.clone(),
                message,
            }
        })?;
        Ok(arguments)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.value
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.value
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.value.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.value.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.value.get(key).and_then(Value::as_f64)
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(
        &self,
        tool_name: &str,
    ) -> Result<T, TetherError> {
        serde_json::from_value(self.to_value()).map_err(|e| TetherError::ArgumentValidation {
            tool_name: tool_name.to_string(),
            message: format!("failed to deserialize arguments: {e}"),
        })
    }
}

impl From<Map<String, Value>> for ToolArguments {
    fn from(value: Map<String, Value>) -> Self {
        Self::new(value)
    }
}
