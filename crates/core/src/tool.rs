//! Tool registry.
//!
//! Tools are registered once at startup and looked up by name when the model
//! requests them. Every failure on the way (unknown name, bad arguments, a
//! failing capability) is folded into result text for the model to read.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::message::{ToolCallRequest, ToolResult};

/// A capability the model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the argument object.
    fn input_schema(&self) -> Value;

    /// Run the tool with arguments already checked against the schema.
    async fn call(&self, arguments: Value) -> Result<String, ToolError>;
}

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Errors raised while resolving or running a tool.
///
/// The `Display` text is what the model receives as the tool result.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}. Available tools: {}", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("{0}")]
    Execution(String),

    #[error("Tool already registered: {0}")]
    Duplicate(String),
}

/// Deserialize validated arguments into a tool's typed parameter struct.
pub fn parse_arguments<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool.into(),
        reason: e.to_string(),
    })
}

/// Fixed set of tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    schemas: Vec<ToolSchema>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }

        debug!(tool = %name, "Registering tool");
        self.schemas.push(ToolSchema {
            name: name.clone(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
        });
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Schemas of every registered tool, in registration order.
    pub fn describe_all(&self) -> &[ToolSchema] {
        &self.schemas
    }

    pub fn names(&self) -> Vec<&str> {
        self.schemas.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn resolve(&self, name: &str) -> Result<&dyn Tool, ToolError> {
        self.index
            .get(name)
            .map(|&i| self.tools[i].as_ref())
            .ok_or_else(|| ToolError::NotFound {
                name: name.into(),
                available: self.names().into_iter().map(String::from).collect(),
            })
    }

    /// Validate arguments against the tool's schema, then run it.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let tool = self.resolve(name)?;
        let schema = &self.schemas[self.index[name]].input_schema;
        let arguments =
            validate_arguments(schema, arguments).map_err(|reason| ToolError::InvalidArguments {
                tool: name.into(),
                reason,
            })?;
        tool.call(arguments).await
    }

    /// Run one call and fold any failure into the result text.
    pub async fn dispatch(&self, call: &ToolCallRequest) -> ToolResult {
        match self.execute(&call.name, call.arguments.clone()).await {
            Ok(text) => ToolResult::ok(&call.id, text),
            Err(e) => {
                warn!(tool = %call.name, id = %call.id, error = %e, "Tool call failed");
                ToolResult::error(&call.id, e.to_string())
            }
        }
    }
}

/// Check arguments against the subset of JSON Schema the tools use.
///
/// `null` stands for "no arguments" and is normalized to `{}`.
pub fn validate_arguments(schema: &Value, arguments: Value) -> Result<Value, String> {
    let arguments = match arguments {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    check_value(schema, &arguments, "arguments")?;
    Ok(arguments)
}

fn check_value(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(format!(
                "{path} must be of type {expected}, got {}",
                json_type(value)
            ));
        }
    }

    let Value::Object(map) = value else {
        return Ok(());
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    for key in &required {
        if map.get(*key).is_none_or(Value::is_null) {
            return Err(format!("missing required field `{key}`"));
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
    for (key, item) in map {
        match properties.and_then(|p| p.get(key)) {
            // Optional fields sent as null count as absent.
            Some(_) if item.is_null() => {}
            Some(sub) => check_value(sub, item, &format!("field `{key}`"))?,
            None if closed => return Err(format!("unexpected field `{key}`")),
            None => {}
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
