//! Tool registry used by the ReAct loop.
//!
//! Every tool is registered with explicit [`ToolMetadata`]: a name, a
//! description and a list of typed [`ToolParameter`]s. Arguments supplied by
//! the model are validated against that schema before the capability runs.
//!
//! ```rust
//! use miniagent::{ToolKit, ToolMetadata, ToolParameter, ToolParameterType};
//! use serde_json::json;
//!
//! let mut toolkit = ToolKit::new();
//! toolkit.register_fn(
//!     ToolMetadata::new("add", "Adds two numbers")
//!         .with_parameter(ToolParameter::new("a", ToolParameterType::Number).required())
//!         .with_parameter(ToolParameter::new("b", ToolParameterType::Number).required()),
//!     |args| {
//!         let a = args["a"].as_f64().unwrap_or(0.0);
//!         let b = args["b"].as_f64().unwrap_or(0.0);
//!         Ok(json!(a + b))
//!     },
//! );
//! assert!(toolkit.contains("add"));
//! ```

use crate::miniagent::error::{BoxError, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Defines the type of a tool parameter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }

    /// Whether `value` is acceptable for this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ToolParameterType::String => value.is_string(),
            ToolParameterType::Number => value.is_number(),
            ToolParameterType::Integer => value.is_i64() || value.is_u64(),
            ToolParameterType::Boolean => value.is_boolean(),
            ToolParameterType::Array => value.is_array(),
            ToolParameterType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ToolParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Defines a parameter for a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
    /// For array types, specifies the type of items
    pub items: Option<ToolParameterType>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
            items: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the argument as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value used when the model omits an optional parameter.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// For array parameters, declare the type of the contained items.
    pub fn with_items(mut self, item_type: ToolParameterType) -> Self {
        self.items = Some(item_type);
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type.as_str()));
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        if let Some(items) = &self.items {
            schema.insert("items".into(), json!({ "type": items.as_str() }));
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        Value::Object(schema)
    }
}

/// Declared signature of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter definition to the tool metadata.
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// JSON-schema object describing the arguments.
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `arguments` against the declared parameters and fill in defaults.
    pub fn validate(&self, arguments: Value) -> Result<Value, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: self.name.clone(),
            reason,
        };
        let mut args = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            Value::String(raw) => {
                return Err(invalid(format!("arguments are not valid JSON: {}", raw)))
            }
            other => return Err(invalid(format!("expected an object, got {}", other))),
        };

        if let Some(unknown) = args
            .keys()
            .find(|k| !self.parameters.iter().any(|p| &p.name == *k))
        {
            return Err(invalid(format!("unknown parameter '{}'", unknown)));
        }

        for param in &self.parameters {
            match args.get(&param.name) {
                Some(value) if !param.param_type.matches(value) => {
                    return Err(invalid(format!(
                        "parameter '{}' must be of type {}",
                        param.name, param.param_type
                    )));
                }
                Some(Value::Array(items)) => {
                    if let Some(item_type) = &param.items {
                        if items.iter().any(|item| !item_type.matches(item)) {
                            return Err(invalid(format!(
                                "items of '{}' must be of type {}",
                                param.name, item_type
                            )));
                        }
                    }
                }
                Some(_) => {}
                None if param.required => {
                    return Err(invalid(format!("missing required parameter '{}'", param.name)));
                }
                None => {
                    if let Some(default) = &param.default {
                        args.insert(param.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(Value::Object(args))
    }
}

/// Type alias for synchronous tool functions.
pub type ToolFunction = Arc<dyn Fn(Value) -> Result<Value, BoxError> + Send + Sync>;

/// Type alias for asynchronous tool functions.
pub type AsyncToolFunction = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>> + Send + Sync,
>;

#[derive(Clone)]
enum ToolHandler {
    Sync(ToolFunction),
    Async(AsyncToolFunction),
}

#[derive(Clone)]
struct ToolEntry {
    metadata: ToolMetadata,
    handler: ToolHandler,
}

/// Registry mapping unique tool names to capabilities.
///
/// Registering a name that already exists replaces the previous entry and keeps
/// its position in [`ToolKit::schemas`].
#[derive(Clone, Default)]
pub struct ToolKit {
    tools: HashMap<String, ToolEntry>,
    order: Vec<String>,
}

impl ToolKit {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, metadata: ToolMetadata, handler: ToolHandler) {
        let name = metadata.name.clone();
        if self.tools.contains_key(&name) {
            log::debug!("ToolKit::register({}): replacing existing tool", name);
        } else {
            self.order.push(name.clone());
        }
        self.tools.insert(name, ToolEntry { metadata, handler });
    }

    /// Register a synchronous tool function.
    pub fn register(&mut self, metadata: ToolMetadata, function: ToolFunction) {
        self.insert(metadata, ToolHandler::Sync(function));
    }

    /// Register an asynchronous tool function.
    pub fn register_async(&mut self, metadata: ToolMetadata, function: AsyncToolFunction) {
        self.insert(metadata, ToolHandler::Async(function));
    }

    /// Register a plain closure as a synchronous tool.
    pub fn register_fn<F>(&mut self, metadata: ToolMetadata, function: F)
    where
        F: Fn(Value) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.register(metadata, Arc::new(function));
    }

    /// Register an async closure as a tool.
    pub fn register_async_fn<F, Fut>(&mut self, metadata: ToolMetadata, function: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let function: AsyncToolFunction = Arc::new(move |args| {
            let future: Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>> =
                Box::pin(function(args));
            future
        });
        self.register_async(metadata, function);
    }

    /// Remove a tool. Returns whether it existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.tools.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn metadata(&self, name: &str) -> Option<&ToolMetadata> {
        self.tools.get(name).map(|e| &e.metadata)
    }

    /// Metadata of every tool, in registration order.
    pub fn schemas(&self) -> Vec<ToolMetadata> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|e| e.metadata.clone())
            .collect()
    }

    /// Validate `arguments` and run the tool without a time limit.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let args = entry.metadata.validate(arguments)?;
        let result = match &entry.handler {
            ToolHandler::Async(function) => function(args).await,
            ToolHandler::Sync(function) => {
                let function = Arc::clone(function);
                match tokio::task::spawn_blocking(move || function(args)).await {
                    Ok(result) => result,
                    Err(join) => Err(Box::new(join) as BoxError),
                }
            }
        };
        result.map_err(|source| ToolError::Execution {
            tool: name.to_string(),
            source,
        })
    }

    /// Like [`invoke`](ToolKit::invoke), bounded by `timeout`. The result is
    /// rendered as text for a `tool` message.
    pub async fn invoke_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<String, ToolError> {
        log::debug!("ToolKit::invoke_with_timeout({}, {:?})", name, timeout);
        match tokio::time::timeout(timeout, self.invoke(name, arguments)).await {
            Ok(result) => result.map(|value| render_output(&value)),
            Err(_) => {
                log::warn!("ToolKit::invoke_with_timeout({}): timed out after {:?}", name, timeout);
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    timeout,
                })
            }
        }
    }
}

/// Text form of a tool result: strings verbatim, everything else as JSON.
pub fn render_output(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_metadata() -> ToolMetadata {
        ToolMetadata::new("echo", "Echo text back")
            .with_parameter(ToolParameter::new("text", ToolParameterType::String).required())
            .with_parameter(
                ToolParameter::new("times", ToolParameterType::Integer).with_default(json!(1)),
            )
    }

    #[test]
    fn test_validate_applies_defaults() {
        let args = echo_metadata().validate(json!({"text": "hi"})).unwrap();
        assert_eq!(args, json!({"text": "hi", "times": 1}));
    }

    #[test]
    fn test_validate_rejects_mismatches() {
        let meta = echo_metadata();
        assert!(meta.validate(json!({})).is_err());
        assert!(meta.validate(json!({"text": 3})).is_err());
        assert!(meta.validate(json!({"text": "a", "loud": true})).is_err());
        assert!(meta.validate(json!("{broken")).is_err());
        assert!(meta.validate(json!([1, 2])).is_err());
    }

    #[test]
    fn test_schema_lists_required() {
        let schema = echo_metadata().json_schema();
        assert_eq!(schema["required"], json!(["text"]));
        assert_eq!(schema["properties"]["times"]["type"], "integer");
    }

    #[test]
    fn test_reregister_keeps_order() {
        let mut toolkit = ToolKit::new();
        toolkit.register_fn(ToolMetadata::new("a", ""), |_| Ok(json!(1)));
        toolkit.register_fn(ToolMetadata::new("b", ""), |_| Ok(json!(2)));
        toolkit.register_fn(ToolMetadata::new("a", "new"), |_| Ok(json!(3)));
        assert_eq!(toolkit.names(), vec!["a", "b"]);
        assert_eq!(toolkit.metadata("a").unwrap().description, "new");
        assert!(toolkit.unregister("a"));
        assert_eq!(toolkit.names(), vec!["b"]);
    }
}
