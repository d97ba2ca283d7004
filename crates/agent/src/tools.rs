use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use crate::binding::CapabilityBinding;
use crate::llm::ToolSpec;
use triage_core::graph::NodeId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("tool `{tool}` is not available to `{node}`")]
    NotBound { tool: String, node: String },
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("tool `{tool}` timed out after {after_ms}ms")]
    Timeout { tool: String, after_ms: u64 },
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::NotBound { .. } => "not_bound",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Execution(_) => "execution",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Structured failure recorded as the tool turn's content.
    pub fn to_payload(&self) -> Value {
        failure_payload(self.kind(), &self.to_string())
    }
}

pub fn failure_payload(kind: &str, message: &str) -> Value {
    json!({ "success": false, "error": { "kind": kind, "message": message } })
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema of the argument object.
    fn argument_schema(&self) -> Value;

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name(), self.description(), self.argument_schema())
    }
}

/// Argument schema derived from a typed argument struct.
pub fn schema_of<A: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(A);
    serde_json::to_value(schema.schema)
        .unwrap_or_else(|_| json!({ "type": "object", "properties": {} }))
}

pub fn parse_arguments<A: DeserializeOwned>(tool: &str, arguments: Value) -> Result<A, ToolError> {
    serde_json::from_value(arguments).map_err(|error| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: error.to_string(),
    })
}

fn validate_arguments(tool: &str, schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let invalid =
        |message: String| ToolError::InvalidArguments { tool: tool.to_string(), message };

    let Some(object) = arguments.as_object() else {
        return Err(invalid("arguments must be a JSON object".to_string()));
    };

    let required = schema.get("required").and_then(Value::as_array).into_iter().flatten();
    for field in required.filter_map(Value::as_str) {
        match object.get(field) {
            Some(Value::Null) | None => {
                return Err(invalid(format!("missing required argument `{field}`")));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { tools: BTreeMap::new(), timeout }
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Signatures of the tools `node` may call, in name order.
    pub fn specs_for(&self, binding: &CapabilityBinding, node: &NodeId) -> Vec<ToolSpec> {
        binding
            .tools_for(node)
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    /// Validates `arguments` against the tool's schema, then runs it under the
    /// registry timeout.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        validate_arguments(name, &tool.argument_schema(), &arguments)?;

        match tokio::time::timeout(self.timeout, tool.execute(arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: name.to_string(),
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
