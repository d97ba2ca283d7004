use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use triage_core::audit::{AuditCategory, AuditOutcome};
use triage_core::domain::conversation::{Role, Turn};
use triage_core::graph::{GraphDefinition, NodeId, NodeKind, NodeSpec};

use crate::binding::CapabilityBinding;
use crate::errors::{ConstructionError, OrchestrationError};
use crate::graph::{Node, NodeContext, NodeOutput};
use crate::tools::{ToolError, ToolRegistry};

/// Executes the tool calls of the owning handler's last turn, one result turn
/// per request in request order, then returns control to that handler.
pub struct ToolExecutionLoop {
    id: NodeId,
    handler: NodeId,
    registry: Arc<ToolRegistry>,
    binding: Arc<CapabilityBinding>,
}

impl ToolExecutionLoop {
    pub fn new(
        definition: &GraphDefinition,
        id: impl Into<NodeId>,
        registry: Arc<ToolRegistry>,
        binding: Arc<CapabilityBinding>,
    ) -> Result<Self, ConstructionError> {
        let id = id.into();
        let handler = match definition.node(&id) {
            Some(NodeSpec { kind: NodeKind::Tools { handler }, .. }) => handler.clone(),
            _ => {
                return Err(ConstructionError::Component {
                    component: "tool_loop",
                    message: format!("`{id}` is not declared as a tool node"),
                })
            }
        };
        Ok(Self { id, handler, registry, binding })
    }

    pub fn handler(&self) -> &NodeId {
        &self.handler
    }

    async fn execute_one(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        if !self.binding.allows(&self.handler, name) {
            if !self.registry.contains(name) {
                return Err(ToolError::UnknownTool(name.to_string()));
            }
            return Err(ToolError::NotBound {
                tool: name.to_string(),
                node: self.handler.to_string(),
            });
        }
        self.registry.execute(name, arguments).await
    }
}

#[async_trait]
impl Node for ToolExecutionLoop {
    async fn invoke(&self, context: NodeContext<'_>) -> Result<NodeOutput, OrchestrationError> {
        let request = context
            .history
            .iter()
            .rev()
            .find(|turn| turn.role == Role::Assistant)
            .filter(|turn| turn.has_tool_calls())
            .ok_or_else(|| {
                OrchestrationError::Invariant(format!(
                    "`{}` invoked without a pending tool-call turn",
                    self.id
                ))
            })?;

        let session = context.session;
        let mut delta = Vec::with_capacity(request.tool_calls.len());

        for call in &request.tool_calls {
            let arguments = Value::Object(call.arguments.clone());
            let payload = match self.execute_one(&call.name, arguments).await {
                Ok(payload) => {
                    info!(
                        event_name = "tool.executed",
                        session_id = %session.session_id,
                        node = %self.id,
                        tool = %call.name,
                        tool_call_id = %call.id,
                        "tool executed"
                    );
                    session.record(
                        &self.id,
                        "tool.executed",
                        AuditCategory::Tool,
                        AuditOutcome::Success,
                        &[("tool", call.name.clone()), ("tool_call_id", call.id.clone())],
                    );
                    payload
                }
                Err(error) => {
                    warn!(
                        event_name = "tool.failed",
                        session_id = %session.session_id,
                        node = %self.id,
                        tool = %call.name,
                        tool_call_id = %call.id,
                        error_kind = error.kind(),
                        error = %error,
                        "tool failed; recording failure payload"
                    );
                    session.record(
                        &self.id,
                        "tool.failed",
                        AuditCategory::Tool,
                        AuditOutcome::Failed,
                        &[
                            ("tool", call.name.clone()),
                            ("tool_call_id", call.id.clone()),
                            ("kind", error.kind().to_string()),
                        ],
                    );
                    error.to_payload()
                }
            };
            delta.push(Turn::tool_result(call.id.clone(), payload));
        }

        Ok(NodeOutput::follow_edge(delta))
    }
}
