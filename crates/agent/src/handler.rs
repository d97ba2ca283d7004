use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use triage_core::audit::{AuditCategory, AuditOutcome};
use triage_core::domain::conversation::Turn;
use triage_core::graph::{GraphDefinition, Next, NodeId, NodeKind, NodeSpec};

use crate::binding::CapabilityBinding;
use crate::errors::{ConstructionError, OrchestrationError};
use crate::graph::{Node, NodeContext, NodeOutput};
use crate::llm::{LanguageModel, ToolSpec};
use crate::tools::ToolRegistry;

/// One capability handler. All handlers share this shape and differ only in
/// their bound tools and system directive.
pub struct HandlerNode {
    id: NodeId,
    tools_node: NodeId,
    directive: Option<String>,
    specs: Vec<ToolSpec>,
    model: Arc<dyn LanguageModel>,
}

impl HandlerNode {
    pub fn new(
        definition: &GraphDefinition,
        id: impl Into<NodeId>,
        directive: Option<String>,
        binding: &CapabilityBinding,
        registry: &ToolRegistry,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self, ConstructionError> {
        let id = id.into();
        let tools_node = match definition.node(&id) {
            Some(NodeSpec { kind: NodeKind::Handler { tools }, .. }) => tools.clone(),
            _ => {
                return Err(ConstructionError::Component {
                    component: "handler",
                    message: format!("`{id}` is not declared as a handler node"),
                })
            }
        };

        Ok(Self { specs: registry.specs_for(binding, &id), id, tools_node, directive, model })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn tool_specs(&self) -> &[ToolSpec] {
        &self.specs
    }
}

#[async_trait]
impl Node for HandlerNode {
    async fn invoke(&self, context: NodeContext<'_>) -> Result<NodeOutput, OrchestrationError> {
        // the directive is sent with every call but never stored in history
        let mut turns = Vec::with_capacity(context.history.len() + 1);
        if let Some(directive) = &self.directive {
            turns.push(Turn::system(directive.clone()));
        }
        turns.extend_from_slice(context.history);

        let reply = self
            .model
            .invoke(&turns, &self.specs)
            .await
            .map_err(|source| OrchestrationError::Model { node: self.id.clone(), source })?;

        let session = context.session;
        if reply.has_tool_calls() {
            let requested =
                reply.tool_calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>().join(",");
            info!(
                event_name = "handler.tool_calls",
                session_id = %session.session_id,
                node = %self.id,
                tool = %requested,
                count = reply.tool_calls.len(),
                "handler requested tools"
            );
            session.record(
                &self.id,
                "handler.tool_calls",
                AuditCategory::Handler,
                AuditOutcome::Success,
                &[("tools", requested)],
            );
            return Ok(NodeOutput::goto(Next::Node(self.tools_node.clone()), vec![reply]));
        }

        info!(
            event_name = "handler.reply",
            session_id = %session.session_id,
            node = %self.id,
            "handler produced final reply"
        );
        session.record(&self.id, "handler.reply", AuditCategory::Handler, AuditOutcome::Success, &[]);
        Ok(NodeOutput::follow_edge(vec![reply]))
    }
}
