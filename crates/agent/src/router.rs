//! Decision step: picks the handler that takes over the conversation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use triage_core::audit::{AuditCategory, AuditOutcome};
use triage_core::domain::conversation::{ToolCallRequest, Turn};
use triage_core::graph::{GraphDefinition, Next, NodeId};

use crate::errors::{ConstructionError, OrchestrationError};
use crate::graph::{Node, NodeContext, NodeOutput};
use crate::llm::{LanguageModel, ToolSpec};
use crate::tools::failure_payload;
use crate::trimmer::HistoryTrimmer;

pub const FALLBACK_REPLY: &str =
    "Sorry, I could not work out how to help with that. Could you rephrase your request?";

#[derive(Clone, Debug, PartialEq)]
pub enum RoutingDecision {
    Handoff { target: NodeId },
    Correction { reason: String, rejected: ToolCallRequest },
    Terminate { final_turn: Turn },
}

/// One selectable handler, advertised to the model as a zero-argument tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffTarget {
    pub node: NodeId,
    pub when: String,
}

impl HandoffTarget {
    pub fn new(node: impl Into<NodeId>, when: impl Into<String>) -> Self {
        Self { node: node.into(), when: when.into() }
    }
}

pub struct DecisionStep {
    id: NodeId,
    directive: String,
    targets: Vec<HandoffTarget>,
    specs: Vec<ToolSpec>,
    model: Arc<dyn LanguageModel>,
    trimmer: HistoryTrimmer,
    max_corrections: u32,
}

impl DecisionStep {
    /// Handoff targets must match the handler nodes the graph declares for
    /// this router, so unknown names are rejected here and not per turn.
    pub fn new(
        definition: &GraphDefinition,
        id: impl Into<NodeId>,
        directive: impl Into<String>,
        targets: Vec<HandoffTarget>,
        model: Arc<dyn LanguageModel>,
        trimmer: HistoryTrimmer,
        max_corrections: u32,
    ) -> Result<Self, ConstructionError> {
        let id = id.into();
        let declared = definition.handoff_targets(&id);

        if let Some(target) = targets.iter().find(|target| !declared.contains(&target.node)) {
            return Err(ConstructionError::Component {
                component: "decision_step",
                message: format!("handoff `{}` is not declared for router `{id}`", target.node),
            });
        }
        if let Some(missing) =
            declared.iter().find(|node| !targets.iter().any(|target| &target.node == *node))
        {
            return Err(ConstructionError::Component {
                component: "decision_step",
                message: format!("router `{id}` declares `{missing}` but gives it no description"),
            });
        }

        let specs = targets
            .iter()
            .map(|target| ToolSpec::handoff(target.node.as_str(), target.when.as_str()))
            .collect();

        Ok(Self {
            id,
            directive: directive.into(),
            targets,
            specs,
            model,
            trimmer,
            max_corrections,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    fn resolve_target(&self, name: &str) -> Option<&NodeId> {
        self.targets.iter().map(|target| &target.node).find(|node| node.as_str() == name)
    }

    fn target_list(&self) -> String {
        self.targets.iter().map(|target| target.node.as_str()).collect::<Vec<_>>().join(", ")
    }

    /// Trims the history, asks the model, and classifies its answer.
    pub async fn decide(
        &self,
        history: &[Turn],
        reentries: u32,
    ) -> Result<RoutingDecision, OrchestrationError> {
        let mut turns = vec![Turn::system(self.directive.clone())];
        turns.extend(self.trimmer.trim(history));

        let reply = self
            .model
            .invoke(&turns, &self.specs)
            .await
            .map_err(|source| OrchestrationError::Model { node: self.id.clone(), source })?;

        let Some(first) = reply.tool_calls.first().cloned() else {
            return Ok(RoutingDecision::Terminate { final_turn: reply });
        };

        if let Some(target) = self.resolve_target(&first.name) {
            return Ok(RoutingDecision::Handoff { target: target.clone() });
        }

        if reentries >= self.max_corrections {
            return Ok(RoutingDecision::Terminate { final_turn: Turn::assistant(FALLBACK_REPLY) });
        }

        Ok(RoutingDecision::Correction {
            reason: format!(
                "`{}` is not a known assistant; available assistants are: {}",
                first.name,
                self.target_list()
            ),
            rejected: first,
        })
    }

    fn corrective_instruction(&self, rejected: &str) -> String {
        format!(
            "The assistant `{rejected}` does not exist. Route the conversation using exactly one \
             of: {}, or answer the user directly.",
            self.target_list()
        )
    }
}

#[async_trait]
impl Node for DecisionStep {
    async fn invoke(&self, context: NodeContext<'_>) -> Result<NodeOutput, OrchestrationError> {
        let decision = self.decide(context.history, context.reentries).await?;
        let session = context.session;

        match decision {
            RoutingDecision::Handoff { target } => {
                info!(
                    event_name = "router.handoff",
                    session_id = %session.session_id,
                    node = %self.id,
                    target = %target,
                    "handing conversation to handler"
                );
                session.record(
                    &self.id,
                    "router.handoff",
                    AuditCategory::Routing,
                    AuditOutcome::Success,
                    &[("target", target.to_string())],
                );
                Ok(NodeOutput::goto(Next::Node(target), Vec::new()))
            }
            RoutingDecision::Correction { reason, rejected } => {
                warn!(
                    event_name = "router.correction",
                    session_id = %session.session_id,
                    node = %self.id,
                    tool = %rejected.name,
                    tool_call_id = %rejected.id,
                    reentries = context.reentries,
                    "model selected an unknown handler"
                );
                session.record(
                    &self.id,
                    "router.correction",
                    AuditCategory::Routing,
                    AuditOutcome::Rejected,
                    &[
                        ("selected", rejected.name.clone()),
                        ("attempt", (context.reentries + 1).to_string()),
                    ],
                );

                let instruction = self.corrective_instruction(&rejected.name);
                let call_id = rejected.id.clone();
                let delta = vec![
                    Turn::assistant_with_tool_calls("", vec![rejected]),
                    Turn::tool_result(call_id, failure_payload("invalid_routing", &reason)),
                    Turn::user(instruction),
                ];
                Ok(NodeOutput::goto(Next::Node(self.id.clone()), delta))
            }
            RoutingDecision::Terminate { final_turn } => {
                let exhausted = context.reentries >= self.max_corrections
                    && final_turn.text_content() == FALLBACK_REPLY;
                let event_type =
                    if exhausted { "router.corrections_exhausted" } else { "router.terminate" };
                info!(
                    event_name = event_type,
                    session_id = %session.session_id,
                    node = %self.id,
                    reentries = context.reentries,
                    "router answered directly"
                );
                session.record(
                    &self.id,
                    event_type,
                    AuditCategory::Routing,
                    if exhausted { AuditOutcome::Failed } else { AuditOutcome::Success },
                    &[],
                );
                Ok(NodeOutput::goto(Next::End, vec![final_turn]))
            }
        }
    }
}
