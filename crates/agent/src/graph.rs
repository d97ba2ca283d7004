//! Async graph executor.
//!
//! The executor owns the [`ConversationState`] for one session. Each step it
//! hands the current node a read-only view of the history, applies the
//! returned delta, and resolves the node's directive against the static
//! [`GraphDefinition`]. Model and tool calls happen only inside node bodies.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use triage_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use triage_core::domain::conversation::{ConversationState, Turn};
use triage_core::graph::{Directive, GraphDefinition, Next, NodeId, NodeKind};

use crate::errors::{ConstructionError, OrchestrationError};

/// Per-session correlation data shared with every node.
#[derive(Clone)]
pub struct SessionContext {
    pub session_id: String,
    audit: Arc<dyn AuditSink>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, audit: Arc<dyn AuditSink>) -> Self {
        Self { session_id: session_id.into(), audit }
    }

    pub fn record(
        &self,
        node: &NodeId,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        self.emit(Some(node.to_string()), event_type, category, outcome, metadata);
    }

    /// Session-level event not tied to any node.
    pub fn record_session(&self, event_type: &str, outcome: AuditOutcome, metadata: &[(&str, String)]) {
        self.emit(None, event_type, AuditCategory::System, outcome, metadata);
    }

    fn emit(
        &self,
        node: Option<String>,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        let context = AuditContext::new(&self.session_id, "graph-executor");
        let event = metadata.iter().fold(
            AuditEvent::new(&context, node, event_type, category, outcome),
            |event, (key, value)| event.with_metadata(*key, value.clone()),
        );
        self.audit.emit(event);
    }
}

pub struct NodeContext<'a> {
    pub session: &'a SessionContext,
    pub node: &'a NodeId,
    pub history: &'a [Turn],
    /// Consecutive self-re-entries of `node`.
    pub reentries: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeOutput {
    pub delta: Vec<Turn>,
    pub directive: Directive,
}

impl NodeOutput {
    pub fn follow_edge(delta: Vec<Turn>) -> Self {
        Self { delta, directive: Directive::FollowEdge }
    }

    pub fn goto(next: Next, delta: Vec<Turn>) -> Self {
        Self { delta, directive: Directive::Goto(next) }
    }
}

#[async_trait]
pub trait Node: Send + Sync {
    async fn invoke(&self, context: NodeContext<'_>) -> Result<NodeOutput, OrchestrationError>;
}

/// A run that stopped early, with the history accumulated up to the failure.
#[derive(Debug)]
pub struct InterruptedRun {
    pub state: ConversationState,
    pub error: OrchestrationError,
}

pub struct GraphExecutor {
    definition: GraphDefinition,
    nodes: BTreeMap<NodeId, Arc<dyn Node>>,
    max_steps: u32,
}

impl GraphExecutor {
    /// Every declared node needs exactly one implementation.
    pub fn new(
        definition: GraphDefinition,
        nodes: BTreeMap<NodeId, Arc<dyn Node>>,
        max_steps: u32,
    ) -> Result<Self, ConstructionError> {
        if let Some(spec) = definition.nodes().find(|spec| !nodes.contains_key(&spec.id)) {
            return Err(ConstructionError::MissingNode(spec.id.clone()));
        }
        if let Some(id) = nodes.keys().find(|id| definition.node(id).is_none()) {
            return Err(ConstructionError::UndeclaredNode(id.clone()));
        }

        Ok(Self { definition, nodes, max_steps: max_steps.max(1) })
    }

    pub fn definition(&self) -> &GraphDefinition {
        &self.definition
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub async fn run(
        &self,
        mut state: ConversationState,
        session: &SessionContext,
    ) -> Result<ConversationState, InterruptedRun> {
        let mut steps = 0u32;

        loop {
            if steps >= self.max_steps {
                warn!(
                    event_name = "graph.run.step_limit",
                    session_id = %session.session_id,
                    node = %state.current_node,
                    limit = self.max_steps,
                    "graph exceeded step limit"
                );
                session.record(
                    &state.current_node,
                    "graph.step_limit",
                    AuditCategory::System,
                    AuditOutcome::Failed,
                    &[("limit", self.max_steps.to_string())],
                );
                return Err(InterruptedRun {
                    state,
                    error: OrchestrationError::StepLimit { limit: self.max_steps },
                });
            }
            steps += 1;

            let current = state.current_node.clone();
            let Some(node) = self.nodes.get(&current) else {
                return Err(InterruptedRun { state, error: OrchestrationError::MissingNode(current) });
            };

            debug!(
                event_name = "graph.node.start",
                session_id = %session.session_id,
                node = %current,
                step = steps,
                reentries = state.reentries,
                "invoking node"
            );

            let invocation = node
                .invoke(NodeContext {
                    session,
                    node: &current,
                    history: state.view(),
                    reentries: state.reentries,
                })
                .await;

            let output = match invocation {
                Ok(output) => output,
                Err(error) => {
                    warn!(
                        event_name = "graph.node.failed",
                        session_id = %session.session_id,
                        node = %current,
                        error = %error,
                        "node invocation failed"
                    );
                    session.record(
                        &current,
                        "graph.node_failed",
                        self.category_of(&current),
                        AuditOutcome::Failed,
                        &[("error_class", error.error_class().to_string())],
                    );
                    return Err(InterruptedRun { state, error });
                }
            };

            let transition = match self.definition.resolve(&current, &output.directive) {
                Ok(transition) => transition,
                Err(error) => return Err(InterruptedRun { state, error: error.into() }),
            };

            let appended = output.delta.len();
            state.append(output.delta);
            session.record(
                &current,
                "graph.node_completed",
                self.category_of(&current),
                AuditOutcome::Success,
                &[("next", transition.to.to_string()), ("appended", appended.to_string())],
            );

            match transition.to {
                Next::End => {
                    info!(
                        event_name = "graph.run.completed",
                        session_id = %session.session_id,
                        node = %current,
                        steps,
                        turns = state.len(),
                        "graph reached terminal node"
                    );
                    return Ok(state);
                }
                Next::Node(next) if next == current => {
                    state.reentries += 1;
                }
                Next::Node(next) => {
                    state.current_node = next;
                    state.reentries = 0;
                }
            }
        }
    }

    fn category_of(&self, id: &NodeId) -> AuditCategory {
        match self.definition.node(id).map(|spec| &spec.kind) {
            Some(NodeKind::Router { .. }) => AuditCategory::Routing,
            Some(NodeKind::Handler { .. }) => AuditCategory::Handler,
            Some(NodeKind::Tools { .. }) => AuditCategory::Tool,
            None => AuditCategory::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use triage_core::audit::{InMemoryAuditSink, NoopAuditSink};
    use triage_core::domain::conversation::{ConversationState, Turn};
    use triage_core::graph::{GraphDefinition, Next, NodeId};

    use super::{GraphExecutor, Node, NodeContext, NodeOutput, SessionContext};
    use crate::errors::{ConstructionError, OrchestrationError};

    struct Scripted<F>(F);

    #[async_trait]
    impl<F> Node for Scripted<F>
    where
        F: Fn(&NodeContext<'_>) -> NodeOutput + Send + Sync,
    {
        async fn invoke(
            &self,
            context: NodeContext<'_>,
        ) -> Result<NodeOutput, OrchestrationError> {
            Ok((self.0)(&context))
        }
    }

    fn definition() -> GraphDefinition {
        GraphDefinition::builder()
            .entry("router")
            .router("router", vec![NodeId::from("worker")])
            .handler("worker", "worker_tools")
            .build()
            .expect("graph")
    }

    fn session() -> SessionContext {
        SessionContext::new("test-session", Arc::new(NoopAuditSink))
    }

    fn node<F>(f: F) -> Arc<dyn Node>
    where
        F: Fn(&NodeContext<'_>) -> NodeOutput + Send + Sync + 'static,
    {
        Arc::new(Scripted(f))
    }

    #[tokio::test]
    async fn deltas_are_appended_in_step_order() {
        let tool_rounds = Arc::new(AtomicU32::new(0));
        let rounds = Arc::clone(&tool_rounds);

        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId::from("router"),
            node(|_| NodeOutput::goto(Next::Node(NodeId::from("worker")), Vec::new())),
        );
        nodes.insert(
            NodeId::from("worker"),
            node(move |context| {
                if context.history.len() < 3 {
                    NodeOutput::goto(
                        Next::Node(NodeId::from("worker_tools")),
                        vec![Turn::assistant("calling")],
                    )
                } else {
                    NodeOutput::follow_edge(vec![Turn::assistant("done")])
                }
            }),
        );
        nodes.insert(
            NodeId::from("worker_tools"),
            node(move |_| {
                rounds.fetch_add(1, Ordering::SeqCst);
                NodeOutput::follow_edge(vec![Turn::user("tool-ish")])
            }),
        );

        let executor = GraphExecutor::new(definition(), nodes, 10).expect("executor");
        let state = ConversationState::new(vec![Turn::user("hi")], NodeId::from("router"));
        let final_state = executor.run(state, &session()).await.expect("run");

        let texts =
            final_state.view().iter().map(|turn| turn.text_content()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["hi", "calling", "tool-ish", "done"]);
        assert_eq!(tool_rounds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn self_goto_counts_reentries() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId::from("router"),
            node(|context| {
                if context.reentries < 2 {
                    NodeOutput::goto(
                        Next::Node(NodeId::from("router")),
                        vec![Turn::user(format!("retry {}", context.reentries))],
                    )
                } else {
                    NodeOutput::goto(Next::End, vec![Turn::assistant("bye")])
                }
            }),
        );
        nodes.insert(NodeId::from("worker"), node(|_| NodeOutput::follow_edge(Vec::new())));
        nodes.insert(NodeId::from("worker_tools"), node(|_| NodeOutput::follow_edge(Vec::new())));

        let executor = GraphExecutor::new(definition(), nodes, 10).expect("executor");
        let state = ConversationState::new(Vec::new(), NodeId::from("router"));
        let final_state = executor.run(state, &session()).await.expect("run");

        assert_eq!(final_state.len(), 3);
        assert_eq!(final_state.reentries, 2);
    }

    #[tokio::test]
    async fn non_terminating_cycles_hit_the_step_limit_with_history_intact() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId::from("router"),
            node(|_| NodeOutput::goto(Next::Node(NodeId::from("worker")), Vec::new())),
        );
        nodes.insert(
            NodeId::from("worker"),
            node(|_| {
                NodeOutput::goto(
                    Next::Node(NodeId::from("worker_tools")),
                    vec![Turn::assistant("again")],
                )
            }),
        );
        nodes.insert(NodeId::from("worker_tools"), node(|_| NodeOutput::follow_edge(Vec::new())));

        let sink = InMemoryAuditSink::default();
        let session = SessionContext::new("loop", Arc::new(sink.clone()));
        let executor = GraphExecutor::new(definition(), nodes, 7).expect("executor");
        let state = ConversationState::new(vec![Turn::user("hi")], NodeId::from("router"));

        let interrupted = executor.run(state, &session).await.expect_err("must not loop forever");

        assert!(matches!(interrupted.error, OrchestrationError::StepLimit { limit: 7 }));
        assert_eq!(interrupted.state.view()[0], Turn::user("hi"));
        assert_eq!(interrupted.state.len(), 4);
        assert!(sink.event_types().contains(&"graph.step_limit".to_string()));
    }

    #[tokio::test]
    async fn undeclared_goto_is_a_transition_error() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeId::from("router"),
            node(|_| NodeOutput::goto(Next::Node(NodeId::from("worker_tools")), Vec::new())),
        );
        nodes.insert(NodeId::from("worker"), node(|_| NodeOutput::follow_edge(Vec::new())));
        nodes.insert(NodeId::from("worker_tools"), node(|_| NodeOutput::follow_edge(Vec::new())));

        let executor = GraphExecutor::new(definition(), nodes, 5).expect("executor");
        let state = ConversationState::new(Vec::new(), NodeId::from("router"));
        let interrupted = executor.run(state, &session()).await.expect_err("rejected");

        assert!(matches!(interrupted.error, OrchestrationError::Transition(_)));
    }

    #[test]
    fn every_declared_node_needs_an_implementation() {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::from("router"), node(|_| NodeOutput::follow_edge(Vec::new())));

        let error = GraphExecutor::new(definition(), nodes, 5).err().expect("missing nodes");
        assert!(matches!(error, ConstructionError::MissingNode(_)));
    }
}
