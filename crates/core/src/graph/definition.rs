use std::collections::BTreeMap;

use thiserror::Error;

use crate::graph::states::{Directive, Next, NodeId, NodeKind, NodeSpec, TransitionOutcome};

/// Statically declared control-flow graph. Construction validates every edge,
/// handoff target and tool-loop pairing, so resolution at runtime only has to
/// check directives issued by nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphDefinition {
    entry: NodeId,
    nodes: BTreeMap<NodeId, NodeSpec>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphDefinitionError {
    #[error("graph has no entry node")]
    MissingEntry,
    #[error("entry node `{0}` is not declared")]
    UnknownEntry(NodeId),
    #[error("node `{0}` is declared more than once")]
    DuplicateNode(NodeId),
    #[error("edge from `{from}` points at undeclared node `{to}`")]
    UnknownEdgeTarget { from: NodeId, to: NodeId },
    #[error("router `{router}` hands off to `{target}`, which is not a handler node")]
    InvalidHandoffTarget { router: NodeId, target: NodeId },
    #[error("router `{0}` declares no handoff targets")]
    EmptyHandoffSet(NodeId),
    #[error("tool node `{tools}` and handler `{handler}` do not reference each other")]
    MismatchedToolLoop { handler: NodeId, tools: NodeId },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphTransitionError {
    #[error("node `{0}` is not part of the graph")]
    UnknownNode(NodeId),
    #[error("node `{from}` may not transfer control to `{to}`")]
    UndeclaredTransition { from: NodeId, to: Next },
}

#[derive(Clone, Debug, Default)]
pub struct GraphDefinitionBuilder {
    entry: Option<NodeId>,
    nodes: Vec<NodeSpec>,
}

impl GraphDefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, id: impl Into<NodeId>) -> Self {
        self.entry = Some(id.into());
        self
    }

    /// A router ends the run when it answers directly; handoffs are explicit gotos.
    pub fn router(mut self, id: impl Into<NodeId>, handoff_targets: Vec<NodeId>) -> Self {
        self.nodes.push(NodeSpec {
            id: id.into(),
            kind: NodeKind::Router { handoff_targets },
            edge: Next::End,
        });
        self
    }

    /// Declares a handler together with the tool node that serves it.
    pub fn handler(mut self, id: impl Into<NodeId>, tools: impl Into<NodeId>) -> Self {
        let id = id.into();
        let tools = tools.into();
        self.nodes.push(NodeSpec {
            id: id.clone(),
            kind: NodeKind::Handler { tools: tools.clone() },
            edge: Next::End,
        });
        self.nodes.push(NodeSpec {
            id: tools,
            kind: NodeKind::Tools { handler: id.clone() },
            edge: Next::Node(id),
        });
        self
    }

    pub fn build(self) -> Result<GraphDefinition, GraphDefinitionError> {
        let entry = self.entry.ok_or(GraphDefinitionError::MissingEntry)?;

        let mut nodes = BTreeMap::new();
        for spec in self.nodes {
            if nodes.contains_key(&spec.id) {
                return Err(GraphDefinitionError::DuplicateNode(spec.id));
            }
            nodes.insert(spec.id.clone(), spec);
        }

        if !nodes.contains_key(&entry) {
            return Err(GraphDefinitionError::UnknownEntry(entry));
        }

        let definition = GraphDefinition { entry, nodes };
        definition.validate()?;
        Ok(definition)
    }
}

impl GraphDefinition {
    pub fn builder() -> GraphDefinitionBuilder {
        GraphDefinitionBuilder::new()
    }

    pub fn entry(&self) -> &NodeId {
        &self.entry
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.values()
    }

    pub fn is_handler(&self, id: &NodeId) -> bool {
        matches!(self.nodes.get(id), Some(NodeSpec { kind: NodeKind::Handler { .. }, .. }))
    }

    pub fn handoff_targets(&self, router: &NodeId) -> &[NodeId] {
        match self.nodes.get(router) {
            Some(NodeSpec { kind: NodeKind::Router { handoff_targets }, .. }) => handoff_targets,
            _ => &[],
        }
    }

    fn validate(&self) -> Result<(), GraphDefinitionError> {
        for spec in self.nodes.values() {
            if let Next::Node(target) = &spec.edge {
                if !self.nodes.contains_key(target) {
                    return Err(GraphDefinitionError::UnknownEdgeTarget {
                        from: spec.id.clone(),
                        to: target.clone(),
                    });
                }
            }

            match &spec.kind {
                NodeKind::Router { handoff_targets } => {
                    if handoff_targets.is_empty() {
                        return Err(GraphDefinitionError::EmptyHandoffSet(spec.id.clone()));
                    }
                    if let Some(target) =
                        handoff_targets.iter().find(|target| !self.is_handler(target))
                    {
                        return Err(GraphDefinitionError::InvalidHandoffTarget {
                            router: spec.id.clone(),
                            target: target.clone(),
                        });
                    }
                }
                NodeKind::Handler { tools } => {
                    let paired = matches!(
                        self.nodes.get(tools),
                        Some(NodeSpec { kind: NodeKind::Tools { handler }, .. }) if handler == &spec.id
                    );
                    if !paired {
                        return Err(GraphDefinitionError::MismatchedToolLoop {
                            handler: spec.id.clone(),
                            tools: tools.clone(),
                        });
                    }
                }
                NodeKind::Tools { handler } => {
                    if !self.nodes.contains_key(handler) {
                        return Err(GraphDefinitionError::UnknownEdgeTarget {
                            from: spec.id.clone(),
                            to: handler.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolves the next step after `from` completed with `directive`.
    pub fn resolve(
        &self,
        from: &NodeId,
        directive: &Directive,
    ) -> Result<TransitionOutcome, GraphTransitionError> {
        let spec =
            self.nodes.get(from).ok_or_else(|| GraphTransitionError::UnknownNode(from.clone()))?;

        let (to, explicit) = match directive {
            Directive::FollowEdge => (spec.edge.clone(), false),
            Directive::Goto(to) => (to.clone(), true),
        };

        if explicit && !self.allows(spec, &to) {
            return Err(GraphTransitionError::UndeclaredTransition { from: from.clone(), to });
        }

        Ok(TransitionOutcome { from: from.clone(), to, explicit })
    }

    fn allows(&self, spec: &NodeSpec, to: &Next) -> bool {
        if &spec.edge == to {
            return true;
        }
        match (&spec.kind, to) {
            (_, Next::End) => true,
            (NodeKind::Router { handoff_targets }, Next::Node(target)) => {
                target == &spec.id || handoff_targets.contains(target)
            }
            (NodeKind::Handler { tools }, Next::Node(target)) => target == tools,
            (NodeKind::Tools { handler }, Next::Node(target)) => target == handler,
        }
    }
}
