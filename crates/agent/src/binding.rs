use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use triage_core::graph::NodeId;

use crate::tools::ToolRegistry;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("`{node}` is bound to unregistered tool `{tool}`")]
    UnregisteredTool { node: NodeId, tool: String },
}

/// Static node → tool-name mapping fixed when the graph is built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilityBinding {
    bindings: BTreeMap<NodeId, BTreeSet<String>>,
}

impl CapabilityBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<I, S>(mut self, node: impl Into<NodeId>, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bindings.entry(node.into()).or_default().extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn tools_for<'a>(&'a self, node: &NodeId) -> impl Iterator<Item = &'a str> + 'a {
        self.bindings.get(node).into_iter().flatten().map(String::as_str)
    }

    pub fn allows(&self, node: &NodeId, tool: &str) -> bool {
        self.bindings.get(node).is_some_and(|tools| tools.contains(tool))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.bindings.keys()
    }

    pub fn validate(&self, registry: &ToolRegistry) -> Result<(), BindingError> {
        for (node, tools) in &self.bindings {
            if let Some(tool) = tools.iter().find(|tool| !registry.contains(tool)) {
                return Err(BindingError::UnregisteredTool { node: node.clone(), tool: tool.clone() });
            }
        }
        Ok(())
    }
}
