use thiserror::Error;
use triage_core::graph::{GraphDefinitionError, GraphTransitionError, NodeId};

use crate::binding::BindingError;
use crate::llm::ModelError;
use crate::output::OutputError;

/// Fatal failure of one orchestration step. Tool failures never surface here;
/// they are recorded as tool turns instead.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("model call failed in `{node}`: {source}")]
    Model {
        node: NodeId,
        #[source]
        source: ModelError,
    },
    #[error("graph did not terminate within {limit} steps")]
    StepLimit { limit: u32 },
    #[error(transparent)]
    Transition(#[from] GraphTransitionError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("no implementation registered for node `{0}`")]
    MissingNode(NodeId),
    #[error("orchestration invariant violated: {0}")]
    Invariant(String),
}

impl OrchestrationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Model { .. } => "model_invocation",
            Self::StepLimit { .. } => "step_limit",
            Self::Transition(_) | Self::MissingNode(_) | Self::Invariant(_) => "orchestration",
            Self::Output(_) => "output",
        }
    }
}

/// Graph assembly errors, raised before the first session runs.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error(transparent)]
    Definition(#[from] GraphDefinitionError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("node `{0}` is declared in the graph but has no implementation")]
    MissingNode(NodeId),
    #[error("implementation supplied for undeclared node `{0}`")]
    UndeclaredNode(NodeId),
    #[error("could not configure `{component}`: {message}")]
    Component { component: &'static str, message: String },
}
