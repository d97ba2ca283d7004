pub mod definition;
pub mod states;

pub use definition::{
    GraphDefinition, GraphDefinitionBuilder, GraphDefinitionError, GraphTransitionError,
};
pub use states::{Directive, Next, NodeId, NodeKind, NodeSpec, TransitionOutcome};
