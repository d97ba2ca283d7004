//! Agent runtime: the conversational task router.
//!
//! A session enters through [`Orchestrator::run`]. The graph executor hands
//! control to a decision step, which either answers directly or hands the
//! conversation to one capability handler. Handlers may request tools; the
//! tool execution loop runs them and returns control to the same handler until
//! it produces a plain reply, which the output stage turns into the external
//! result.
//!
//! # Key Types
//!
//! - [`GraphExecutor`] - pure control flow over the static graph
//! - [`DecisionStep`] - routing with a bounded correction cycle
//! - [`HandlerNode`] / [`ToolExecutionLoop`] - the handler ⇄ tools inner loop
//! - [`HistoryTrimmer`] - token budget applied before routing
//! - [`LanguageModel`] - pluggable model capability (OpenAI-compatible HTTP)
//!
//! Tool failures are data, not errors: they are recorded in the history as
//! structured payloads so the handler's next model call can react to them.

pub mod appointments;
pub mod binding;
pub mod clinic;
pub mod errors;
pub mod graph;
pub mod handler;
pub mod knowledge;
pub mod llm;
pub mod output;
pub mod router;
pub mod runtime;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tool_loop;
pub mod tools;
pub mod trimmer;

pub use appointments::{Clock, FixedClock, SystemClock};
pub use binding::{BindingError, CapabilityBinding};
pub use clinic::{build_clinic_graph, ClinicServices, PERSONA};
pub use errors::{ConstructionError, OrchestrationError};
pub use graph::{GraphExecutor, InterruptedRun, Node, NodeContext, NodeOutput, SessionContext};
pub use handler::HandlerNode;
pub use knowledge::{KnowledgeBase, Passage, StaticKnowledgeBase};
pub use llm::{LanguageModel, ModelError, OpenAiCompatibleClient, ToolSpec};
pub use output::{
    ExternalOutput, OpenAiSpeechClient, OutputError, OutputStage, SpeechOutput,
    SpeechSynthesizer, TextOutput,
};
pub use router::{DecisionStep, HandoffTarget, RoutingDecision, FALLBACK_REPLY};
pub use runtime::{Orchestrator, SessionFailure, SessionOutcome};
pub use tool_loop::ToolExecutionLoop;
pub use tools::{Tool, ToolError, ToolRegistry};
pub use trimmer::{HistoryTrimmer, TokenEstimator};
