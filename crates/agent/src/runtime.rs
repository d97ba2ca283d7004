//! Session entry point.
//!
//! [`Orchestrator::run`] is the only way into the graph: it seeds a fresh
//! [`ConversationState`], drives the executor to a terminal node, and passes the
//! final assistant turn through the output stage.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};
use triage_core::audit::{AuditOutcome, AuditSink, NoopAuditSink};
use triage_core::domain::conversation::{ConversationState, Role, Turn};
use uuid::Uuid;

use crate::errors::OrchestrationError;
use crate::graph::{GraphExecutor, SessionContext};
use crate::output::{ExternalOutput, OutputStage, TextOutput};

#[derive(Clone, Debug, PartialEq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub final_turns: Vec<Turn>,
    pub output: ExternalOutput,
}

/// Terminal failure of a session. The turns accumulated before the failure
/// are returned intact.
#[derive(Debug, Error)]
#[error("session {session_id} failed: {error}")]
pub struct SessionFailure {
    pub session_id: String,
    pub partial_history: Vec<Turn>,
    #[source]
    pub error: OrchestrationError,
}

impl SessionFailure {
    pub fn error_class(&self) -> &'static str {
        self.error.error_class()
    }
}

pub struct Orchestrator {
    executor: GraphExecutor,
    output: Arc<dyn OutputStage>,
    audit: Arc<dyn AuditSink>,
}

impl Orchestrator {
    pub fn new(executor: GraphExecutor) -> Self {
        Self { executor, output: Arc::new(TextOutput), audit: Arc::new(NoopAuditSink) }
    }

    pub fn with_output(mut self, output: Arc<dyn OutputStage>) -> Self {
        self.output = output;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    pub async fn run(&self, initial_turns: Vec<Turn>) -> Result<SessionOutcome, SessionFailure> {
        let session_id = Uuid::new_v4().to_string();
        let session = SessionContext::new(session_id.clone(), Arc::clone(&self.audit));
        let seeded = initial_turns.len();

        info!(
            event_name = "session.started",
            session_id = %session_id,
            seed_turns = seeded,
            "starting session"
        );
        session.record_session(
            "session.started",
            AuditOutcome::Success,
            &[("seed_turns", seeded.to_string())],
        );

        let state = ConversationState::new(initial_turns, self.executor.definition().entry().clone());
        let state = match self.executor.run(state, &session).await {
            Ok(state) => state,
            Err(interrupted) => {
                return Err(self.fail(&session, interrupted.state.into_history(), interrupted.error))
            }
        };

        let final_turn = match state.last_turn() {
            Some(turn) if turn.role == Role::Assistant && !turn.has_tool_calls() => turn.clone(),
            _ => {
                let error = OrchestrationError::Invariant(
                    "run ended without a final assistant reply".to_string(),
                );
                return Err(self.fail(&session, state.into_history(), error));
            }
        };

        let output = match self.output.transform(&final_turn).await {
            Ok(output) => output,
            Err(source) => return Err(self.fail(&session, state.into_history(), source.into())),
        };

        let final_turns = state.into_history();
        info!(
            event_name = "session.completed",
            session_id = %session_id,
            appended = final_turns.len() - seeded,
            "session completed"
        );
        session.record_session(
            "session.completed",
            AuditOutcome::Success,
            &[("appended", (final_turns.len() - seeded).to_string())],
        );

        Ok(SessionOutcome { session_id, final_turns, output })
    }

    fn fail(
        &self,
        session: &SessionContext,
        partial_history: Vec<Turn>,
        error: OrchestrationError,
    ) -> SessionFailure {
        error!(
            event_name = "session.failed",
            session_id = %session.session_id,
            error_class = error.error_class(),
            error = %error,
            turns = partial_history.len(),
            "session failed"
        );
        session.record_session(
            "session.failed",
            AuditOutcome::Failed,
            &[("error_class", error.error_class().to_string())],
        );
        SessionFailure { session_id: session.session_id.clone(), partial_history, error }
    }
}
