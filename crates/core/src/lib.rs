pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod graph;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink};
pub use domain::appointment::{
    Appointment, AppointmentId, Doctor, DoctorId, NewAppointment, PatientId, Slot,
};
pub use domain::conversation::{
    ContentPart, ConversationState, Role, ToolCallRequest, Turn, TurnContent,
};
pub use errors::DomainError;
pub use graph::{
    Directive, GraphDefinition, GraphDefinitionError, GraphTransitionError, Next, NodeId,
    NodeKind, NodeSpec, TransitionOutcome,
};
