//! The clinic call-center graph: one router, three handlers, one tool node
//! per handler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use triage_core::config::AppConfig;
use triage_core::graph::{GraphDefinition, NodeId};
use triage_db::AppointmentRepository;

use crate::appointments::{register_appointment_tools, Clock};
use crate::binding::CapabilityBinding;
use crate::errors::ConstructionError;
use crate::graph::{GraphExecutor, Node};
use crate::handler::HandlerNode;
use crate::knowledge::{KnowledgeBase, RetrieveHospitalInformationTool};
use crate::llm::LanguageModel;
use crate::router::{DecisionStep, HandoffTarget};
use crate::tool_loop::ToolExecutionLoop;
use crate::tools::ToolRegistry;
use crate::trimmer::HistoryTrimmer;

pub const ROUTER: &str = "router_assistant";
pub const NEW_BOOKING: &str = "new_booking_assistant";
pub const CANCEL_BOOKING: &str = "cancel_booking_assistant";
pub const HOSPITAL_INFO: &str = "general_hospital_assistant";

/// Leading system turn seeded into every phone session.
pub const PERSONA: &str = "You are a phone-agent assistant. Keep all messages very short, just \
    a single question or one answer. Act as if you're on a live call: no long explanations or \
    chit-chat. Always reference prior chat context and stay aligned with the conversation.";

const ROUTER_DIRECTIVE: &str = "You are a routing assistant. Based on the message history, \
    decide whether the conversation should be handed over to a specialized agent. Use the \
    appropriate tool to route the request when needed. You can not use other tools on booking \
    and cancelling.";

const BOOKING_DIRECTIVE: &str = "You are an assistant for booking new doctor appointments, \
    delegated by the main assistant. Help users find doctors based on their preferences (name, \
    specialization, location). Check availability for the requested date and time before \
    proceeding. Confirm all details with the user first. Do not book unless availability is \
    verified using the appropriate tool.";

const CANCELLATION_DIRECTIVE: &str = "You are a dedicated assistant for cancelling doctor \
    appointments. Your task begins when delegated by the primary assistant. Start by verifying \
    the appointment ID. Then ask the user to confirm cancellation explicitly. Only proceed to \
    cancel if the user confirms. Use the proper tool and clearly communicate the result. Keep \
    responses short, clear, and purposeful.";

const INFORMATION_DIRECTIVE: &str = "You are an assistant answering questions about the \
    hospital and its services. Look the answer up with the appropriate tool before replying and \
    only state what the retrieved information supports.";

/// Side-effecting collaborators the clinic tools wrap.
#[derive(Clone)]
pub struct ClinicServices {
    pub store: Arc<dyn AppointmentRepository>,
    pub clock: Arc<dyn Clock>,
    pub knowledge: Arc<dyn KnowledgeBase>,
}

pub fn tools_node(handler: &str) -> NodeId {
    NodeId::from(format!("{handler}_tools"))
}

pub fn clinic_definition() -> Result<GraphDefinition, ConstructionError> {
    Ok(GraphDefinition::builder()
        .entry(ROUTER)
        .router(
            ROUTER,
            vec![NodeId::from(NEW_BOOKING), NodeId::from(CANCEL_BOOKING), NodeId::from(HOSPITAL_INFO)],
        )
        .handler(NEW_BOOKING, tools_node(NEW_BOOKING))
        .handler(CANCEL_BOOKING, tools_node(CANCEL_BOOKING))
        .handler(HOSPITAL_INFO, tools_node(HOSPITAL_INFO))
        .build()?)
}

pub fn clinic_binding() -> CapabilityBinding {
    CapabilityBinding::new()
        .bind(NEW_BOOKING, ["search_for_doctor", "check_doctor_availability", "book_appointment"])
        .bind(
            CANCEL_BOOKING,
            ["search_for_appointment", "cancel_appointment", "reschedule_appointment"],
        )
        .bind(HOSPITAL_INFO, ["retrieve_hospital_information"])
}

fn handoff_targets() -> Vec<HandoffTarget> {
    vec![
        HandoffTarget::new(
            NEW_BOOKING,
            "based on conversation history, if user needs to book a new appointment with a doctor",
        ),
        HandoffTarget::new(
            CANCEL_BOOKING,
            "based on conversation history, if user needs to cancel an appointment",
        ),
        HandoffTarget::new(
            HOSPITAL_INFO,
            "based on conversation history, if user needs information about hospital",
        ),
    ]
}

/// Assembles and validates the full clinic graph. Any unresolvable handoff,
/// binding or node is reported here, before the first session runs.
pub fn build_clinic_graph(
    config: &AppConfig,
    model: Arc<dyn LanguageModel>,
    services: ClinicServices,
) -> Result<GraphExecutor, ConstructionError> {
    let definition = clinic_definition()?;

    let mut registry = ToolRegistry::new(Duration::from_secs(config.tools.timeout_secs.max(1)));
    register_appointment_tools(&mut registry, services.store, services.clock);
    registry.register(RetrieveHospitalInformationTool::new(services.knowledge));

    let binding = clinic_binding();
    binding.validate(&registry)?;

    let registry = Arc::new(registry);
    let binding = Arc::new(binding);

    let mut nodes: BTreeMap<NodeId, Arc<dyn Node>> = BTreeMap::new();
    nodes.insert(
        NodeId::from(ROUTER),
        Arc::new(DecisionStep::new(
            &definition,
            ROUTER,
            ROUTER_DIRECTIVE,
            handoff_targets(),
            Arc::clone(&model),
            HistoryTrimmer::from_config(&config.router),
            config.router.max_corrections,
        )?),
    );

    for (handler, directive) in [
        (NEW_BOOKING, BOOKING_DIRECTIVE),
        (CANCEL_BOOKING, CANCELLATION_DIRECTIVE),
        (HOSPITAL_INFO, INFORMATION_DIRECTIVE),
    ] {
        nodes.insert(
            NodeId::from(handler),
            Arc::new(HandlerNode::new(
                &definition,
                handler,
                Some(directive.to_string()),
                &binding,
                &registry,
                Arc::clone(&model),
            )?),
        );
        nodes.insert(
            tools_node(handler),
            Arc::new(ToolExecutionLoop::new(
                &definition,
                tools_node(handler),
                Arc::clone(&registry),
                Arc::clone(&binding),
            )?),
        );
    }

    GraphExecutor::new(definition, nodes, config.router.max_graph_steps)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use triage_core::config::AppConfig;
    use triage_core::graph::{NodeId, NodeKind};
    use triage_db::InMemoryAppointmentRepository;

    use super::{
        build_clinic_graph, clinic_binding, clinic_definition, tools_node, ClinicServices,
        CANCEL_BOOKING, NEW_BOOKING, ROUTER,
    };
    use crate::appointments::SystemClock;
    use crate::knowledge::StaticKnowledgeBase;
    use crate::testing::ScriptedModel;

    fn services() -> ClinicServices {
        ClinicServices {
            store: Arc::new(InMemoryAppointmentRepository::default()),
            clock: Arc::new(SystemClock),
            knowledge: Arc::new(StaticKnowledgeBase::clinic()),
        }
    }

    #[test]
    fn definition_pairs_each_handler_with_its_tool_node() {
        let definition = clinic_definition().expect("definition");

        assert_eq!(definition.entry(), &NodeId::from(ROUTER));
        assert_eq!(definition.handoff_targets(&NodeId::from(ROUTER)).len(), 3);
        assert_eq!(
            definition.node(&NodeId::from(NEW_BOOKING)).map(|spec| &spec.kind),
            Some(&NodeKind::Handler { tools: tools_node(NEW_BOOKING) })
        );
        assert_eq!(definition.nodes().count(), 7);
    }

    #[test]
    fn cancellation_cannot_book() {
        let binding = clinic_binding();
        let cancel = NodeId::from(CANCEL_BOOKING);
        assert!(binding.allows(&cancel, "cancel_appointment"));
        assert!(!binding.allows(&cancel, "book_appointment"));
    }

    #[test]
    fn full_graph_assembles_from_default_config() {
        let model = Arc::new(ScriptedModel::new(Vec::new()));
        let executor =
            build_clinic_graph(&AppConfig::default(), model, services()).expect("clinic graph");

        assert_eq!(executor.max_steps(), AppConfig::default().router.max_graph_steps);
    }
}
