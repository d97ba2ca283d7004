use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use triage_agent::clinic::{build_clinic_graph, ClinicServices, NEW_BOOKING, PERSONA, ROUTER};
use triage_agent::testing::ScriptedModel;
use triage_agent::{
    FixedClock, ModelError, Orchestrator, SessionOutcome, StaticKnowledgeBase, FALLBACK_REPLY,
};
use triage_core::audit::InMemoryAuditSink;
use triage_core::config::AppConfig;
use triage_core::domain::conversation::{
    ContentPart, ConversationState, Role, ToolCallRequest, Turn, TurnContent,
};
use triage_core::graph::NodeId;
use triage_db::{AppointmentRepository, ClinicSeedDataset, InMemoryAppointmentRepository};

struct Harness {
    model: Arc<ScriptedModel>,
    audit: InMemoryAuditSink,
    orchestrator: Orchestrator,
}

async fn harness(config: AppConfig, script: Vec<Result<Turn, ModelError>>) -> Harness {
    let store = Arc::new(InMemoryAppointmentRepository::default());
    ClinicSeedDataset::load(store.as_ref()).await.expect("seed clinic");
    let store: Arc<dyn AppointmentRepository> = store;

    let now = NaiveDate::from_ymd_opt(2026, 3, 10)
        .and_then(|date| date.and_hms_opt(9, 0, 0))
        .expect("fixture time");
    let services = ClinicServices {
        store,
        clock: Arc::new(FixedClock(now)),
        knowledge: Arc::new(StaticKnowledgeBase::clinic()),
    };

    let model = Arc::new(ScriptedModel::new(script));
    let audit = InMemoryAuditSink::default();
    let executor = build_clinic_graph(&config, model.clone(), services).expect("clinic graph");
    let orchestrator = Orchestrator::new(executor).with_audit_sink(Arc::new(audit.clone()));

    Harness { model, audit, orchestrator }
}

fn seed(user: &str) -> Vec<Turn> {
    vec![Turn::system(PERSONA), Turn::user(user)]
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    let arguments = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ToolCallRequest::new(id, name, arguments)
}

fn calls(requests: Vec<ToolCallRequest>) -> Result<Turn, ModelError> {
    Ok(Turn::assistant_with_tool_calls("", requests))
}

fn reply(text: &str) -> Result<Turn, ModelError> {
    Ok(Turn::assistant(text))
}

fn payload(turn: &Turn) -> Value {
    match &turn.content {
        TurnContent::Parts(parts) => match parts.as_slice() {
            [ContentPart::Data { value }] => value.clone(),
            other => panic!("tool turn should carry one data part, got {other:?}"),
        },
        TurnContent::Text(text) => panic!("tool turn should carry data, got text {text}"),
    }
}

fn appended(outcome: &SessionOutcome, seeded: usize) -> &[Turn] {
    &outcome.final_turns[seeded..]
}

fn tool_links_are_valid(turns: &[Turn]) -> bool {
    ConversationState::new(turns.to_vec(), NodeId::from(ROUTER)).tool_links_are_valid()
}

fn tool_turns(turns: &[Turn]) -> Vec<&Turn> {
    turns.iter().filter(|turn| turn.role == Role::Tool).collect()
}

#[tokio::test]
async fn booking_request_flows_through_handoff_tools_and_reply() {
    let slot = json!({ "doctor_id": 1, "date": "2026-03-11", "time": "15:00" });
    let mut booking = slot.clone();
    booking["user_id"] = json!(1);

    let harness = harness(
        AppConfig::default(),
        vec![
            calls(vec![call("route-1", NEW_BOOKING, json!({}))]),
            calls(vec![call("c-1", "check_doctor_availability", slot)]),
            calls(vec![call("c-2", "book_appointment", booking)]),
            reply("You're booked with Dr. Ahmed tomorrow at 15:00."),
        ],
    )
    .await;
    let initial = seed("book with Dr. Ahmed tomorrow 3pm");

    let outcome = harness.orchestrator.run(initial.clone()).await.expect("session completes");

    let new_turns = appended(&outcome, initial.len());
    let tools = tool_turns(new_turns);
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0].tool_call_id.as_deref(), Some("c-1"));
    assert_eq!(payload(tools[0])["available"], json!(true));
    assert_eq!(tools[1].tool_call_id.as_deref(), Some("c-2"));
    assert_eq!(payload(tools[1])["success"], json!(true));

    let last = new_turns.last().expect("final turn");
    assert_eq!(last.role, Role::Assistant);
    assert!(!last.has_tool_calls());
    assert_eq!(
        new_turns.iter().filter(|turn| turn.role == Role::Assistant && !turn.has_tool_calls()).count(),
        1
    );
    assert_eq!(outcome.output.text(), "You're booked with Dr. Ahmed tomorrow at 15:00.");
    assert!(tool_links_are_valid(&outcome.final_turns));

    // the handoff pseudo-call leaves no trace in history
    assert!(outcome
        .final_turns
        .iter()
        .flat_map(|turn| turn.tool_calls.iter())
        .all(|request| request.name != NEW_BOOKING));

    assert_eq!(harness.model.call_count(), 4);
    let event_types = harness.audit.event_types();
    assert!(event_types.contains(&"router.handoff".to_string()));
    assert_eq!(event_types.iter().filter(|kind| *kind == "tool.executed").count(), 2);
}

#[tokio::test]
async fn unknown_handler_triggers_one_correction_then_reroutes() {
    let harness = harness(
        AppConfig::default(),
        vec![
            calls(vec![
                call("bad-1", "billing_assistant", json!({})),
                call("ignored", NEW_BOOKING, json!({})),
            ]),
            reply("Which doctor would you like to see?"),
        ],
    )
    .await;
    let initial = seed("I need an appointment");

    let outcome = harness.orchestrator.run(initial.clone()).await.expect("session completes");

    let new_turns = appended(&outcome, initial.len());
    let tools = tool_turns(new_turns);
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].tool_call_id.as_deref(), Some("bad-1"));
    assert_eq!(payload(tools[0])["error"]["kind"], json!("invalid_routing"));
    assert_eq!(new_turns.iter().filter(|turn| turn.role == Role::User).count(), 1);
    // the rejected request is kept so the failure turn answers a real call
    assert!(tool_links_are_valid(&outcome.final_turns));

    let model_calls = harness.model.calls();
    assert_eq!(model_calls.len(), 2);
    let second = &model_calls[1].turns;
    assert!(second.iter().any(|turn| turn.tool_call_id.as_deref() == Some("bad-1")));
    assert_eq!(second.last().map(|turn| turn.role), Some(Role::User));
    // the router only ever offers its declared handoff tools
    assert_eq!(model_calls[1].tools.len(), 3);
}

#[tokio::test]
async fn persistent_misrouting_is_bounded_by_the_correction_cap() {
    let mut config = AppConfig::default();
    config.router.max_corrections = 2;
    let harness =
        harness(config, vec![calls(vec![call("again", "made_up_assistant", json!({}))])]).await;
    let initial = seed("help");

    let outcome = harness.orchestrator.run(initial.clone()).await.expect("forced terminate");

    assert_eq!(outcome.output.text(), FALLBACK_REPLY);
    assert_eq!(harness.model.call_count(), 3);
    assert_eq!(tool_turns(appended(&outcome, initial.len())).len(), 2);
    assert!(harness.audit.event_types().contains(&"router.corrections_exhausted".to_string()));
    assert!(tool_links_are_valid(&outcome.final_turns));
}

#[tokio::test]
async fn smallest_valid_step_cap_still_reaches_the_fallback_reply() {
    let mut config = AppConfig::default();
    config.router.max_corrections = 10;
    config.router.max_graph_steps = 14;
    config.validate().expect("boundary config is valid");
    let harness =
        harness(config, vec![calls(vec![call("wrong", "billing_assistant", json!({}))])]).await;
    let initial = seed("I have a question about my bill");

    let outcome = harness.orchestrator.run(initial.clone()).await.expect("forced terminate");

    assert_eq!(outcome.output.text(), FALLBACK_REPLY);
    assert_eq!(harness.model.call_count(), 11);
    assert_eq!(tool_turns(appended(&outcome, initial.len())).len(), 10);
    assert!(tool_links_are_valid(&outcome.final_turns));
}

#[tokio::test]
async fn many_tool_calls_in_one_turn_yield_results_in_request_order() {
    let requests = vec![
        call("t-1", "search_for_doctor", json!({ "name": "ahmed" })),
        call("t-2", "search_for_doctor", json!({})),
        call(
            "t-3",
            "check_doctor_availability",
            json!({ "doctor_id": 2, "date": "2026-03-12", "time": "10:00" }),
        ),
    ];
    let harness = harness(
        AppConfig::default(),
        vec![
            calls(vec![call("route", NEW_BOOKING, json!({}))]),
            calls(requests),
            reply("Dr. Haddad is free then."),
        ],
    )
    .await;
    let initial = seed("who can I see?");

    let outcome = harness.orchestrator.run(initial.clone()).await.expect("session completes");

    let ids = tool_turns(appended(&outcome, initial.len()))
        .iter()
        .map(|turn| turn.tool_call_id.clone().unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["t-1", "t-2", "t-3"]);
}

#[tokio::test]
async fn every_model_call_sees_an_unchanged_prefix_of_the_final_history() {
    let harness = harness(
        AppConfig::default(),
        vec![
            calls(vec![call("route", NEW_BOOKING, json!({}))]),
            calls(vec![call("c-1", "search_for_doctor", json!({}))]),
            calls(vec![call("c-2", "search_for_doctor", json!({ "name": "nasser" }))]),
            reply("Dr. Nasser it is."),
        ],
    )
    .await;

    let outcome = harness.orchestrator.run(seed("pediatrics please")).await.expect("completes");

    for model_call in harness.model.calls() {
        // every call starts with the node's own directive, then history
        let history = &model_call.turns[1..];
        assert!(history.len() <= outcome.final_turns.len());
        assert_eq!(history, &outcome.final_turns[..history.len()]);
    }
}

#[tokio::test]
async fn model_failure_inside_handler_keeps_partial_history() {
    let harness = harness(
        AppConfig::default(),
        vec![
            calls(vec![call("route", NEW_BOOKING, json!({}))]),
            calls(vec![call("c-1", "search_for_doctor", json!({}))]),
            Err(ModelError::Timeout { after_ms: 30_000 }),
        ],
    )
    .await;
    let initial = seed("book me in");

    let failure = harness.orchestrator.run(initial.clone()).await.expect_err("model timed out");

    assert_eq!(failure.error_class(), "model_invocation");
    assert_eq!(&failure.partial_history[..initial.len()], initial.as_slice());
    assert_eq!(failure.partial_history.len(), initial.len() + 2);
    assert_eq!(failure.partial_history.last().map(|turn| turn.role), Some(Role::Tool));
    assert!(harness.audit.event_types().contains(&"session.failed".to_string()));
}

#[tokio::test]
async fn tool_failures_are_reported_back_to_the_handler() {
    let harness = harness(
        AppConfig::default(),
        vec![
            calls(vec![call("route", NEW_BOOKING, json!({}))]),
            calls(vec![
                call(
                    "past",
                    "book_appointment",
                    json!({ "user_id": 1, "doctor_id": 1, "date": "2026-03-01", "time": "10:00" }),
                ),
                call("cross", "cancel_appointment", json!({ "appointment_id": 1 })),
                call("broken", "book_appointment", json!({ "doctor_id": 1 })),
            ]),
            reply("That time has passed. What other time works?"),
        ],
    )
    .await;
    let initial = seed("book last week");

    let outcome = harness.orchestrator.run(initial.clone()).await.expect("session completes");

    let tools = tool_turns(appended(&outcome, initial.len()));
    assert_eq!(tools.len(), 3);
    assert_eq!(payload(tools[0])["message"], json!("Appointment must be booked for a future time."));
    assert_eq!(payload(tools[1])["error"]["kind"], json!("not_bound"));
    assert_eq!(payload(tools[2])["error"]["kind"], json!("invalid_arguments"));

    // the handler's final call saw all three results
    let handler_call = harness.model.calls().pop().expect("last model call");
    assert_eq!(handler_call.turns.iter().filter(|turn| turn.role == Role::Tool).count(), 3);
    assert_eq!(outcome.output.text(), "That time has passed. What other time works?");
    assert!(tool_links_are_valid(&outcome.final_turns));
}
