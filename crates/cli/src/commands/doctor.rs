use std::sync::Arc;

use serde::Serialize;
use triage_agent::clinic::{build_clinic_graph, ClinicServices, ROUTER};
use triage_agent::{LanguageModel, OpenAiCompatibleClient, StaticKnowledgeBase, SystemClock};
use triage_core::config::{AppConfig, LlmProvider, LoadOptions};
use triage_db::{
    connect_with_settings, ClinicSeedDataset, InMemoryAppointmentRepository,
    SqlAppointmentRepository,
};

const CHECKS: [&str; 4] =
    ["config_validation", "llm_client_readiness", "clinic_graph", "appointment_store"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        });
    }

    report.render()
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => vec![
            DoctorCheck::pass(CHECKS[0], "configuration loaded and validated"),
            check_llm_client(&config),
            check_clinic_graph(&config),
            check_appointment_store(&config),
        ],
        Err(error) => {
            let mut checks = vec![DoctorCheck::fail(CHECKS[0], error.to_string())];
            checks.extend(CHECKS[1..].iter().map(|name| DoctorCheck {
                name: *name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
            checks
        }
    };

    let failed = checks.iter().filter(|check| check.status != CheckStatus::Pass).count();
    let (overall_status, summary) = if failed == 0 {
        (CheckStatus::Pass, "doctor: the router is ready to take calls".to_string())
    } else {
        (CheckStatus::Fail, format!("doctor: {failed} of {} checks did not pass", checks.len()))
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    let name = CHECKS[1];
    if config.llm.provider == LlmProvider::OpenAi && config.llm.api_key.is_none() {
        return DoctorCheck::fail(name, "provider `openai` requires TRIAGE_LLM_API_KEY");
    }
    if config.llm.provider == LlmProvider::Ollama && config.llm.base_url.is_none() {
        return DoctorCheck::fail(name, "provider `ollama` requires TRIAGE_LLM_BASE_URL");
    }

    match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck::pass(
            name,
            format!("{:?} client ready for model `{}`", config.llm.provider, client.model()),
        ),
        Err(error) => DoctorCheck::fail(name, format!("failed to build model client: {error}")),
    }
}

/// Assembles the full clinic graph offline: handoff targets, capability
/// bindings and tool registrations are all validated without a model call.
fn check_clinic_graph(config: &AppConfig) -> DoctorCheck {
    let name = CHECKS[2];
    let model: Arc<dyn LanguageModel> = match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(client) => Arc::new(client),
        Err(error) => return DoctorCheck::fail(name, format!("no model client: {error}")),
    };
    let services = ClinicServices {
        store: Arc::new(InMemoryAppointmentRepository::default()),
        clock: Arc::new(SystemClock),
        knowledge: Arc::new(StaticKnowledgeBase::clinic()),
    };

    match build_clinic_graph(config, model, services) {
        Ok(executor) => DoctorCheck::pass(
            name,
            format!(
                "`{ROUTER}` routes to {} nodes; corrections capped at {}, steps at {}",
                executor.definition().nodes().count() - 1,
                config.router.max_corrections,
                executor.max_steps()
            ),
        ),
        Err(error) => DoctorCheck::fail(name, format!("graph construction failed: {error}")),
    }
}

fn check_appointment_store(config: &AppConfig) -> DoctorCheck {
    let name = CHECKS[3];
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(name, format!("failed to initialize async runtime: {error}"))
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return DoctorCheck::fail(name, format!("failed to connect to database: {error}"))
            }
        };

        let repo = SqlAppointmentRepository::new(pool.clone());
        let check = match ClinicSeedDataset::verify(&repo).await {
            Ok(verification) if verification.all_present => DoctorCheck::pass(
                name,
                format!(
                    "`{}` holds the clinic directory ({} doctors)",
                    config.database.url,
                    verification.checks.len()
                ),
            ),
            Ok(verification) => {
                let missing = verification
                    .checks
                    .iter()
                    .filter_map(|(check, found)| (!found).then_some(check.as_str()))
                    .collect::<Vec<_>>();
                DoctorCheck::fail(
                    name,
                    format!("clinic directory incomplete ({}); run `triage seed`", missing.join(", ")),
                )
            }
            Err(error) => DoctorCheck::fail(
                name,
                format!("appointment tables unreadable ({error}); run `triage migrate`"),
            ),
        };

        pool.close().await;
        check
    })
}

impl DoctorReport {
    fn render(&self) -> String {
        let mut lines = vec![self.summary.clone()];
        lines.extend(self.checks.iter().map(|check| {
            let marker = match check.status {
                CheckStatus::Pass => "ok",
                CheckStatus::Fail => "fail",
                CheckStatus::Skipped => "skip",
            };
            format!("- [{marker}] {}: {}", check.name, check.details)
        }));
        lines.join("\n")
    }
}
