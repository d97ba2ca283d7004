use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use triage_agent::appointments::SystemClock;
use triage_agent::clinic::{build_clinic_graph, ClinicServices};
use triage_agent::{
    ConstructionError, LanguageModel, ModelError, OpenAiCompatibleClient, OpenAiSpeechClient,
    Orchestrator, OutputError, SpeechOutput, StaticKnowledgeBase, TextOutput,
};
use triage_core::config::{AppConfig, OutputMode};
use triage_db::{connect_with_settings, migrations, DbPool, SqlAppointmentRepository};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Orchestrator,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model client setup failed: {0}")]
    Model(#[from] ModelError),
    #[error("output stage setup failed: {0}")]
    Output(#[from] OutputError),
    #[error("graph construction failed: {0}")]
    Graph(#[from] ConstructionError),
}

impl BootstrapError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::DatabaseConnect(_) => "db_connectivity",
            Self::Migration(_) => "migration",
            Self::Model(_) | Self::Output(_) => "config_validation",
            Self::Graph(_) => "graph_construction",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::DatabaseConnect(_) => 4,
            Self::Migration(_) => 5,
            Self::Model(_) | Self::Output(_) => 2,
            Self::Graph(_) => 6,
        }
    }
}

/// Connects the appointment store, applies migrations and assembles the clinic
/// graph around the configured model client.
pub async fn bootstrap(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        database_url = %config.database.url,
        "database ready"
    );

    let model: Arc<dyn LanguageModel> = Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
    let orchestrator = build_orchestrator(&config, db_pool.clone(), model)?;
    info!(
        event_name = "system.bootstrap.ready",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        output_mode = ?config.output.mode,
        "clinic graph assembled"
    );

    Ok(Application { config, db_pool, orchestrator })
}

pub fn build_orchestrator(
    config: &AppConfig,
    db_pool: DbPool,
    model: Arc<dyn LanguageModel>,
) -> Result<Orchestrator, BootstrapError> {
    let services = ClinicServices {
        store: Arc::new(SqlAppointmentRepository::new(db_pool)),
        clock: Arc::new(SystemClock),
        knowledge: Arc::new(StaticKnowledgeBase::clinic()),
    };
    let executor = build_clinic_graph(config, model, services)?;

    let orchestrator = Orchestrator::new(executor);
    Ok(match config.output.mode {
        OutputMode::Text => orchestrator.with_output(Arc::new(TextOutput)),
        OutputMode::Speech => orchestrator.with_output(Arc::new(SpeechOutput::new(
            OpenAiSpeechClient::from_config(&config.llm, &config.output)?,
        ))),
    })
}
