use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub router: RouterConfig,
    pub tools: ToolsConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    pub trim_budget_tokens: usize,
    pub max_corrections: u32,
    pub max_graph_steps: u32,
    pub turn_prefix_tokens: usize,
    pub turn_suffix_tokens: usize,
    pub per_item_tokens: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolsConfig {
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputConfig {
    pub mode: OutputMode,
    pub voice: String,
    pub speech_model: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Text,
    Speech,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub trim_budget_tokens: Option<usize>,
    pub max_corrections: Option<u32>,
    pub output_mode: Option<OutputMode>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://triage.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                temperature: 0.0,
            },
            router: RouterConfig::default(),
            tools: ToolsConfig { timeout_secs: 10 },
            output: OutputConfig {
                mode: OutputMode::Text,
                voice: "alloy".to_string(),
                speech_model: "tts-1".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            trim_budget_tokens: 512,
            max_corrections: 3,
            max_graph_steps: 25,
            turn_prefix_tokens: 3,
            turn_suffix_tokens: 1,
            per_item_tokens: 24,
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for OutputMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "speech" => Ok(Self::Speech),
            other => Err(ConfigError::Validation(format!(
                "unsupported output mode `{other}` (expected text|speech)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("triage.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(router) = patch.router {
            if let Some(trim_budget_tokens) = router.trim_budget_tokens {
                self.router.trim_budget_tokens = trim_budget_tokens;
            }
            if let Some(max_corrections) = router.max_corrections {
                self.router.max_corrections = max_corrections;
            }
            if let Some(max_graph_steps) = router.max_graph_steps {
                self.router.max_graph_steps = max_graph_steps;
            }
            if let Some(turn_prefix_tokens) = router.turn_prefix_tokens {
                self.router.turn_prefix_tokens = turn_prefix_tokens;
            }
            if let Some(turn_suffix_tokens) = router.turn_suffix_tokens {
                self.router.turn_suffix_tokens = turn_suffix_tokens;
            }
            if let Some(per_item_tokens) = router.per_item_tokens {
                self.router.per_item_tokens = per_item_tokens;
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(timeout_secs) = tools.timeout_secs {
                self.tools.timeout_secs = timeout_secs;
            }
        }

        if let Some(output) = patch.output {
            if let Some(mode) = output.mode {
                self.output.mode = mode;
            }
            if let Some(voice) = output.voice {
                self.output.voice = voice;
            }
            if let Some(speech_model) = output.speech_model {
                self.output.speech_model = speech_model;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TRIAGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TRIAGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("TRIAGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TRIAGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TRIAGE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("TRIAGE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TRIAGE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("TRIAGE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("TRIAGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("TRIAGE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("TRIAGE_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("TRIAGE_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("TRIAGE_ROUTER_TRIM_BUDGET_TOKENS") {
            self.router.trim_budget_tokens =
                parse_usize("TRIAGE_ROUTER_TRIM_BUDGET_TOKENS", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_ROUTER_MAX_CORRECTIONS") {
            self.router.max_corrections = parse_u32("TRIAGE_ROUTER_MAX_CORRECTIONS", &value)?;
        }
        if let Some(value) = read_env("TRIAGE_ROUTER_MAX_GRAPH_STEPS") {
            self.router.max_graph_steps = parse_u32("TRIAGE_ROUTER_MAX_GRAPH_STEPS", &value)?;
        }

        if let Some(value) = read_env("TRIAGE_TOOLS_TIMEOUT_SECS") {
            self.tools.timeout_secs = parse_u64("TRIAGE_TOOLS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TRIAGE_OUTPUT_MODE") {
            self.output.mode = value.parse()?;
        }
        if let Some(value) = read_env("TRIAGE_OUTPUT_VOICE") {
            self.output.voice = value;
        }

        let log_level = read_env("TRIAGE_LOGGING_LEVEL").or_else(|| read_env("TRIAGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TRIAGE_LOGGING_FORMAT").or_else(|| read_env("TRIAGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(trim_budget_tokens) = overrides.trim_budget_tokens {
            self.router.trim_budget_tokens = trim_budget_tokens;
        }
        if let Some(max_corrections) = overrides.max_corrections {
            self.router.max_corrections = max_corrections;
        }
        if let Some(output_mode) = overrides.output_mode {
            self.output.mode = output_mode;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_router(&self.router)?;
        validate_tools(&self.tools)?;
        validate_output(&self.output, &self.llm)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("triage.toml"), PathBuf::from("config/triage.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_router(router: &RouterConfig) -> Result<(), ConfigError> {
    if router.trim_budget_tokens == 0 {
        return Err(ConfigError::Validation(
            "router.trim_budget_tokens must be greater than zero".to_string(),
        ));
    }

    if router.max_corrections == 0 || router.max_corrections > 10 {
        return Err(ConfigError::Validation(
            "router.max_corrections must be in range 1..=10".to_string(),
        ));
    }

    // every correction re-enters the router, then router -> handler -> tools -> handler
    if router.max_graph_steps < router.max_corrections.saturating_add(4) {
        return Err(ConfigError::Validation(format!(
            "router.max_graph_steps must be at least router.max_corrections + 4 ({})",
            router.max_corrections.saturating_add(4)
        )));
    }

    if router.per_item_tokens == 0 {
        return Err(ConfigError::Validation(
            "router.per_item_tokens must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_tools(tools: &ToolsConfig) -> Result<(), ConfigError> {
    if tools.timeout_secs == 0 || tools.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "tools.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_output(output: &OutputConfig, llm: &LlmConfig) -> Result<(), ConfigError> {
    if output.mode == OutputMode::Speech {
        if output.voice.trim().is_empty() || output.speech_model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "output.voice and output.speech_model are required for speech output".to_string(),
            ));
        }
        if llm.base_url.is_none() && llm.provider != LlmProvider::OpenAi {
            return Err(ConfigError::Validation(
                "speech output needs an openai-compatible llm.base_url".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    router: Option<RouterPatch>,
    tools: Option<ToolsPatch>,
    output: Option<OutputPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct RouterPatch {
    trim_budget_tokens: Option<usize>,
    max_corrections: Option<u32>,
    max_graph_steps: Option<u32>,
    turn_prefix_tokens: Option<usize>,
    turn_suffix_tokens: Option<usize>,
    per_item_tokens: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputPatch {
    mode: Option<OutputMode>,
    voice: Option<String>,
    speech_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
