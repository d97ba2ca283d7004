use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use toml::Value;
use triage_core::config::{AppConfig, LoadOptions};

struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        field("database.url", &["TRIAGE_DATABASE_URL"], &config.database.url),
        field(
            "database.max_connections",
            &["TRIAGE_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections,
        ),
        field(
            "database.timeout_secs",
            &["TRIAGE_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs,
        ),
        field("llm.provider", &["TRIAGE_LLM_PROVIDER"], format!("{:?}", config.llm.provider)),
        field("llm.model", &["TRIAGE_LLM_MODEL"], &config.llm.model),
        field(
            "llm.base_url",
            &["TRIAGE_LLM_BASE_URL"],
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        field("llm.api_key", &["TRIAGE_LLM_API_KEY"], api_key),
        field("llm.timeout_secs", &["TRIAGE_LLM_TIMEOUT_SECS"], config.llm.timeout_secs),
        field("llm.max_retries", &["TRIAGE_LLM_MAX_RETRIES"], config.llm.max_retries),
        field("llm.temperature", &["TRIAGE_LLM_TEMPERATURE"], config.llm.temperature),
        field(
            "router.trim_budget_tokens",
            &["TRIAGE_ROUTER_TRIM_BUDGET_TOKENS"],
            config.router.trim_budget_tokens,
        ),
        field(
            "router.max_corrections",
            &["TRIAGE_ROUTER_MAX_CORRECTIONS"],
            config.router.max_corrections,
        ),
        field(
            "router.max_graph_steps",
            &["TRIAGE_ROUTER_MAX_GRAPH_STEPS"],
            config.router.max_graph_steps,
        ),
        field("tools.timeout_secs", &["TRIAGE_TOOLS_TIMEOUT_SECS"], config.tools.timeout_secs),
        field("output.mode", &["TRIAGE_OUTPUT_MODE"], format!("{:?}", config.output.mode)),
        field("output.voice", &["TRIAGE_OUTPUT_VOICE"], &config.output.voice),
        field(
            "logging.level",
            &["TRIAGE_LOGGING_LEVEL", "TRIAGE_LOG_LEVEL"],
            &config.logging.level,
        ),
        field(
            "logging.format",
            &["TRIAGE_LOGGING_FORMAT", "TRIAGE_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn field(
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: impl ToString,
) -> Field {
    Field { key_path, env_keys, value: value.to_string() }
}

fn detect_config_path() -> Option<PathBuf> {
    ["triage.toml", "config/triage.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
