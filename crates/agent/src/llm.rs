//! Language-model capability.
//!
//! Nodes only see the [`LanguageModel`] trait: given the turns and an optional
//! set of tool signatures it returns one assistant turn, which either carries
//! text or structured tool-call requests. [`OpenAiCompatibleClient`] speaks the
//! `/chat/completions` wire format, which both OpenAI and Ollama's `/v1`
//! endpoint accept.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use triage_core::config::LlmConfig;
use triage_core::domain::conversation::{Role, ToolCallRequest, Turn};
use uuid::Uuid;

/// Signature of a tool the model may request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self { name: name.into(), description: description.into(), parameters }
    }

    /// Zero-argument pseudo-tool used by a decision step to select a handler.
    pub fn handoff(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(
            name,
            description,
            serde_json::json!({ "type": "object", "properties": {}, "required": [] }),
        )
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("model call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("model api returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("model client is not configured: {0}")]
    NotConfigured(String),
}

impl ModelError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedResponse(_) | Self::NotConfigured(_) => false,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<Turn, ModelError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, PartialEq, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
struct WireToolCall {
    id: String,
    r#type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, PartialEq, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    r#type: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn to_wire_messages(turns: &[Turn]) -> Vec<WireMessage> {
    turns
        .iter()
        .map(|turn| {
            let text = turn.text_content();
            let tool_calls = turn
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    r#type: "function",
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: Value::Object(call.arguments.clone()).to_string(),
                    },
                })
                .collect::<Vec<_>>();
            let content = if text.is_empty() && !tool_calls.is_empty() { None } else { Some(text) };

            WireMessage {
                role: turn.role.as_str(),
                content,
                tool_calls,
                tool_call_id: turn.tool_call_id.clone(),
            }
        })
        .collect()
}

/// Providers disagree on whether `arguments` is a JSON string or an object.
fn parse_arguments(tool: &str, raw: Value) -> Result<Map<String, Value>, ModelError> {
    match raw {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        Value::String(encoded) if encoded.trim().is_empty() => Ok(Map::new()),
        Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ModelError::MalformedResponse(format!(
                "arguments for `{tool}` must be an object, got {other}"
            ))),
            Err(error) => Err(ModelError::MalformedResponse(format!(
                "arguments for `{tool}` are not valid JSON: {error}"
            ))),
        },
        other => Err(ModelError::MalformedResponse(format!(
            "arguments for `{tool}` must be an object, got {other}"
        ))),
    }
}

fn parse_response(response: ChatResponse) -> Result<Turn, ModelError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::MalformedResponse("response has no choices".to_string()))?;

    let mut tool_calls = Vec::new();
    for call in choice.message.tool_calls.unwrap_or_default() {
        let arguments = parse_arguments(&call.function.name, call.function.arguments)?;
        let id = call
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
        tool_calls.push(ToolCallRequest::new(id, call.function.name, arguments));
    }

    let content = choice.message.content.unwrap_or_default();
    Ok(Turn::assistant_with_tool_calls(content, tool_calls))
}

const SENSITIVE_PATTERNS: &[&str] =
    &["api_key", "api-key", "apikey", "authorization", "bearer", "secret", "password"];

/// Keeps provider error bodies out of logs and user-facing messages when they
/// may echo credentials.
pub(crate) fn sanitize_api_error(body: &str) -> String {
    let lower = body.to_lowercase();
    if SENSITIVE_PATTERNS.iter().any(|pattern| lower.contains(pattern)) {
        return "the provider rejected the request".to_string();
    }
    if body.len() > 200 {
        let mut end = 200;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        return format!("{}...", &body[..end]);
    }
    body.to_string()
}

pub struct OpenAiCompatibleClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_retries: u32,
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ModelError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .build()
            .map_err(|error| ModelError::NotConfigured(error.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, body: &ChatRequest<'_>) -> Result<Turn, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let pending = async {
            let response = request.send().await.map_err(|error| {
                if error.is_connect() {
                    ModelError::Unreachable(format!("failed to connect to {}", self.base_url))
                } else {
                    ModelError::Unreachable(error.without_url().to_string())
                }
            })?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|error| ModelError::Unreachable(error.without_url().to_string()))?;
            if !status.is_success() {
                return Err(ModelError::Api {
                    status: status.as_u16(),
                    message: sanitize_api_error(&text),
                });
            }

            let parsed: ChatResponse = serde_json::from_str(&text)
                .map_err(|error| ModelError::MalformedResponse(error.to_string()))?;
            parse_response(parsed)
        };

        tokio::time::timeout(self.timeout, pending).await.map_err(|_| ModelError::Timeout {
            after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        })?
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleClient {
    async fn invoke(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<Turn, ModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages: to_wire_messages(turns),
            tools: tools
                .iter()
                .map(|tool| WireTool {
                    r#type: "function",
                    function: WireFunction {
                        name: &tool.name,
                        description: &tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect(),
            temperature: self.temperature,
            stream: false,
        };

        let mut attempt = 0;
        loop {
            debug!(
                event_name = "llm.request.start",
                model = %self.model,
                attempt,
                roles = %role_summary(turns),
                tools = tools.len(),
                "sending chat completion request"
            );
            match self.send_once(&body).await {
                Ok(turn) => return Ok(turn),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "llm.request.retry",
                        model = %self.model,
                        attempt,
                        error = %error,
                        "retrying chat completion request"
                    );
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Counts roles for log lines without exposing message text.
fn role_summary(turns: &[Turn]) -> String {
    let count = |role: Role| turns.iter().filter(|turn| turn.role == role).count();
    format!(
        "system={} user={} assistant={} tool={}",
        count(Role::System),
        count(Role::User),
        count(Role::Assistant),
        count(Role::Tool)
    )
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};
    use triage_core::config::AppConfig;
    use triage_core::domain::conversation::{Role, ToolCallRequest, Turn};

    use super::{
        parse_response, role_summary, sanitize_api_error, to_wire_messages, ChatResponse,
        LanguageModel, ModelError, OpenAiCompatibleClient, ToolSpec,
    };

    fn response(value: serde_json::Value) -> ChatResponse {
        serde_json::from_value(value).expect("response fixture")
    }

    #[test]
    fn parses_string_encoded_tool_arguments() {
        let turn = parse_response(response(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "check_doctor_availability",
                            "arguments": "{\"doctor_id\": 3, \"date\": \"2030-01-02\", \"time\": \"15:00\"}"
                        }
                    }]
                }
            }]
        })))
        .expect("parse");

        assert_eq!(turn.role, Role::Assistant);
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "call_1");
        assert_eq!(turn.tool_calls[0].arguments.get("doctor_id"), Some(&json!(3)));
    }

    #[test]
    fn parses_object_arguments_and_fills_missing_ids() {
        let turn = parse_response(response(json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [
                        { "function": { "name": "new_booking_assistant", "arguments": {} } },
                        { "id": "", "function": { "name": "search_for_doctor" } }
                    ]
                }
            }]
        })))
        .expect("parse");

        assert_eq!(turn.tool_calls.len(), 2);
        assert!(turn.tool_calls.iter().all(|call| call.id.starts_with("call_")));
        assert_ne!(turn.tool_calls[0].id, turn.tool_calls[1].id);
    }

    #[test]
    fn rejects_non_object_arguments() {
        let error = parse_response(response(json!({
            "choices": [{
                "message": { "tool_calls": [{ "id": "c", "function": { "name": "x", "arguments": "[1,2]" } }] }
            }]
        })))
        .expect_err("array arguments are malformed");

        assert!(matches!(error, ModelError::MalformedResponse(_)));
    }

    #[test]
    fn empty_choices_are_malformed() {
        let error = parse_response(response(json!({ "choices": [] }))).expect_err("no choices");
        assert!(matches!(error, ModelError::MalformedResponse(_)));
    }

    #[test]
    fn wire_messages_carry_tool_links() {
        let mut arguments = Map::new();
        arguments.insert("name".to_string(), json!("Lee"));
        let turns = vec![
            Turn::user("find Dr. Lee"),
            Turn::assistant_with_tool_calls(
                "",
                vec![ToolCallRequest::new("call_9", "search_for_doctor", arguments)],
            ),
            Turn::tool_result("call_9", json!({"success": true, "doctors": []})),
        ];

        let wire = serde_json::to_value(to_wire_messages(&turns)).expect("serialize");

        assert_eq!(wire[1]["content"], json!(null));
        assert_eq!(wire[1]["tool_calls"][0]["function"]["arguments"], json!("{\"name\":\"Lee\"}"));
        assert_eq!(wire[2]["role"], json!("tool"));
        assert_eq!(wire[2]["tool_call_id"], json!("call_9"));
        assert!(wire[0].get("tool_calls").is_none());
    }

    #[test]
    fn handoff_specs_take_no_arguments() {
        let spec = ToolSpec::handoff("cancel_booking_assistant", "cancel an appointment");
        assert_eq!(spec.parameters["properties"], json!({}));
    }

    #[test]
    fn sanitizer_hides_credentials() {
        assert_eq!(
            sanitize_api_error("Incorrect API key provided: sk-***. authorization failed"),
            "the provider rejected the request"
        );
        assert_eq!(sanitize_api_error("model not found"), "model not found");
    }

    #[test]
    fn role_summary_counts_without_content() {
        let summary = role_summary(&[Turn::system("s"), Turn::user("u"), Turn::user("u2")]);
        assert_eq!(summary, "system=1 user=2 assistant=0 tool=0");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported_without_hanging() {
        let mut config = AppConfig::default().llm;
        config.base_url = Some("http://127.0.0.1:9/v1".to_string());
        config.max_retries = 0;
        config.timeout_secs = 5;
        let client = OpenAiCompatibleClient::from_config(&config).expect("client");

        let error = client.invoke(&[Turn::user("hello")], &[]).await.expect_err("no server");
        assert!(matches!(error, ModelError::Unreachable(_) | ModelError::Timeout { .. }));
    }
}
