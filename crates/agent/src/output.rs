//! Output stage applied to the final assistant turn of a run.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use triage_core::config::{LlmConfig, OutputConfig};
use triage_core::domain::conversation::Turn;

use crate::llm::sanitize_api_error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExternalOutput {
    Text(String),
    Audio { text: String, format: String, bytes: Vec<u8> },
}

impl ExternalOutput {
    /// Text the output was produced from.
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::Audio { text, .. } => text,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OutputError {
    #[error("speech synthesis endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("speech synthesis returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("speech synthesis timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("speech synthesis is not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait OutputStage: Send + Sync {
    async fn transform(&self, final_turn: &Turn) -> Result<ExternalOutput, OutputError>;
}

/// Returns the reply text unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextOutput;

#[async_trait]
impl OutputStage for TextOutput {
    async fn transform(&self, final_turn: &Turn) -> Result<ExternalOutput, OutputError> {
        Ok(ExternalOutput::Text(final_turn.text_content()))
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Container format of the synthesized bytes, e.g. `mp3`.
    fn format(&self) -> &str;

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, OutputError>;
}

pub struct SpeechOutput<S> {
    synthesizer: S,
}

impl<S: SpeechSynthesizer> SpeechOutput<S> {
    pub fn new(synthesizer: S) -> Self {
        Self { synthesizer }
    }
}

#[async_trait]
impl<S: SpeechSynthesizer> OutputStage for SpeechOutput<S> {
    async fn transform(&self, final_turn: &Turn) -> Result<ExternalOutput, OutputError> {
        let text = final_turn.text_content();
        if text.trim().is_empty() {
            return Ok(ExternalOutput::Text(text));
        }

        let bytes = self.synthesizer.synthesize(&text).await?;
        info!(
            event_name = "output.speech.synthesized",
            format = self.synthesizer.format(),
            bytes = bytes.len(),
            "synthesized reply audio"
        );
        Ok(ExternalOutput::Audio { text, format: self.synthesizer.format().to_string(), bytes })
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// Client for the OpenAI `/audio/speech` endpoint.
pub struct OpenAiSpeechClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    voice: String,
    timeout: Duration,
}

impl OpenAiSpeechClient {
    pub fn from_config(llm: &LlmConfig, output: &OutputConfig) -> Result<Self, OutputError> {
        let api_key = llm.api_key.clone().ok_or_else(|| {
            OutputError::NotConfigured("speech output requires llm.api_key".to_string())
        })?;
        let base_url = llm
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .build()
            .map_err(|error| OutputError::NotConfigured(error.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            model: output.speech_model.clone(),
            voice: output.voice.clone(),
            timeout: Duration::from_secs(llm.timeout_secs.max(1)),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechClient {
    fn format(&self) -> &str {
        "mp3"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, OutputError> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: self.format(),
        };
        debug!(
            event_name = "output.speech.request",
            model = %self.model,
            voice = %self.voice,
            chars = text.chars().count(),
            "requesting speech synthesis"
        );

        let pending = async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&body)
                .send()
                .await
                .map_err(|error| OutputError::Unreachable(error.without_url().to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(OutputError::Api {
                    status: status.as_u16(),
                    message: sanitize_api_error(&text),
                });
            }

            response
                .bytes()
                .await
                .map(|bytes| bytes.to_vec())
                .map_err(|error| OutputError::Unreachable(error.without_url().to_string()))
        };

        tokio::time::timeout(self.timeout, pending).await.map_err(|_| OutputError::Timeout {
            after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        })?
    }
}
