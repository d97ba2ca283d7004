//! Deterministic model double for orchestration tests and offline demos.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use triage_core::domain::conversation::Turn;

use crate::llm::{LanguageModel, ModelError, ToolSpec};

#[derive(Clone, Debug, PartialEq)]
pub struct ModelCall {
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolSpec>,
}

/// Replays scripted replies in order; the last reply repeats once the script
/// runs out. Every invocation is recorded.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<Turn, ModelError>>>,
    calls: Mutex<Vec<ModelCall>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<Turn, ModelError>>) -> Self {
        Self { script: Mutex::new(script.into()), calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    fn next_reply(&self) -> Result<Turn, ModelError> {
        let mut script = match self.script.lock() {
            Ok(script) => script,
            Err(poisoned) => poisoned.into_inner(),
        };
        match script.len() {
            0 => Err(ModelError::NotConfigured("scripted model has no replies".to_string())),
            1 => script
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ModelError::NotConfigured("empty script".to_string()))),
            _ => script
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::NotConfigured("empty script".to_string()))),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn invoke(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<Turn, ModelError> {
        let call = ModelCall { turns: turns.to_vec(), tools: tools.to_vec() };
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
        self.next_reply()
    }
}
