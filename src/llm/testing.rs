//! Mock model backends for testing

use super::types::{BackendKind, GenerationParams, ModelDescriptor, PromptFormat};
use super::{LlmError, ModelBackend};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Shared ordered record of backend calls across several mocks
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Mock backend that returns queued responses and records every call
pub struct MockBackend {
    model_id: String,
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    fail_load: Mutex<Option<String>>,
    /// When set, `generate` blocks until notified
    gate: Option<Arc<Notify>>,
    events: EventLog,
    /// Prompts and params of every generate call
    pub requests: Mutex<Vec<(String, GenerationParams)>>,
}

impl MockBackend {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            responses: Mutex::new(VecDeque::new()),
            fail_load: Mutex::new(None),
            gate: None,
            events: Arc::new(Mutex::new(Vec::new())),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Share an event log with other mocks to assert cross-model ordering
    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Block every generate call until the returned handle is notified
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn queue_response(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(Ok(text.into()));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_next_load(&self, message: impl Into<String>) {
        *self.fail_load.lock().unwrap() = Some(message.into());
    }

    pub fn recorded_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn recorded_params(&self) -> Vec<GenerationParams> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{event}", self.model_id));
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn load(&self) -> Result<(), LlmError> {
        self.record("load");
        if let Some(message) = self.fail_load.lock().unwrap().take() {
            return Err(LlmError::load_failed(message));
        }
        Ok(())
    }

    async fn unload(&self) -> Result<(), LlmError> {
        self.record("unload");
        Ok(())
    }

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap()
            .push((prompt.to_string(), params.clone()));
        self.record("generate:start");
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.record("generate:end");
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Descriptor with plain prompt format and default params
pub fn test_descriptor(id: &str) -> ModelDescriptor {
    ModelDescriptor {
        id: id.to_string(),
        backend: BackendKind::Ollama,
        backend_model: id.to_string(),
        prompt_format: PromptFormat::Plain,
        description: format!("Mock {id}"),
        defaults: GenerationParams::default(),
    }
}
