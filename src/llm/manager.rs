//! Active model ownership and lifecycle
//!
//! One model is active at a time. Generations and switches share a single
//! FIFO slot (`tokio::sync::Mutex`), so a switch waits for in-flight
//! generations to drain and every generation queued after a switch runs on
//! the new model.

use super::types::{GenerationParams, LoadState, ModelDescriptor, PromptFormat};
use super::{all_models, LlmConfig, LlmError, LoggingBackend, ModelBackend};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// Fallback when `DEFAULT_MODEL` is unset or unknown
const DEFAULT_MODEL_ID: &str = "llama-3.1-8b";

/// Snapshot of the active model
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub active_model: String,
    pub load_state: LoadState,
    pub prompt_format: PromptFormat,
    pub defaults: GenerationParams,
}

/// One row of the model listing
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub id: String,
    pub backend: &'static str,
    pub description: String,
    pub load_state: LoadState,
    pub active: bool,
}

/// Result of one generation on the active model
#[derive(Debug, Clone)]
pub struct Invocation {
    pub model_id: String,
    /// Prompt exactly as sent, for echo stripping
    pub prompt: String,
    pub text: String,
}

pub struct ModelManager {
    descriptors: HashMap<String, ModelDescriptor>,
    /// Registration order, for stable listings
    order: Vec<String>,
    backends: HashMap<String, Arc<dyn ModelBackend>>,
    states: RwLock<HashMap<String, LoadState>>,
    /// Exclusive slot; holds the active model id
    slot: Mutex<String>,
    /// Lock-free view of the active id for status reads during generation
    active_view: RwLock<String>,
}

impl ModelManager {
    /// Build a manager over explicit backends. The first entry is active when
    /// `active` does not name a registered model.
    pub fn new(entries: Vec<(ModelDescriptor, Arc<dyn ModelBackend>)>, active: &str) -> Self {
        let mut descriptors = HashMap::new();
        let mut backends = HashMap::new();
        let mut states = HashMap::new();
        let mut order = Vec::new();

        for (descriptor, backend) in entries {
            let id = descriptor.id.clone();
            order.push(id.clone());
            states.insert(id.clone(), LoadState::Unloaded);
            backends.insert(id.clone(), backend);
            descriptors.insert(id, descriptor);
        }

        let active = if descriptors.contains_key(active) {
            active.to_string()
        } else {
            order.first().cloned().unwrap_or_default()
        };

        Self {
            descriptors,
            order,
            backends,
            states: RwLock::new(states),
            slot: Mutex::new(active.clone()),
            active_view: RwLock::new(active),
        }
    }

    /// Register every built-in model against the configured servers
    pub fn from_config(config: &LlmConfig) -> Self {
        let entries = all_models()
            .iter()
            .map(|def| {
                let backend: Arc<dyn ModelBackend> =
                    Arc::new(LoggingBackend::new((def.factory)(def, config)));
                (def.descriptor(), backend)
            })
            .collect();

        let requested = config.default_model.as_deref().unwrap_or(DEFAULT_MODEL_ID);
        if !all_models().iter().any(|m| m.id == requested) {
            tracing::warn!(model = %requested, fallback = DEFAULT_MODEL_ID, "Unknown default model");
        }
        Self::new(entries, requested)
    }

    pub fn active_model_id(&self) -> String {
        self.active_view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn load_state(&self, model_id: &str) -> LoadState {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model_id)
            .cloned()
            .unwrap_or(LoadState::Unloaded)
    }

    fn set_state(&self, model_id: &str, state: LoadState) {
        tracing::debug!(model = %model_id, state = ?state, "Model state change");
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model_id.to_string(), state);
    }

    fn set_active(&self, slot: &mut String, model_id: &str) {
        model_id.clone_into(slot);
        *self
            .active_view
            .write()
            .unwrap_or_else(PoisonError::into_inner) = model_id.to_string();
    }

    /// Make `model_id` the active model.
    ///
    /// Waits for queued generations ahead of it, unloads the current model,
    /// then loads the target. A failed load leaves the target active in the
    /// error state so later generations fail fast instead of reaching the
    /// previous model.
    pub async fn switch_model(&self, model_id: &str) -> Result<ModelStatus, LlmError> {
        let backend = self
            .backends
            .get(model_id)
            .cloned()
            .ok_or_else(|| LlmError::unknown_model(model_id))?;

        let mut slot = self.slot.lock().await;

        if *slot == model_id && self.load_state(model_id).is_ready() {
            tracing::debug!(model = %model_id, "Switch requested to active ready model");
            return Ok(self.status_of(model_id));
        }

        let previous = slot.clone();
        self.set_state(model_id, LoadState::Loading);

        if previous != model_id && self.load_state(&previous) != LoadState::Unloaded {
            if let Some(current) = self.backends.get(&previous) {
                if let Err(e) = current.unload().await {
                    tracing::warn!(model = %previous, error = %e, "Unload failed, continuing switch");
                }
            }
            self.set_state(&previous, LoadState::Unloaded);
        }

        self.set_active(&mut slot, model_id);

        match backend.load().await {
            Ok(()) => {
                self.set_state(model_id, LoadState::Ready);
                tracing::info!(from = %previous, to = %model_id, "Active model switched");
                Ok(self.status_of(model_id))
            }
            Err(e) => {
                self.set_state(
                    model_id,
                    LoadState::Error {
                        message: e.message.clone(),
                    },
                );
                Err(LlmError::load_failed(format!(
                    "failed to load {model_id}: {}",
                    e.message
                )))
            }
        }
    }

    /// Unload the active model; it stays active in the unloaded state and
    /// generations fail with not-ready until the next switch.
    pub async fn unload(&self) -> Result<ModelStatus, LlmError> {
        let slot = self.slot.lock().await;
        if let Some(backend) = self.backends.get(slot.as_str()) {
            backend.unload().await?;
        }
        self.set_state(&slot, LoadState::Unloaded);
        tracing::info!(model = %slot.as_str(), "Active model unloaded");
        Ok(self.status_of(&slot))
    }

    /// Run one generation on the active model.
    ///
    /// `build` receives the descriptor of the model that will execute the
    /// call, under the same lock, and returns the rendered prompt and params.
    pub async fn invoke_with<F>(&self, build: F) -> Result<Invocation, LlmError>
    where
        F: FnOnce(&ModelDescriptor) -> (String, GenerationParams) + Send,
    {
        let slot = self.slot.lock().await;
        let model_id = slot.as_str();

        if !self.load_state(model_id).is_ready() {
            return Err(LlmError::not_ready(model_id));
        }

        let (descriptor, backend) = self
            .descriptors
            .get(model_id)
            .zip(self.backends.get(model_id))
            .ok_or_else(|| LlmError::unknown_model(model_id))?;

        let (prompt, params) = build(descriptor);
        let text = backend.generate(&prompt, &params).await?;

        Ok(Invocation {
            model_id: model_id.to_string(),
            prompt,
            text,
        })
    }

    /// Run a pre-rendered prompt on the active model
    #[allow(dead_code)] // Used in tests
    pub async fn invoke(&self, prompt: &str, params: &GenerationParams) -> Result<Invocation, LlmError> {
        self.invoke_with(|_| (prompt.to_string(), params.clone()))
            .await
    }

    pub fn status(&self) -> ModelStatus {
        self.status_of(&self.active_model_id())
    }

    fn status_of(&self, model_id: &str) -> ModelStatus {
        let descriptor = self.descriptors.get(model_id);
        ModelStatus {
            active_model: model_id.to_string(),
            load_state: self.load_state(model_id),
            prompt_format: descriptor.map_or(PromptFormat::Plain, |d| d.prompt_format),
            defaults: descriptor.map(|d| d.defaults.clone()).unwrap_or_default(),
        }
    }

    pub fn descriptors(&self) -> Vec<ModelSummary> {
        let active = self.active_model_id();
        self.order
            .iter()
            .filter_map(|id| self.descriptors.get(id))
            .map(|d| ModelSummary {
                id: d.id.clone(),
                backend: d.backend.display_name(),
                description: d.description.clone(),
                load_state: self.load_state(&d.id),
                active: d.id == active,
            })
            .collect()
    }
}
