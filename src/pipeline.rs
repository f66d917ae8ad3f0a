//! Conversation orchestrator
//!
//! One call per user turn: classify, route by label, optionally ground the
//! reply in the knowledge base, generate, format, persist, and queue the
//! exchange for learning. Turns run concurrently; the model manager is the
//! only shared serialisation point.

mod traits;

#[cfg(test)]
pub mod testing;

pub use traits::{ConversationStore, DatabaseStore, KnowledgeStore};

use crate::classifier::{Classifier, Label};
use crate::config::{PipelineConfig, RuntimeSettings};
use crate::db::{Conversation, Message, NewMessage};
use crate::embedding::Embedder;
use crate::formatting::{format_knowledge_answer, format_response};
use crate::generation::{GenerationEngine, GenerationError, Persona, APOLOGY};
use crate::learning::{LearningJob, LearningQueue};
use crate::llm::{
    GenerationParams, LlmError, LoadState, ModelManager, ModelStatus, ModelSummary,
    ParamOverrides, PromptFormat,
};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::retrieval::{RetrievalEngine, RetrievalHit};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

/// Errors a turn can surface to the caller. Everything else degrades.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("model not ready: {0}")]
    ModelNotReady(String),
    #[error("conversation {0} is closed")]
    ConversationClosed(String),
}

/// Reply to one user turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnReply {
    pub response_text: String,
    pub label: Label,
    /// Retrieval score when the reply is grounded in a knowledge entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Technical question answered without a confident knowledge match
    pub unresolved: bool,
    /// Set on profanity; the user may resume after this instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub active_model: String,
    pub load_state: LoadState,
    pub prompt_format: PromptFormat,
    pub defaults: GenerationParams,
    pub retrieval_priority: bool,
    pub counters: MetricsSnapshot,
}

/// Text and bookkeeping produced by a routing branch
struct Routed {
    text: String,
    hit: Option<RetrievalHit>,
    cooldown_until: Option<DateTime<Utc>>,
    /// Model output worth learning from
    learnable: bool,
}

impl Routed {
    fn canned(text: String) -> Self {
        Self {
            text,
            hit: None,
            cooldown_until: None,
            learnable: false,
        }
    }
}

pub struct Pipeline {
    classifier: Classifier,
    retrieval: RetrievalEngine,
    generator: Arc<GenerationEngine>,
    conversations: Arc<dyn ConversationStore>,
    learning: Option<LearningQueue>,
    config: PipelineConfig,
    settings: RuntimeSettings,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        manager: Arc<ModelManager>,
        knowledge: Arc<dyn KnowledgeStore>,
        conversations: Arc<dyn ConversationStore>,
        embedder: Option<Arc<dyn Embedder>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let generator = Arc::new(
            GenerationEngine::new(manager)
                .with_company(config.company_name.clone())
                .with_timeout(config.timeouts.generation),
        );
        let classifier = Classifier::new(
            knowledge.clone(),
            generator.clone(),
            metrics.clone(),
            config.stages.classification_fallback,
            config.timeouts.classification,
        );
        let retrieval = RetrievalEngine::new(knowledge, embedder, config.retrieval, metrics.clone());

        Self {
            classifier,
            retrieval,
            generator,
            conversations,
            learning: None,
            settings: RuntimeSettings::new(&config),
            config,
            metrics,
        }
    }

    /// Attach the learning queue; without one nothing is learned
    pub fn with_learning(mut self, queue: LearningQueue) -> Self {
        self.learning = Some(queue);
        self
    }

    fn manager(&self) -> &Arc<ModelManager> {
        self.generator.manager()
    }

    /// Handle one user utterance
    pub async fn send_turn(
        &self,
        conversation_id: &str,
        utterance: &str,
    ) -> Result<TurnReply, TurnError> {
        let started = Instant::now();
        tracing::debug!(conv_id = %conversation_id, phase = "received", "Turn received");

        match self.conversations.open_conversation(conversation_id).await {
            Ok(conv) if !conv.is_open() => {
                tracing::info!(conv_id = %conversation_id, "Rejected turn on closed conversation");
                self.metrics.record_closed_rejection();
                return Err(TurnError::ConversationClosed(conversation_id.to_string()));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(conv_id = %conversation_id, error = %e, "Could not open conversation");
                self.metrics.record_persistence_failure();
            }
        }

        let label = match timeout(
            self.config.timeouts.classification,
            self.classifier.classify(utterance),
        )
        .await
        {
            Ok(c) => {
                tracing::debug!(
                    conv_id = %conversation_id,
                    phase = "classified",
                    label = %c.label,
                    source = ?c.source,
                    matched = ?c.matched_pattern,
                    "Turn classified"
                );
                c.label
            }
            Err(_) => {
                tracing::warn!(conv_id = %conversation_id, "Classification timed out, treating as casual");
                Label::Casual
            }
        };

        let routed = match self.route(conversation_id, label, utterance).await {
            Ok(routed) => routed,
            Err(TurnError::ModelNotReady(model)) => {
                self.persist(
                    conversation_id,
                    NewMessage::user(utterance, Some(label)),
                )
                .await;
                return Err(TurnError::ModelNotReady(model));
            }
            Err(e) => return Err(e),
        };

        let confidence = routed.hit.as_ref().map(|h| h.score);
        let unresolved = label == Label::Technical && routed.hit.is_none();

        self.persist(
            conversation_id,
            NewMessage::user(utterance, Some(label)).with_confidence(confidence.map(f64::from)),
        )
        .await;
        self.persist(
            conversation_id,
            NewMessage::assistant(routed.text.clone(), label)
                .with_confidence(confidence.map(f64::from))
                .unresolved(unresolved),
        )
        .await;
        tracing::debug!(conv_id = %conversation_id, phase = "persisted", "Turn persisted");

        let elapsed = started.elapsed();
        self.metrics.record_turn(label, elapsed);
        tracing::info!(
            conv_id = %conversation_id,
            label = %label,
            confidence = ?confidence,
            unresolved,
            duration_ms = %elapsed.as_millis(),
            "Turn completed"
        );

        if routed.learnable && label == Label::Technical && self.config.stages.learning {
            if let Some(queue) = &self.learning {
                queue.submit(LearningJob {
                    question: utterance.to_string(),
                    answer: routed.text.clone(),
                });
            }
        }

        Ok(TurnReply {
            response_text: routed.text,
            label,
            confidence,
            unresolved,
            cooldown_until: routed.cooldown_until,
        })
    }

    async fn route(
        &self,
        conversation_id: &str,
        label: Label,
        utterance: &str,
    ) -> Result<Routed, TurnError> {
        match label {
            Label::Profanity => {
                let until = Utc::now()
                    + chrono::Duration::from_std(self.config.profanity_cooldown)
                        .unwrap_or_else(|_| chrono::Duration::minutes(30));
                Ok(Routed {
                    text: profanity_warning(self.config.profanity_cooldown, until),
                    hit: None,
                    cooldown_until: Some(until),
                    learnable: false,
                })
            }
            Label::NonCounseling => Ok(Routed::canned(refusal(&self.config.company_name))),
            Label::Casual => self.generate(Persona::Friendly, None, utterance).await,
            Label::Technical => {
                let hit = self.retrieve(conversation_id, utterance).await;
                let mut routed = self
                    .generate(
                        Persona::Counselor,
                        hit.as_ref().map(|h| h.entry.answer.as_str()),
                        utterance,
                    )
                    .await?;
                if let Some(hit) = hit {
                    if !routed.learnable {
                        // generation gave up; the stored answer is still good
                        routed.text = format_knowledge_answer(&hit.entry.answer);
                    }
                    routed.hit = Some(hit);
                }
                Ok(routed)
            }
        }
    }

    async fn retrieve(&self, conversation_id: &str, utterance: &str) -> Option<RetrievalHit> {
        if !self.config.stages.retrieval || !self.settings.retrieval_priority() {
            return None;
        }
        match timeout(self.config.timeouts.retrieval, self.retrieval.retrieve(utterance)).await {
            Ok(hit) => {
                tracing::debug!(
                    conv_id = %conversation_id,
                    phase = "retrieved",
                    entry_id = ?hit.as_ref().map(|h| h.entry.id),
                    score = ?hit.as_ref().map(|h| h.score),
                    "Retrieval finished"
                );
                hit
            }
            Err(_) => {
                tracing::warn!(conv_id = %conversation_id, "Retrieval timed out, continuing without context");
                self.metrics.record_retrieval_degraded();
                None
            }
        }
    }

    async fn generate(
        &self,
        persona: Persona,
        context: Option<&str>,
        utterance: &str,
    ) -> Result<Routed, TurnError> {
        let result = self
            .generator
            .generate(persona, context, utterance, &ParamOverrides::default())
            .await;

        let (text, learnable) = match result {
            Ok(generated) => {
                if generated.attempts > 1 {
                    self.metrics.record_generation_rejected();
                }
                tracing::debug!(
                    phase = "generated",
                    model = %generated.model_id,
                    attempts = generated.attempts,
                    fallback = generated.fallback,
                    "Generation finished"
                );
                if generated.fallback {
                    self.metrics.record_generation_fallback();
                    (generated.text, false)
                } else {
                    (self.format(&generated.text), true)
                }
            }
            Err(GenerationError::ModelNotReady(model)) => {
                self.metrics.record_model_not_ready();
                return Err(TurnError::ModelNotReady(model));
            }
            Err(GenerationError::Timeout(after)) => {
                tracing::warn!(timeout_ms = %after.as_millis(), "Generation timed out");
                self.metrics.record_generation_timeout();
                (APOLOGY.to_string(), false)
            }
            Err(GenerationError::Backend(e)) => {
                tracing::warn!(error = %e, "Generation failed");
                self.metrics.record_generation_error();
                (APOLOGY.to_string(), false)
            }
        };

        Ok(Routed {
            text,
            hit: None,
            cooldown_until: None,
            learnable,
        })
    }

    fn format(&self, text: &str) -> String {
        if self.config.stages.formatting {
            let formatted = format_response(text);
            tracing::debug!(phase = "formatted", chars = formatted.chars().count(), "Reply formatted");
            formatted
        } else {
            text.to_string()
        }
    }

    async fn persist(&self, conversation_id: &str, message: NewMessage) {
        if let Err(e) = self
            .conversations
            .append_message(conversation_id, &message)
            .await
        {
            tracing::warn!(
                conv_id = %conversation_id,
                role = %message.role,
                error = %e,
                "Failed to persist message"
            );
            self.metrics.record_persistence_failure();
        }
    }

    // ==================== Control surface ====================

    pub async fn switch_model(&self, model_id: &str) -> Result<ModelStatus, LlmError> {
        self.manager().switch_model(model_id).await
    }

    /// Release the active model's resources without switching away from it
    pub async fn unload_model(&self) -> Result<ModelStatus, LlmError> {
        self.manager().unload().await
    }

    pub fn get_status(&self) -> PipelineStatus {
        let model = self.manager().status();
        PipelineStatus {
            active_model: model.active_model,
            load_state: model.load_state,
            prompt_format: model.prompt_format,
            defaults: model.defaults,
            retrieval_priority: self.settings.retrieval_priority(),
            counters: self.metrics.snapshot(),
        }
    }

    pub fn set_retrieval_priority(&self, enabled: bool) {
        tracing::info!(enabled, "Retrieval priority changed");
        self.settings.set_retrieval_priority(enabled);
    }

    pub fn list_models(&self) -> Vec<ModelSummary> {
        self.manager().descriptors()
    }

    /// Close a conversation so later turns are rejected; `None` if unknown
    pub async fn close_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, String> {
        let closed = self.conversations.close_conversation(conversation_id).await?;
        if closed.is_some() {
            tracing::info!(conv_id = %conversation_id, "Conversation closed");
        }
        Ok(closed)
    }

    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, String> {
        self.conversations.get_messages(conversation_id).await
    }

    pub async fn list_unresolved(&self, limit: u32) -> Result<Vec<Message>, String> {
        self.conversations.list_unresolved(limit).await
    }
}

/// Fixed reply for off-topic questions
pub fn refusal(company_name: &str) -> String {
    format!("저는 {company_name} AI 상담사로 해당 질문은 상담 범위를 벗어나 답변 드릴 수 없습니다.")
}

/// Fixed reply for profanity, carrying the instant the user may resume
pub fn profanity_warning(cooldown: Duration, until: DateTime<Utc>) -> String {
    let minutes = (cooldown.as_secs() / 60).max(1);
    format!(
        "욕설을 하시면 응대를 할 수 없습니다. {minutes}분 후 재문의 바랍니다. (재문의 가능 시각: {})",
        until.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}
