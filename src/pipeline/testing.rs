//! Failing store doubles and a pipeline harness for tests

use super::{ConversationStore, DatabaseStore, KnowledgeStore, Pipeline};
use crate::classifier::Label;
use crate::config::PipelineConfig;
use crate::db::{
    ContextPattern, Conversation, Database, KnowledgeEntry, Message, NewKnowledgeEntry, NewMessage,
};
use crate::embedding::Embedder;
use crate::learning::{LearningJob, LearningQueue};
use crate::llm::testing::{test_descriptor, MockBackend};
use crate::llm::{ModelBackend, ModelManager};
use crate::metrics::Metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Knowledge store whose every call fails
pub struct FailingKnowledgeStore;

#[async_trait]
impl KnowledgeStore for FailingKnowledgeStore {
    async fn find_by_keywords(&self, _: &[String]) -> Result<Vec<KnowledgeEntry>, String> {
        Err("knowledge store unavailable".to_string())
    }

    async fn embedded_entries(&self) -> Result<Vec<KnowledgeEntry>, String> {
        Err("knowledge store unavailable".to_string())
    }

    async fn insert_entry(&self, _: &NewKnowledgeEntry) -> Result<KnowledgeEntry, String> {
        Err("knowledge store unavailable".to_string())
    }

    async fn increment_usage(&self, _: i64) -> Result<(), String> {
        Err("knowledge store unavailable".to_string())
    }

    async fn match_pattern(&self, _: &str, _: &str) -> Result<Option<ContextPattern>, String> {
        Err("knowledge store unavailable".to_string())
    }

    async fn touch_pattern(&self, _: i64) -> Result<(), String> {
        Err("knowledge store unavailable".to_string())
    }

    async fn upsert_pattern(&self, _: &str, _: Label, _: f64) -> Result<ContextPattern, String> {
        Err("knowledge store unavailable".to_string())
    }
}

/// Conversation store whose every call fails
pub struct FailingConversationStore;

#[async_trait]
impl ConversationStore for FailingConversationStore {
    async fn open_conversation(&self, _: &str) -> Result<Conversation, String> {
        Err("conversation store unavailable".to_string())
    }

    async fn append_message(&self, _: &str, _: &NewMessage) -> Result<Message, String> {
        Err("conversation store unavailable".to_string())
    }

    async fn get_messages(&self, _: &str) -> Result<Vec<Message>, String> {
        Err("conversation store unavailable".to_string())
    }

    async fn close_conversation(&self, _: &str) -> Result<Option<Conversation>, String> {
        Err("conversation store unavailable".to_string())
    }

    async fn list_unresolved(&self, _: u32) -> Result<Vec<Message>, String> {
        Err("conversation store unavailable".to_string())
    }
}

/// Knowledge store that stalls before chosen calls, then delegates
pub struct SlowKnowledgeStore {
    inner: Arc<dyn KnowledgeStore>,
    delay: Duration,
    slow_patterns: bool,
    slow_lookups: bool,
}

impl SlowKnowledgeStore {
    pub fn new(inner: Arc<dyn KnowledgeStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            slow_patterns: false,
            slow_lookups: false,
        }
    }

    /// Stall context pattern matching (classification)
    pub fn slow_patterns(mut self) -> Self {
        self.slow_patterns = true;
        self
    }

    /// Stall keyword lookups (retrieval)
    pub fn slow_lookups(mut self) -> Self {
        self.slow_lookups = true;
        self
    }
}

#[async_trait]
impl KnowledgeStore for SlowKnowledgeStore {
    async fn find_by_keywords(&self, keywords: &[String]) -> Result<Vec<KnowledgeEntry>, String> {
        if self.slow_lookups {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.find_by_keywords(keywords).await
    }

    async fn embedded_entries(&self) -> Result<Vec<KnowledgeEntry>, String> {
        self.inner.embedded_entries().await
    }

    async fn insert_entry(&self, entry: &NewKnowledgeEntry) -> Result<KnowledgeEntry, String> {
        self.inner.insert_entry(entry).await
    }

    async fn increment_usage(&self, entry_id: i64) -> Result<(), String> {
        self.inner.increment_usage(entry_id).await
    }

    async fn match_pattern(
        &self,
        text: &str,
        keywords: &str,
    ) -> Result<Option<ContextPattern>, String> {
        if self.slow_patterns {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.match_pattern(text, keywords).await
    }

    async fn touch_pattern(&self, pattern_id: i64) -> Result<(), String> {
        self.inner.touch_pattern(pattern_id).await
    }

    async fn upsert_pattern(
        &self,
        pattern: &str,
        label: Label,
        weight: f64,
    ) -> Result<ContextPattern, String> {
        self.inner.upsert_pattern(pattern, label, weight).await
    }
}

/// A pipeline over an in-memory database and one mock model
pub struct TestPipeline {
    pub pipeline: Arc<Pipeline>,
    pub db: Database,
    pub backend: Arc<MockBackend>,
    pub metrics: Arc<Metrics>,
    /// Jobs the pipeline queued for learning
    pub learning_rx: mpsc::Receiver<LearningJob>,
}

type KnowledgeWrapper = Box<dyn FnOnce(Arc<dyn KnowledgeStore>) -> SlowKnowledgeStore + Send>;

pub struct TestPipelineBuilder {
    config: PipelineConfig,
    conversations: Option<Arc<dyn ConversationStore>>,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    /// Wraps the in-memory knowledge store
    slow_knowledge: Option<KnowledgeWrapper>,
    load_model: bool,
    gated: bool,
}

impl TestPipeline {
    pub fn builder() -> TestPipelineBuilder {
        TestPipelineBuilder {
            config: PipelineConfig::default(),
            conversations: None,
            knowledge: None,
            embedder: None,
            slow_knowledge: None,
            load_model: true,
            gated: false,
        }
    }

    /// Drain learning jobs queued so far
    pub fn queued_jobs(&mut self) -> Vec<LearningJob> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.learning_rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}

impl TestPipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn conversations(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    pub fn knowledge(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Put a stalling wrapper around the default knowledge store
    pub fn slow_knowledge(
        mut self,
        wrap: impl FnOnce(Arc<dyn KnowledgeStore>) -> SlowKnowledgeStore + Send + 'static,
    ) -> Self {
        self.slow_knowledge = Some(Box::new(wrap));
        self
    }

    /// Make every generate call hang until it is cancelled
    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    /// Leave the model unloaded
    pub fn unloaded(mut self) -> Self {
        self.load_model = false;
        self
    }

    pub async fn build(self) -> TestPipeline {
        let db = Database::open_in_memory().unwrap();
        db.seed_default_patterns().unwrap();
        let store = Arc::new(DatabaseStore::new(db.clone()));
        let mut default_knowledge: Arc<dyn KnowledgeStore> = store.clone();
        let default_conversations: Arc<dyn ConversationStore> = store;
        if let Some(wrap) = self.slow_knowledge {
            default_knowledge = Arc::new(wrap(default_knowledge));
        }

        let backend = if self.gated {
            // the gate is never notified
            MockBackend::new("model-a").gated().0
        } else {
            MockBackend::new("model-a")
        };
        let backend = Arc::new(backend);
        let manager = Arc::new(ModelManager::new(
            vec![(
                test_descriptor("model-a"),
                backend.clone() as Arc<dyn ModelBackend>,
            )],
            "model-a",
        ));
        if self.load_model {
            manager.switch_model("model-a").await.unwrap();
        }

        let metrics = Arc::new(Metrics::default());
        let (tx, learning_rx) = mpsc::channel(16);
        let queue = LearningQueue::from_sender(tx, metrics.clone());

        let pipeline = Arc::new(
            Pipeline::new(
                self.config,
                manager,
                self.knowledge.unwrap_or(default_knowledge),
                self.conversations.unwrap_or(default_conversations),
                self.embedder,
                metrics.clone(),
            )
            .with_learning(queue),
        );

        TestPipeline {
            pipeline,
            db,
            backend,
            metrics,
            learning_rx,
        }
    }
}
