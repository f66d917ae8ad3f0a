//! Knowledge base learning
//!
//! Runs off the request path. Each delivered technical answer is either
//! folded into an existing entry (usage bump) or stored as a new entry along
//! with a few context patterns derived from the question. Nothing here can
//! affect a reply that has already been sent.

use crate::classifier::{find_domain_term, normalize, Label, STOPWORDS};
use crate::config::LearningConfig;
use crate::db::{KnowledgeEntry, NewKnowledgeEntry};
use crate::embedding::{cosine_similarity, Embedder};
use crate::generation::APOLOGY;
use crate::metrics::Metrics;
use crate::pipeline::KnowledgeStore;
use crate::retrieval::{extract_keywords, jaccard};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Weight of a two-keyword pattern
const BIGRAM_WEIGHT: f64 = 1.0;
/// Weight of a single-keyword pattern
const UNIGRAM_WEIGHT: f64 = 0.6;

const MAX_FRAGMENT_TOKENS: usize = 3;
const MAX_FRAGMENT_SHARE: f32 = 0.6;
const MAX_FRAGMENT_OVERLAP: f32 = 0.6;

/// A delivered question/answer pair
#[derive(Debug, Clone)]
pub struct LearningJob {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LearningOutcome {
    Inserted { entry_id: i64, patterns: usize },
    Deduplicated { entry_id: i64, similarity: f32 },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoKeywords,
    AnswerTooShort,
    CannedAnswer,
}

// ============================================================================
// Pattern derivation
// ============================================================================

/// Whether `fragment` is general enough to stand for the question's topic
/// without restating the question.
#[allow(clippy::cast_precision_loss)] // short strings
pub fn is_generalizable_fragment(fragment: &str, question: &str) -> bool {
    let fragment = normalize(fragment);
    let question = normalize(question);
    if fragment.is_empty() || fragment == question || STOPWORDS.contains(&fragment.as_str()) {
        return false;
    }

    let fragment_tokens: Vec<String> = fragment.split(' ').map(str::to_string).collect();
    let question_tokens: Vec<String> = question.split(' ').map(str::to_string).collect();
    if fragment_tokens.len() > MAX_FRAGMENT_TOKENS || fragment_tokens.len() >= question_tokens.len()
    {
        return false;
    }

    let fragment_chars = fragment.chars().count();
    let question_chars = question.chars().count();
    if fragment_chars as f32 > question_chars as f32 * MAX_FRAGMENT_SHARE {
        return false;
    }

    jaccard(&fragment_tokens, &question_tokens) < MAX_FRAGMENT_OVERLAP
        && jaccard(&fragment_tokens, &extract_keywords(&question)) < MAX_FRAGMENT_OVERLAP
}

/// Candidate patterns for a question: adjacent keyword pairs first, then
/// single keywords the domain vocabulary does not already cover. Every
/// candidate has passed [`is_generalizable_fragment`].
pub fn derive_patterns(question: &str, keywords: &[String], max: usize) -> Vec<(String, f64)> {
    let bigrams = keywords
        .windows(2)
        .map(|pair| (format!("{} {}", pair[0], pair[1]), BIGRAM_WEIGHT));
    let unigrams = keywords
        .iter()
        .filter(|k| find_domain_term(k).is_none())
        .map(|k| (k.clone(), UNIGRAM_WEIGHT));

    let mut patterns: Vec<(String, f64)> = Vec::new();
    for (pattern, weight) in bigrams.chain(unigrams) {
        if patterns.len() == max {
            break;
        }
        if patterns.iter().any(|(p, _)| *p == pattern) {
            continue;
        }
        if is_generalizable_fragment(&pattern, question) {
            patterns.push((pattern, weight));
        }
    }
    patterns
}

// ============================================================================
// Updater
// ============================================================================

pub struct LearningUpdater {
    store: Arc<dyn KnowledgeStore>,
    embedder: Option<Arc<dyn Embedder>>,
    config: LearningConfig,
    metrics: Arc<Metrics>,
}

impl LearningUpdater {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Option<Arc<dyn Embedder>>,
        config: LearningConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            metrics,
        }
    }

    /// Process one job, recording the outcome in metrics
    pub async fn process(&self, job: &LearningJob) -> Result<LearningOutcome, String> {
        let result = self.learn(job).await;
        match &result {
            Ok(LearningOutcome::Inserted { entry_id, patterns }) => {
                tracing::info!(entry_id, patterns, "Learned new knowledge entry");
                self.metrics.record_learning_inserted(*patterns);
            }
            Ok(LearningOutcome::Deduplicated { entry_id, similarity }) => {
                tracing::debug!(entry_id, similarity, "Question already known, bumped usage");
                self.metrics.record_learning_deduplicated();
            }
            Ok(LearningOutcome::Skipped(reason)) => {
                tracing::debug!(?reason, "Skipped learning job");
                self.metrics.record_learning_skipped();
            }
            Err(e) => {
                tracing::warn!(error = %e, "Learning job failed");
                self.metrics.record_learning_failure();
            }
        }
        result
    }

    async fn learn(&self, job: &LearningJob) -> Result<LearningOutcome, String> {
        let answer = job.answer.trim();
        if answer == APOLOGY {
            return Ok(LearningOutcome::Skipped(SkipReason::CannedAnswer));
        }
        if answer.chars().count() < self.config.min_answer_chars {
            return Ok(LearningOutcome::Skipped(SkipReason::AnswerTooShort));
        }

        let keywords = extract_keywords(&job.question);
        if keywords.is_empty() {
            return Ok(LearningOutcome::Skipped(SkipReason::NoKeywords));
        }

        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&job.question).await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!(error = %e, "Embedding failed, deduplicating lexically");
                    None
                }
            },
            None => None,
        };

        let mut candidates = self.store.find_by_keywords(&keywords).await?;
        if embedding.is_some() {
            // rewordings may share no keyword at all
            for entry in self.store.embedded_entries().await? {
                if !candidates.iter().any(|c| c.id == entry.id) {
                    candidates.push(entry);
                }
            }
        }
        if let Some((entry_id, similarity)) =
            self.find_duplicate(&keywords, embedding.as_deref(), &candidates)
        {
            self.store.increment_usage(entry_id).await?;
            return Ok(LearningOutcome::Deduplicated {
                entry_id,
                similarity,
            });
        }

        let entry = self
            .store
            .insert_entry(&NewKnowledgeEntry {
                question: job.question.trim().to_string(),
                answer: answer.to_string(),
                keywords: keywords.clone(),
                embedding,
            })
            .await?;

        let mut patterns = 0;
        for (pattern, weight) in
            derive_patterns(&job.question, &keywords, self.config.max_patterns_per_entry)
        {
            match self.store.upsert_pattern(&pattern, Label::Technical, weight).await {
                Ok(_) => patterns += 1,
                Err(e) => tracing::warn!(pattern = %pattern, error = %e, "Pattern insert failed"),
            }
        }

        Ok(LearningOutcome::Inserted {
            entry_id: entry.id,
            patterns,
        })
    }

    /// Most similar candidate at or above the applicable threshold
    fn find_duplicate(
        &self,
        keywords: &[String],
        embedding: Option<&[f32]>,
        candidates: &[KnowledgeEntry],
    ) -> Option<(i64, f32)> {
        candidates
            .iter()
            .filter_map(|c| {
                let semantic = embedding
                    .zip(c.embedding.as_deref())
                    .and_then(|(q, e)| cosine_similarity(q, e));
                let (similarity, threshold) = match semantic {
                    Some(s) => (s, self.config.dedup_threshold),
                    None => (
                        jaccard(keywords, &c.keywords),
                        self.config.lexical_dedup_threshold,
                    ),
                };
                (similarity >= threshold).then_some((c.id, similarity))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}

// ============================================================================
// Background worker
// ============================================================================

/// Sending half of the learning queue
#[derive(Clone)]
pub struct LearningQueue {
    tx: mpsc::Sender<LearningJob>,
    metrics: Arc<Metrics>,
}

impl LearningQueue {
    #[cfg(test)]
    pub fn from_sender(tx: mpsc::Sender<LearningJob>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Queue a job without waiting. Returns false when the job was dropped.
    pub fn submit(&self, job: LearningJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Learning queue full, dropping job");
                self.metrics.record_learning_dropped();
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Learning worker stopped, dropping job");
                self.metrics.record_learning_dropped();
                false
            }
        }
    }
}

/// Start the worker. It drains jobs in order until cancelled or until every
/// queue handle is dropped.
pub fn spawn(
    updater: LearningUpdater,
    cancel: CancellationToken,
) -> (LearningQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(updater.config.queue_capacity.max(1));
    let queue = LearningQueue {
        tx,
        metrics: updater.metrics.clone(),
    };

    let handle = tokio::spawn(async move {
        tracing::info!("Learning worker started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => {
                        // outcome is already logged and counted
                        let _ = updater.process(&job).await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!("Learning worker stopped");
    });

    (queue, handle)
}
