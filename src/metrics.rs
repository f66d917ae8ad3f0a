//! In-process pipeline counters
//!
//! Plain atomics, read back through `get_status`.

use crate::classifier::Label;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct PathStats {
    turns: AtomicU64,
    latency_ms_total: AtomicU64,
}

impl PathStats {
    fn record(&self, latency: Duration) {
        self.turns.fetch_add(1, Ordering::Relaxed);
        self.latency_ms_total.fetch_add(
            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    fn snapshot(&self) -> PathSnapshot {
        let turns = self.turns.load(Ordering::Relaxed);
        let total = self.latency_ms_total.load(Ordering::Relaxed);
        PathSnapshot {
            turns,
            avg_latency_ms: total.checked_div(turns).unwrap_or(0),
        }
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    casual: PathStats,
    technical: PathStats,
    non_counseling: PathStats,
    profanity: PathStats,

    retrieval_hits: AtomicU64,
    retrieval_misses: AtomicU64,
    retrieval_degraded: AtomicU64,

    intent_calls: AtomicU64,
    generation_rejected: AtomicU64,
    generation_fallbacks: AtomicU64,
    generation_timeouts: AtomicU64,
    generation_errors: AtomicU64,
    model_not_ready: AtomicU64,
    closed_conversation_rejections: AtomicU64,

    persistence_failures: AtomicU64,

    learning_inserted: AtomicU64,
    learning_deduplicated: AtomicU64,
    learning_skipped: AtomicU64,
    learning_failures: AtomicU64,
    learning_dropped: AtomicU64,
    patterns_derived: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
    pub fn record_turn(&self, label: Label, latency: Duration) {
        let path = match label {
            Label::Casual => &self.casual,
            Label::Technical => &self.technical,
            Label::NonCounseling => &self.non_counseling,
            Label::Profanity => &self.profanity,
        };
        path.record(latency);
    }

    pub fn record_retrieval_hit(&self) {
        bump(&self.retrieval_hits);
    }

    pub fn record_retrieval_miss(&self) {
        bump(&self.retrieval_misses);
    }

    pub fn record_retrieval_degraded(&self) {
        bump(&self.retrieval_degraded);
    }

    pub fn record_intent_call(&self) {
        bump(&self.intent_calls);
    }

    pub fn record_generation_rejected(&self) {
        bump(&self.generation_rejected);
    }

    pub fn record_generation_fallback(&self) {
        bump(&self.generation_fallbacks);
    }

    pub fn record_generation_timeout(&self) {
        bump(&self.generation_timeouts);
    }

    pub fn record_generation_error(&self) {
        bump(&self.generation_errors);
    }

    pub fn record_model_not_ready(&self) {
        bump(&self.model_not_ready);
    }

    pub fn record_closed_rejection(&self) {
        bump(&self.closed_conversation_rejections);
    }

    pub fn record_persistence_failure(&self) {
        bump(&self.persistence_failures);
    }

    pub fn record_learning_inserted(&self, patterns: usize) {
        bump(&self.learning_inserted);
        self.patterns_derived
            .fetch_add(patterns as u64, Ordering::Relaxed);
    }

    pub fn record_learning_deduplicated(&self) {
        bump(&self.learning_deduplicated);
    }

    pub fn record_learning_skipped(&self) {
        bump(&self.learning_skipped);
    }

    pub fn record_learning_failure(&self) {
        bump(&self.learning_failures);
    }

    pub fn record_learning_dropped(&self) {
        bump(&self.learning_dropped);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            turns: TurnSnapshot {
                casual: self.casual.snapshot(),
                technical: self.technical.snapshot(),
                non_counseling: self.non_counseling.snapshot(),
                profanity: self.profanity.snapshot(),
            },
            retrieval: RetrievalSnapshot {
                hits: load(&self.retrieval_hits),
                misses: load(&self.retrieval_misses),
                degraded: load(&self.retrieval_degraded),
            },
            generation: GenerationSnapshot {
                intent_calls: load(&self.intent_calls),
                rejected: load(&self.generation_rejected),
                fallbacks: load(&self.generation_fallbacks),
                timeouts: load(&self.generation_timeouts),
                errors: load(&self.generation_errors),
                model_not_ready: load(&self.model_not_ready),
            },
            learning: LearningSnapshot {
                inserted: load(&self.learning_inserted),
                deduplicated: load(&self.learning_deduplicated),
                skipped: load(&self.learning_skipped),
                failures: load(&self.learning_failures),
                dropped: load(&self.learning_dropped),
                patterns_derived: load(&self.patterns_derived),
            },
            persistence_failures: load(&self.persistence_failures),
            closed_conversation_rejections: load(&self.closed_conversation_rejections),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PathSnapshot {
    pub turns: u64,
    pub avg_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnSnapshot {
    pub casual: PathSnapshot,
    pub technical: PathSnapshot,
    pub non_counseling: PathSnapshot,
    pub profanity: PathSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub degraded: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationSnapshot {
    pub intent_calls: u64,
    pub rejected: u64,
    pub fallbacks: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub model_not_ready: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningSnapshot {
    pub inserted: u64,
    pub deduplicated: u64,
    pub skipped: u64,
    pub failures: u64,
    pub dropped: u64,
    pub patterns_derived: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub turns: TurnSnapshot,
    pub retrieval: RetrievalSnapshot,
    pub generation: GenerationSnapshot,
    pub learning: LearningSnapshot,
    pub persistence_failures: u64,
    pub closed_conversation_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_path_latency_average() {
        let metrics = Metrics::default();
        metrics.record_turn(Label::Technical, Duration::from_millis(100));
        metrics.record_turn(Label::Technical, Duration::from_millis(300));
        metrics.record_turn(Label::Casual, Duration::from_millis(50));

        let snap = metrics.snapshot();
        assert_eq!(snap.turns.technical.turns, 2);
        assert_eq!(snap.turns.technical.avg_latency_ms, 200);
        assert_eq!(snap.turns.casual.turns, 1);
        assert_eq!(snap.turns.profanity.avg_latency_ms, 0);
    }

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::default();
        metrics.record_retrieval_hit();
        metrics.record_retrieval_degraded();
        metrics.record_learning_inserted(2);
        metrics.record_learning_inserted(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.retrieval.hits, 1);
        assert_eq!(snap.retrieval.degraded, 1);
        assert_eq!(snap.learning.inserted, 2);
        assert_eq!(snap.learning.patterns_derived, 3);
    }
}
