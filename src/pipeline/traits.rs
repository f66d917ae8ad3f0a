//! Storage abstractions the pipeline depends on
//!
//! These traits let the pipeline run against an in-memory store in tests.

use crate::classifier::Label;
use crate::db::{
    ContextPattern, Conversation, KnowledgeEntry, Message, NewKnowledgeEntry, NewMessage,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Knowledge base and context patterns
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Entries sharing at least one keyword with the query
    async fn find_by_keywords(&self, keywords: &[String]) -> Result<Vec<KnowledgeEntry>, String>;

    /// Every entry with a stored embedding, for semantic comparison
    async fn embedded_entries(&self) -> Result<Vec<KnowledgeEntry>, String>;

    async fn insert_entry(&self, entry: &NewKnowledgeEntry) -> Result<KnowledgeEntry, String>;

    async fn increment_usage(&self, entry_id: i64) -> Result<(), String>;

    /// Best pattern contained in the normalized text or its keyword string
    async fn match_pattern(
        &self,
        text: &str,
        keywords: &str,
    ) -> Result<Option<ContextPattern>, String>;

    async fn touch_pattern(&self, pattern_id: i64) -> Result<(), String>;

    async fn upsert_pattern(
        &self,
        pattern: &str,
        label: Label,
        weight: f64,
    ) -> Result<ContextPattern, String>;
}

/// Conversation transcript storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Get the conversation, creating it open if unknown
    async fn open_conversation(&self, conv_id: &str) -> Result<Conversation, String>;

    async fn append_message(&self, conv_id: &str, message: &NewMessage) -> Result<Message, String>;

    async fn get_messages(&self, conv_id: &str) -> Result<Vec<Message>, String>;

    /// Close a conversation; `None` when it does not exist
    async fn close_conversation(&self, conv_id: &str) -> Result<Option<Conversation>, String>;

    async fn list_unresolved(&self, limit: u32) -> Result<Vec<Message>, String>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: KnowledgeStore + ?Sized> KnowledgeStore for Arc<T> {
    async fn find_by_keywords(&self, keywords: &[String]) -> Result<Vec<KnowledgeEntry>, String> {
        (**self).find_by_keywords(keywords).await
    }

    async fn embedded_entries(&self) -> Result<Vec<KnowledgeEntry>, String> {
        (**self).embedded_entries().await
    }

    async fn insert_entry(&self, entry: &NewKnowledgeEntry) -> Result<KnowledgeEntry, String> {
        (**self).insert_entry(entry).await
    }

    async fn increment_usage(&self, entry_id: i64) -> Result<(), String> {
        (**self).increment_usage(entry_id).await
    }

    async fn match_pattern(
        &self,
        text: &str,
        keywords: &str,
    ) -> Result<Option<ContextPattern>, String> {
        (**self).match_pattern(text, keywords).await
    }

    async fn touch_pattern(&self, pattern_id: i64) -> Result<(), String> {
        (**self).touch_pattern(pattern_id).await
    }

    async fn upsert_pattern(
        &self,
        pattern: &str,
        label: Label,
        weight: f64,
    ) -> Result<ContextPattern, String> {
        (**self).upsert_pattern(pattern, label, weight).await
    }
}

#[async_trait]
impl<T: ConversationStore + ?Sized> ConversationStore for Arc<T> {
    async fn open_conversation(&self, conv_id: &str) -> Result<Conversation, String> {
        (**self).open_conversation(conv_id).await
    }

    async fn append_message(&self, conv_id: &str, message: &NewMessage) -> Result<Message, String> {
        (**self).append_message(conv_id, message).await
    }

    async fn get_messages(&self, conv_id: &str) -> Result<Vec<Message>, String> {
        (**self).get_messages(conv_id).await
    }

    async fn close_conversation(&self, conv_id: &str) -> Result<Option<Conversation>, String> {
        (**self).close_conversation(conv_id).await
    }

    async fn list_unresolved(&self, limit: u32) -> Result<Vec<Message>, String> {
        (**self).list_unresolved(limit).await
    }
}

// ============================================================================
// Production Adapter
// ============================================================================

use crate::db::{Database, DbError};

/// Adapter to use Database as both stores
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[allow(dead_code)] // Useful for tests
    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl KnowledgeStore for DatabaseStore {
    async fn find_by_keywords(&self, keywords: &[String]) -> Result<Vec<KnowledgeEntry>, String> {
        self.db
            .find_entries_by_keywords(keywords)
            .map_err(|e| e.to_string())
    }

    async fn embedded_entries(&self) -> Result<Vec<KnowledgeEntry>, String> {
        self.db
            .entries_with_embeddings()
            .map_err(|e| e.to_string())
    }

    async fn insert_entry(&self, entry: &NewKnowledgeEntry) -> Result<KnowledgeEntry, String> {
        self.db.insert_entry(entry).map_err(|e| e.to_string())
    }

    async fn increment_usage(&self, entry_id: i64) -> Result<(), String> {
        self.db.increment_usage(entry_id).map_err(|e| e.to_string())
    }

    async fn match_pattern(
        &self,
        text: &str,
        keywords: &str,
    ) -> Result<Option<ContextPattern>, String> {
        self.db
            .match_pattern(text, keywords)
            .map_err(|e| e.to_string())
    }

    async fn touch_pattern(&self, pattern_id: i64) -> Result<(), String> {
        self.db.touch_pattern(pattern_id).map_err(|e| e.to_string())
    }

    async fn upsert_pattern(
        &self,
        pattern: &str,
        label: Label,
        weight: f64,
    ) -> Result<ContextPattern, String> {
        self.db
            .upsert_pattern(pattern, label, weight)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ConversationStore for DatabaseStore {
    async fn open_conversation(&self, conv_id: &str) -> Result<Conversation, String> {
        self.db
            .get_or_create_conversation(conv_id)
            .map_err(|e| e.to_string())
    }

    async fn append_message(&self, conv_id: &str, message: &NewMessage) -> Result<Message, String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .add_message(&id, conv_id, message)
            .map_err(|e| e.to_string())
    }

    async fn get_messages(&self, conv_id: &str) -> Result<Vec<Message>, String> {
        self.db.get_messages(conv_id).map_err(|e| e.to_string())
    }

    async fn close_conversation(&self, conv_id: &str) -> Result<Option<Conversation>, String> {
        match self.db.close_conversation(conv_id) {
            Ok(conv) => Ok(Some(conv)),
            Err(DbError::ConversationNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn list_unresolved(&self, limit: u32) -> Result<Vec<Message>, String> {
        self.db.list_unresolved(limit).map_err(|e| e.to_string())
    }
}
