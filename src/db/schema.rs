//! Database schema and types

use crate::classifier::Label;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'open',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    label TEXT,
    confidence REAL,
    unresolved BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, sequence_id);
CREATE INDEX IF NOT EXISTS idx_messages_unresolved ON messages(unresolved, created_at DESC);

CREATE TABLE IF NOT EXISTS knowledge_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    question TEXT NOT NULL,
    answer TEXT NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 0,
    embedding TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS knowledge_keywords (
    entry_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    keyword TEXT NOT NULL,

    PRIMARY KEY (entry_id, keyword),
    FOREIGN KEY (entry_id) REFERENCES knowledge_entries(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_knowledge_keywords_keyword ON knowledge_keywords(keyword);

CREATE TABLE IF NOT EXISTS context_patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern TEXT NOT NULL,
    label TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    usage_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    UNIQUE (pattern, label)
);
";

/// Patterns present in every fresh store
pub const DEFAULT_PATTERNS: &[(&str, Label, f64)] = &[
    ("안녕", Label::Casual, 1.0),
    ("반갑", Label::Casual, 1.0),
    ("감사", Label::Casual, 0.9),
    ("고맙", Label::Casual, 0.9),
    ("수고하", Label::Casual, 0.8),
    ("레시피", Label::NonCounseling, 1.0),
    ("요리", Label::NonCounseling, 0.9),
    ("날씨", Label::NonCounseling, 1.0),
    ("역사", Label::NonCounseling, 0.9),
    ("영화", Label::NonCounseling, 0.9),
    ("주식", Label::NonCounseling, 0.9),
    ("연애", Label::NonCounseling, 0.9),
];

/// Conversation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Open => "open",
            ConversationStatus::Closed => "closed",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ConversationStatus::Open),
            "closed" => Ok(ConversationStatus::Closed),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

/// Conversation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}

impl Conversation {
    pub fn is_open(&self) -> bool {
        self.status == ConversationStatus::Open
    }
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// Message to be appended
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub label: Option<Label>,
    pub confidence: Option<f64>,
    pub unresolved: bool,
}

impl NewMessage {
    pub fn user(content: impl Into<String>, label: Option<Label>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            label,
            confidence: None,
            unresolved: false,
        }
    }

    pub fn assistant(content: impl Into<String>, label: Label) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            label: Some(label),
            confidence: None,
            unresolved: false,
        }
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn unresolved(mut self, unresolved: bool) -> Self {
        self.unresolved = unresolved;
        self
    }
}

/// Stored message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sequence_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub label: Option<Label>,
    pub confidence: Option<f64>,
    pub unresolved: bool,
    pub created_at: DateTime<Utc>,
}

/// Authoritative question/answer pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub keywords: Vec<String>,
    pub usage_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

/// Entry to be inserted
#[derive(Debug, Clone)]
pub struct NewKnowledgeEntry {
    pub question: String,
    pub answer: String,
    pub keywords: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Short phrase fragment that implies a label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPattern {
    pub id: i64,
    pub pattern: String,
    pub label: Label,
    pub weight: f64,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
