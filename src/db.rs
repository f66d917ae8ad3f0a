//! Database module
//!
//! Persistence for conversations, the knowledge base, and context patterns.

mod schema;

pub use schema::*;

use crate::classifier::Label;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Knowledge entry not found: {0}")]
    EntryNotFound(i64),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Knowledge entry needs at least one keyword")]
    EmptyKeywords,
    #[error("Database connection poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // ==================== Conversation Operations ====================

    /// Get a conversation, creating it open if it does not exist yet
    pub fn get_or_create_conversation(&self, id: &str) -> DbResult<Conversation> {
        {
            let conn = self.lock()?;
            let now = timestamp(Utc::now());
            conn.execute(
                "INSERT OR IGNORE INTO conversations (id, status, created_at, updated_at)
                 VALUES (?1, 'open', ?2, ?2)",
                params![id, now],
            )?;
        }
        self.get_conversation(id)
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT c.id, c.status, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
             FROM conversations c WHERE c.id = ?1",
            params![id],
            |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    status: parse_column(row, 1)?,
                    created_at: parse_datetime(&row.get::<_, String>(2)?),
                    updated_at: parse_datetime(&row.get::<_, String>(3)?),
                    message_count: row.get(4)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::ConversationNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    /// Mark a conversation closed. Closing twice is harmless.
    pub fn close_conversation(&self, id: &str) -> DbResult<Conversation> {
        let updated = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE conversations SET status = 'closed', updated_at = ?1 WHERE id = ?2",
                params![timestamp(Utc::now()), id],
            )?
        };
        if updated == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        self.get_conversation(id)
    }

    // ==================== Message Operations ====================

    /// Append a message; sequence ids are per conversation and start at 1
    pub fn add_message(
        &self,
        message_id: &str,
        conversation_id: &str,
        message: &NewMessage,
    ) -> DbResult<Message> {
        let conn = self.lock()?;
        let now = Utc::now();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO messages (id, conversation_id, sequence_id, role, content, label, confidence, unresolved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message_id,
                conversation_id,
                sequence_id,
                message.role.to_string(),
                message.content,
                message.label.map(Label::as_str),
                message.confidence,
                message.unresolved,
                timestamp(now),
            ],
        )?;

        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![timestamp(now), conversation_id],
        )?;

        Ok(Message {
            id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            sequence_id,
            role: message.role,
            content: message.content.clone(),
            label: message.label,
            confidence: message.confidence,
            unresolved: message.unresolved,
            created_at: now,
        })
    }

    /// Get all messages for a conversation in order
    pub fn get_messages(&self, conversation_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, role, content, label, confidence, unresolved, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY sequence_id",
        )?;
        let rows = stmt.query_map(params![conversation_id], message_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recent assistant answers that had no confident knowledge match
    pub fn list_unresolved(&self, limit: u32) -> DbResult<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sequence_id, role, content, label, confidence, unresolved, created_at
             FROM messages WHERE unresolved = 1
             ORDER BY created_at DESC, sequence_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], message_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ==================== Knowledge Operations ====================

    /// Insert an entry with its keyword set
    pub fn insert_entry(&self, entry: &NewKnowledgeEntry) -> DbResult<KnowledgeEntry> {
        if entry.keywords.is_empty() {
            return Err(DbError::EmptyKeywords);
        }
        let embedding = entry
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO knowledge_entries (question, answer, usage_count, embedding, created_at)
             VALUES (?1, ?2, 0, ?3, ?4)",
            params![entry.question, entry.answer, embedding, timestamp(now)],
        )?;
        let id = tx.last_insert_rowid();

        let mut keywords = Vec::with_capacity(entry.keywords.len());
        for keyword in &entry.keywords {
            if keywords.contains(keyword) {
                continue;
            }
            tx.execute(
                "INSERT INTO knowledge_keywords (entry_id, position, keyword) VALUES (?1, ?2, ?3)",
                params![id, keywords.len(), keyword],
            )?;
            keywords.push(keyword.clone());
        }
        tx.commit()?;

        Ok(KnowledgeEntry {
            id,
            question: entry.question.clone(),
            answer: entry.answer.clone(),
            keywords,
            usage_count: 0,
            embedding: entry.embedding.clone(),
            created_at: now,
        })
    }

    /// Entries sharing at least one keyword, each with its full keyword set
    pub fn find_entries_by_keywords(&self, keywords: &[String]) -> DbResult<Vec<KnowledgeEntry>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; keywords.len()].join(", ");
        let sql = format!(
            "SELECT e.id, e.question, e.answer, e.usage_count, e.embedding, e.created_at
             FROM knowledge_entries e
             WHERE e.id IN (SELECT entry_id FROM knowledge_keywords WHERE keyword IN ({placeholders}))
             ORDER BY e.id"
        );
        let conn = self.lock()?;
        query_entries(&conn, &sql, params_from_iter(keywords.iter()))
    }

    /// Every entry that carries a stored embedding
    pub fn entries_with_embeddings(&self) -> DbResult<Vec<KnowledgeEntry>> {
        let conn = self.lock()?;
        query_entries(
            &conn,
            "SELECT e.id, e.question, e.answer, e.usage_count, e.embedding, e.created_at
             FROM knowledge_entries e
             WHERE e.embedding IS NOT NULL
             ORDER BY e.id",
            [],
        )
    }

    /// Bump an entry's usage counter
    pub fn increment_usage(&self, entry_id: i64) -> DbResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE knowledge_entries SET usage_count = usage_count + 1 WHERE id = ?1",
            params![entry_id],
        )?;
        if updated == 0 {
            return Err(DbError::EntryNotFound(entry_id));
        }
        Ok(())
    }

    pub fn count_entries(&self) -> DbResult<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM knowledge_entries", [], |row| {
            row.get(0)
        })?)
    }

    // ==================== Context Pattern Operations ====================

    /// Best stored pattern contained in either string: highest weight, then
    /// most recently updated.
    pub fn match_pattern(&self, text: &str, keywords: &str) -> DbResult<Option<ContextPattern>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, pattern, label, weight, usage_count, created_at, updated_at
                 FROM context_patterns
                 WHERE length(pattern) > 0 AND (instr(?1, pattern) > 0 OR instr(?2, pattern) > 0)
                 ORDER BY weight DESC, updated_at DESC, id DESC
                 LIMIT 1",
                params![text, keywords],
                pattern_from_row,
            )
            .optional()?)
    }

    /// Insert a pattern, or refresh `updated_at` (and keep the higher weight)
    /// when the same pattern/label pair already exists.
    pub fn upsert_pattern(&self, pattern: &str, label: Label, weight: f64) -> DbResult<ContextPattern> {
        let conn = self.lock()?;
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO context_patterns (pattern, label, weight, usage_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)
             ON CONFLICT (pattern, label) DO UPDATE SET
                 weight = max(weight, excluded.weight),
                 updated_at = excluded.updated_at",
            params![pattern, label.as_str(), weight, now],
        )?;
        Ok(conn.query_row(
            "SELECT id, pattern, label, weight, usage_count, created_at, updated_at
             FROM context_patterns WHERE pattern = ?1 AND label = ?2",
            params![pattern, label.as_str()],
            pattern_from_row,
        )?)
    }

    /// Record that a pattern decided a classification
    pub fn touch_pattern(&self, pattern_id: i64) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE context_patterns SET usage_count = usage_count + 1 WHERE id = ?1",
            params![pattern_id],
        )?;
        Ok(())
    }

    #[allow(dead_code)] // Used in tests
    pub fn list_patterns(&self) -> DbResult<Vec<ContextPattern>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, pattern, label, weight, usage_count, created_at, updated_at
             FROM context_patterns ORDER BY id",
        )?;
        let rows = stmt.query_map([], pattern_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Insert the default greeting and off-topic patterns. Existing rows,
    /// including ones an operator re-weighted, are left alone.
    pub fn seed_default_patterns(&self) -> DbResult<usize> {
        let conn = self.lock()?;
        let now = timestamp(Utc::now());
        let mut inserted = 0;
        for (pattern, label, weight) in DEFAULT_PATTERNS {
            inserted += conn.execute(
                "INSERT OR IGNORE INTO context_patterns (pattern, label, weight, usage_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![pattern, label.as_str(), weight, now],
            )?;
        }
        Ok(inserted)
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let label: Option<String> = row.get(5)?;
    let label = match label {
        Some(s) => Some(parse_text(5, &s)?),
        None => None,
    };
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sequence_id: row.get(2)?,
        role: parse_column(row, 3)?,
        content: row.get(4)?,
        label,
        confidence: row.get(6)?,
        unresolved: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn pattern_from_row(row: &Row<'_>) -> rusqlite::Result<ContextPattern> {
    Ok(ContextPattern {
        id: row.get(0)?,
        pattern: row.get(1)?,
        label: parse_column(row, 2)?,
        weight: row.get(3)?,
        usage_count: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    parse_text(idx, &text)
}

fn parse_text<T: FromStr<Err = String>>(idx: usize, text: &str) -> rusqlite::Result<T> {
    text.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Run an entry query (columns: id, question, answer, usage_count,
/// embedding, created_at) and attach each entry's keywords in order.
fn query_entries<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    args: P,
) -> DbResult<Vec<KnowledgeEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;
    let rows = rows.collect::<Result<Vec<_>, _>>()?;

    let mut keyword_stmt =
        conn.prepare("SELECT keyword FROM knowledge_keywords WHERE entry_id = ?1 ORDER BY position")?;
    let mut entries = Vec::with_capacity(rows.len());
    for (id, question, answer, usage_count, embedding, created_at) in rows {
        let keywords = keyword_stmt
            .query_map(params![id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let embedding = embedding
            .as_deref()
            .map(serde_json::from_str::<Vec<f32>>)
            .transpose()?;
        entries.push(KnowledgeEntry {
            id,
            question,
            answer,
            keywords,
            usage_count,
            embedding,
            created_at: parse_datetime(&created_at),
        });
    }
    Ok(entries)
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
