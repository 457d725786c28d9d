//! Database module for the prompt coach
//!
//! Provides checkpoints for sessions and their append-only transcripts.

mod schema;

pub use schema::*;

use crate::state_machine::Flow;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database lock poisoned")]
    LockPoisoned,
    #[error("Unknown flow stored for session: {0}")]
    UnknownFlow(String),
    #[error("Unknown message role: {0}")]
    UnknownRole(String),
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
        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // ==================== Session Operations ====================

    /// Load the checkpoint for a thread, if one exists
    pub fn load_session(&self, thread_id: &str) -> DbResult<Option<Session>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT thread_id, flow, state, created_at, updated_at
                 FROM sessions WHERE thread_id = ?1",
                params![thread_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((thread_id, flow, state, created_at, updated_at)) = row else {
            return Ok(None);
        };
        let flow = Flow::parse(&flow).ok_or(DbError::UnknownFlow(flow))?;
        Ok(Some(Session {
            thread_id,
            flow,
            state: serde_json::from_str(&state)?,
            created_at: parse_datetime(&created_at),
            updated_at: parse_datetime(&updated_at),
        }))
    }

    /// Write the checkpoint for a thread, creating the session on first save.
    ///
    /// The flow of an existing session never changes.
    pub fn save_session(&self, thread_id: &str, flow: Flow, state: &ConvState) -> DbResult<Session> {
        let state_json = serde_json::to_string(state)?;
        let now = Utc::now();
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO sessions (thread_id, flow, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(thread_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![thread_id, flow.as_str(), state_json, now.to_rfc3339()],
        )?;

        let (stored_flow, created_at): (String, String) = conn.query_row(
            "SELECT flow, created_at FROM sessions WHERE thread_id = ?1",
            params![thread_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(Session {
            thread_id: thread_id.to_string(),
            flow: Flow::parse(&stored_flow).ok_or(DbError::UnknownFlow(stored_flow))?,
            state: state.clone(),
            created_at: parse_datetime(&created_at),
            updated_at: now,
        })
    }

    // ==================== Message Operations ====================

    /// Append a message to a thread's transcript
    pub fn append_message(&self, thread_id: &str, message: &ChatMessage) -> DbResult<StoredMessage> {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.tool_calls)?)
        };
        let message_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.conn()?;

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO messages (message_id, thread_id, sequence_id, role, content, tool_calls, tool_call_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message_id,
                thread_id,
                sequence_id,
                message.role.as_str(),
                message.content,
                tool_calls,
                message.tool_call_id,
                now.to_rfc3339(),
            ],
        )?;

        Ok(StoredMessage {
            message_id,
            thread_id: thread_id.to_string(),
            sequence_id,
            message: message.clone(),
            created_at: now,
        })
    }

    /// Get the transcript of a thread in order
    pub fn get_messages(&self, thread_id: &str) -> DbResult<Vec<StoredMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT message_id, thread_id, sequence_id, role, content, tool_calls, tool_call_id, created_at
             FROM messages WHERE thread_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt
            .query_map(params![thread_id], |row| {
                Ok(RawMessage {
                    message_id: row.get(0)?,
                    thread_id: row.get(1)?,
                    sequence_id: row.get(2)?,
                    role: row.get(3)?,
                    content: row.get(4)?,
                    tool_calls: row.get(5)?,
                    tool_call_id: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawMessage::into_stored).collect()
    }
}

/// Message row before JSON columns are decoded
struct RawMessage {
    message_id: String,
    thread_id: String,
    sequence_id: i64,
    role: String,
    content: String,
    tool_calls: Option<String>,
    tool_call_id: Option<String>,
    created_at: String,
}

impl RawMessage {
    fn into_stored(self) -> DbResult<StoredMessage> {
        let role = Role::parse(&self.role).ok_or(DbError::UnknownRole(self.role))?;
        let tool_calls = match self.tool_calls {
            Some(json) => serde_json::from_str(&json)?,
            None => vec![],
        };
        Ok(StoredMessage {
            message_id: self.message_id,
            thread_id: self.thread_id,
            sequence_id: self.sequence_id,
            message: ChatMessage {
                role,
                content: self.content,
                tool_calls,
                tool_call_id: self.tool_call_id,
            },
            created_at: parse_datetime(&self.created_at),
        })
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
