//! Optional FTS5 retrieval index over the event log (`memory/index.db`).
//!
//! The JSONL tier stays authoritative; the index only accelerates keyword
//! retrieval. Rows are synced on append and rebuilt lazily if the file is
//! deleted.

use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;
use crate::types::{MemoryEvent, RetrievalRequest};

/// Scope weights for the ranked retrieval mix. Higher = closer to the
/// asking thread.
const W_SAME_THREAD: i64 = 4;
const W_SAME_TOPIC: i64 = 3;
const W_SAME_CHAT: i64 = 2;
const W_GLOBAL: i64 = 1;

pub struct MemoryIndex {
    conn: Mutex<Connection>,
}

impl MemoryIndex {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Mirror one appended event into the index.
    pub fn insert(&self, event: &MemoryEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events
             (thread_key, chat_id, topic_id, agent_id, role, kind, text, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                event.thread_key,
                event.chat_id,
                event.topic_id,
                event.agent_id,
                event.role.to_string(),
                event.kind.to_string(),
                event.text,
                event.timestamp.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO events_fts(rowid, text) VALUES(?1, ?2)",
            rusqlite::params![id, event.text],
        )?;
        Ok(())
    }

    /// Keyword search with the strict deterministic ordering:
    /// scope weight desc, FTS rank asc, timestamp desc, rowid desc.
    pub fn search(&self, req: &RetrievalRequest) -> Result<Vec<MemoryEvent>> {
        let match_expr = fts_query(&req.query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        let thread_key = req.thread_key().to_string();

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT e.thread_key, e.chat_id, e.topic_id, e.agent_id,
                    e.role, e.kind, e.text, e.ts
             FROM events e
             JOIN events_fts f ON e.id = f.rowid
             WHERE events_fts MATCH ?1
             ORDER BY
                CASE
                    WHEN e.thread_key = ?2 THEN ?4
                    WHEN e.chat_id = ?5 AND e.topic_id = ?6 THEN ?7
                    WHEN e.chat_id = ?5 THEN ?8
                    ELSE ?9
                END DESC,
                bm25(events_fts) ASC,
                e.ts DESC,
                e.id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![
                match_expr,
                thread_key,
                req.limit as i64,
                W_SAME_THREAD,
                req.chat.0,
                req.topic.as_str(),
                W_SAME_TOPIC,
                W_SAME_CHAT,
                W_GLOBAL,
            ],
            row_to_event,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_key TEXT NOT NULL,
            chat_id    INTEGER NOT NULL,
            topic_id   TEXT NOT NULL,
            agent_id   TEXT NOT NULL,
            role       TEXT NOT NULL,
            kind       TEXT NOT NULL,
            text       TEXT NOT NULL,
            ts         TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_thread
            ON events(thread_key, ts);
        CREATE VIRTUAL TABLE IF NOT EXISTS events_fts
            USING fts5(text, content='events', content_rowid='id');",
    )
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEvent> {
    let role: String = row.get(4)?;
    let kind: String = row.get(5)?;
    let ts: String = row.get(7)?;
    Ok(MemoryEvent {
        thread_key: row.get(0)?,
        chat_id: row.get(1)?,
        topic_id: row.get(2)?,
        agent_id: row.get(3)?,
        role: serde_json::from_value(serde_json::Value::String(role))
            .unwrap_or(herald_core::types::Role::User),
        kind: serde_json::from_value(serde_json::Value::String(kind))
            .unwrap_or(herald_core::types::EventKind::Text),
        text: row.get(6)?,
        timestamp: chrono::DateTime::parse_from_rfc3339(&ts)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

/// Build a safe FTS5 MATCH expression: bare alphanumeric terms OR-ed
/// together. Punctuation in user prompts would otherwise be parsed as FTS
/// syntax.
fn fts_query(query: &str) -> String {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .take(12)
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    terms.join(" OR ")
}
