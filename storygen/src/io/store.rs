//! SQLite storage for generated stories.
//!
//! Writes go through a [`StoryTransaction`]: nothing is visible until
//! [`StoryTransaction::commit`], and dropping it without committing rolls back
//! every row written through it.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use tracing::debug;

use crate::story::{OptionEdge, StoryNodeRecord, StoryRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("encode options: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown {kind} id {id}")]
    UnknownId { kind: &'static str, id: i64 },
}

/// Node fields written before its options are known.
#[derive(Debug, Clone, Copy)]
pub struct NewNode<'a> {
    pub content: &'a str,
    pub is_root: bool,
    pub is_ending: bool,
    pub is_winning_ending: bool,
}

/// Write side of the storage boundary used during materialization.
pub trait StoryWriter {
    fn create_story(&self, title: &str, session_id: &str) -> Result<StoryRecord, StoreError>;

    /// Insert a node with an empty options list and return its id.
    fn create_node(&self, story_id: i64, node: &NewNode<'_>) -> Result<i64, StoreError>;

    /// Replace the ordered options list of an existing node.
    fn set_node_options(&self, node_id: i64, options: &[OptionEdge]) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub struct StoryStore {
    conn: Connection,
}

impl StoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS stories (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              title TEXT NOT NULL,
              session_id TEXT NOT NULL,
              created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stories_session ON stories(session_id);

            CREATE TABLE IF NOT EXISTS story_nodes (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              story_id INTEGER NOT NULL REFERENCES stories(id),
              content TEXT NOT NULL,
              is_root INTEGER NOT NULL,
              is_ending INTEGER NOT NULL,
              is_winning_ending INTEGER NOT NULL,
              options_json TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_story_nodes_story ON story_nodes(story_id);
            "#,
        )?;
        Ok(())
    }

    /// Start the single scoped transaction for one generation request.
    pub fn begin(&mut self) -> Result<StoryTransaction<'_>, StoreError> {
        Ok(StoryTransaction {
            tx: self.conn.transaction()?,
        })
    }

    pub fn load_story(&self, story_id: i64) -> Result<StoryRecord, StoreError> {
        self.conn
            .query_row(
                "SELECT id, title, session_id, created_at FROM stories WHERE id = ?1",
                params![story_id],
                story_from_row,
            )
            .optional()?
            .ok_or(StoreError::UnknownId {
                kind: "story",
                id: story_id,
            })
    }

    pub fn stories_for_session(&self, session_id: &str) -> Result<Vec<StoryRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, session_id, created_at FROM stories WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![session_id], story_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All nodes of a story in insertion order (the root first).
    pub fn load_nodes(&self, story_id: i64) -> Result<Vec<StoryNodeRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, story_id, content, is_root, is_ending, is_winning_ending, options_json \
             FROM story_nodes WHERE story_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![story_id], node_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_stories(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM stories", [], |row| row.get(0))?)
    }

    pub fn count_nodes(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM story_nodes", [], |row| row.get(0))?)
    }
}

/// Scoped write access; rolls back on drop unless committed.
pub struct StoryTransaction<'a> {
    tx: Transaction<'a>,
}

impl StoryTransaction<'_> {
    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        debug!("story transaction committed");
        Ok(())
    }
}

impl StoryWriter for StoryTransaction<'_> {
    fn create_story(&self, title: &str, session_id: &str) -> Result<StoryRecord, StoreError> {
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.tx.execute(
            "INSERT INTO stories (title, session_id, created_at) VALUES (?1, ?2, ?3)",
            params![title, session_id, created_at],
        )?;
        Ok(StoryRecord {
            id: self.tx.last_insert_rowid(),
            title: title.to_string(),
            session_id: session_id.to_string(),
            created_at,
        })
    }

    fn create_node(&self, story_id: i64, node: &NewNode<'_>) -> Result<i64, StoreError> {
        self.tx.execute(
            "INSERT INTO story_nodes (story_id, content, is_root, is_ending, is_winning_ending, options_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, '[]')",
            params![
                story_id,
                node.content,
                node.is_root,
                node.is_ending,
                node.is_winning_ending
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    fn set_node_options(&self, node_id: i64, options: &[OptionEdge]) -> Result<(), StoreError> {
        let options_json = serde_json::to_string(options)?;
        let changed = self.tx.execute(
            "UPDATE story_nodes SET options_json = ?1 WHERE id = ?2",
            params![options_json, node_id],
        )?;
        if changed == 0 {
            return Err(StoreError::UnknownId {
                kind: "node",
                id: node_id,
            });
        }
        Ok(())
    }
}

fn story_from_row(row: &Row<'_>) -> rusqlite::Result<StoryRecord> {
    Ok(StoryRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        session_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<StoryNodeRecord> {
    let options_json: String = row.get(6)?;
    let options = serde_json::from_str(&options_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(err)))?;
    Ok(StoryNodeRecord {
        id: row.get(0)?,
        story_id: row.get(1)?,
        content: row.get(2)?,
        is_root: row.get(3)?,
        is_ending: row.get(4)?,
        is_winning_ending: row.get(5)?,
        options,
    })
}
