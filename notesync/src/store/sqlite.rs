//! NoteStore — SQLite-backed local note storage
//!
//! Single source of truth for the current local version of every note. All
//! writes go through one connection mutex, so concurrent saves for the same
//! title always produce distinct, sequential version increments. Every write
//! is announced on a broadcast channel that the sync engine consumes as its
//! local change stream.

use crate::error::StoreError;
use crate::model::Note;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// SQLite store keyed by note title.
pub struct NoteStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<Note>,
}

impl NoteStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::init(Connection::open(db_path)?)
    }

    /// In-memory store for tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS notes (
                title TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Stream of every local write (upserts and saves alike). Receivers that
    /// fall behind see a lag error and should reload the titles they track.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<Note> {
        self.changes.subscribe()
    }

    pub fn get(&self, title: &str) -> Result<Option<Note>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let note = conn
            .query_row(
                "SELECT title, content, version FROM notes WHERE title = ?1",
                params![title],
                |row| {
                    Ok(Note::with_version(
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as u64,
                    ))
                },
            )
            .optional()?;
        Ok(note)
    }

    /// Write a note at its carried version. This is how remote winners reach
    /// local state; version arithmetic happens only in [`Self::save_increment`].
    pub fn upsert(&self, note: &Note) -> Result<(), StoreError> {
        if note.title.is_empty() {
            return Err(StoreError::EmptyTitle);
        }
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO notes (title, content, version) VALUES (?1, ?2, ?3)
                 ON CONFLICT(title) DO UPDATE SET
                    content = excluded.content,
                    version = excluded.version",
                params![note.title, note.content, note.version as i64],
            )?;
        }
        let _ = self.changes.send(note.clone());
        Ok(())
    }

    /// Atomic read-modify-write behind `SyncEngine::save`: bumps the stored
    /// version by exactly one (0 -> 1 for a title never saved before) and
    /// persists the new content. The connection mutex is held across the
    /// read and the write, so two concurrent saves can never both observe
    /// the same previous version.
    pub fn save_increment(&self, title: &str, content: &str) -> Result<Note, StoreError> {
        if title.is_empty() {
            return Err(StoreError::EmptyTitle);
        }
        let note = {
            let conn = self.conn.lock().unwrap();
            let previous: Option<i64> = conn
                .query_row(
                    "SELECT version FROM notes WHERE title = ?1",
                    params![title],
                    |row| row.get(0),
                )
                .optional()?;
            let version = previous.unwrap_or(0) + 1;
            conn.execute(
                "INSERT INTO notes (title, content, version) VALUES (?1, ?2, ?3)
                 ON CONFLICT(title) DO UPDATE SET
                    content = excluded.content,
                    version = excluded.version",
                params![title, content, version],
            )?;
            Note::with_version(title.to_string(), content.to_string(), version as u64)
        };
        let _ = self.changes.send(note.clone());
        Ok(note)
    }

    /// Remove a note. Returns whether a row was actually deleted.
    pub fn delete(&self, title: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM notes WHERE title = ?1", params![title])?;
        Ok(rows > 0)
    }

    pub fn exists(&self, title: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE title = ?1",
            params![title],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All locally stored notes, ordered by title.
    pub fn list(&self) -> Result<Vec<Note>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT title, content, version FROM notes ORDER BY title")?;
        let notes = stmt
            .query_map([], |row| {
                Ok(Note::with_version(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as u64,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notes)
    }
}
