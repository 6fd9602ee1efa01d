//! SQLite store of confirmed strippers.
//!
//! A stripper is the canonical lyrics-page slug for a (song, artist)
//! pair. Rows are written once, after a maintainer confirms the correct
//! slug, and never updated or deleted. There is deliberately no unique
//! constraint on (song, artist): lookups take the first match and
//! duplicate rows are tolerated.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::Result;
use crate::song::SongQuery;

/// A schema migration.
#[derive(Debug)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_strippers",
    sql: "CREATE TABLE IF NOT EXISTS strippers (
              id INTEGER PRIMARY KEY,
              song TEXT NOT NULL,
              artist TEXT NOT NULL,
              stripper TEXT NOT NULL
          );
          CREATE INDEX IF NOT EXISTS idx_strippers_song ON strippers(song);",
}];

/// Persistent key-value store mapping pairs to confirmed strippers.
///
/// The connection is shared across request tasks, so it sits behind a
/// mutex; every operation is a single statement, no multi-row
/// transactions are needed.
#[derive(Debug)]
pub struct StripperStore {
    conn: Mutex<Connection>,
}

impl StripperStore {
    /// Open (or create) the store at the given path and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_migrations()?;
        Ok(store)
    }

    /// First confirmed stripper recorded for the pair, if any.
    pub fn find(&self, query: &SongQuery) -> Result<Option<String>> {
        let conn = self.guard();
        let mut stmt = conn.prepare(
            "SELECT stripper FROM strippers WHERE song = ?1 AND artist = ?2 ORDER BY id LIMIT 1",
        )?;
        let mut rows = stmt.query(rusqlite::params![query.song, query.artist])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Record a confirmed stripper for the pair.
    pub fn insert(&self, query: &SongQuery, stripper: &str) -> Result<()> {
        self.guard().execute(
            "INSERT INTO strippers (song, artist, stripper) VALUES (?1, ?2, ?3)",
            rusqlite::params![query.song, query.artist, stripper],
        )?;
        Ok(())
    }

    fn guard(&self) -> MutexGuard<'_, Connection> {
        // SQLite state is consistent even if a holder panicked.
        self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn apply_migrations(&self) -> Result<()> {
        let conn = self.guard();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let applied: Vec<u32> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for migration in MIGRATIONS {
            if !applied.contains(&migration.version) {
                log::info!(
                    "Applying migration {} ({})",
                    migration.version,
                    migration.name
                );
                conn.execute_batch(migration.sql)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    rusqlite::params![migration.version, migration.name],
                )?;
            }
        }

        Ok(())
    }
}
