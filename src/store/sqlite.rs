//! Local document index backed by SQLite FTS5.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};
use time::OffsetDateTime;
use tracing::debug;

use super::schema::{FTS_TABLE_CREATION, FTS_TRIGGERS, INITIAL_SCHEMA};
use super::{DocumentStore, RetrievedDocument, StoreError};
use crate::dataset::Article;

/// Document store ranking matches with FTS5's bm25.
///
/// `rusqlite::Connection` is not `Sync`, so access goes through a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens an in-memory store. Useful for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Opens (creating if needed) a file-based store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces articles, keyed by their external id.
    ///
    /// Returns the number of articles written.
    pub fn add_articles(&self, articles: &[Article]) -> Result<usize, StoreError> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO documents (external_id, content, url, ingested_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(external_id) DO UPDATE SET
                     content = excluded.content,
                     url = excluded.url,
                     ingested_at = excluded.ingested_at",
            )?;
            for article in articles {
                stmt.execute(params![article.id, article.content, article.link, now])?;
            }
        }

        tx.commit()?;
        debug!(count = articles.len(), "stored articles in sqlite index");
        Ok(articles.len())
    }

    /// Unix timestamp of the most recent ingestion, if any.
    pub fn last_ingested_at(&self) -> Result<Option<OffsetDateTime>, StoreError> {
        let conn = self.connection();
        let ts: Option<i64> = conn
            .query_row("SELECT MAX(ingested_at) FROM documents", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();

        Ok(ts.and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok()))
    }
}

impl DocumentStore for SqliteStore {
    fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, StoreError> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT d.content, d.url
             FROM documents_fts
             JOIN documents d ON d.id = documents_fts.rowid
             WHERE documents_fts MATCH ?1
             ORDER BY bm25(documents_fts), d.id
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![match_expr, k as i64], |row| {
            Ok(RetrievedDocument::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?;

        let docs = rows.collect::<Result<Vec<_>, _>>()?;
        debug!(query = %match_expr, hits = docs.len(), "sqlite search");
        Ok(docs)
    }

    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

/// Initializes tables, the FTS5 index and its triggers.
fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(INITIAL_SCHEMA)?;

    let fts_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='documents_fts')",
        [],
        |row| row.get(0),
    )?;

    if !fts_exists {
        conn.execute_batch(FTS_TABLE_CREATION)?;
        // Index rows written before the FTS table existed.
        conn.execute(
            "INSERT INTO documents_fts(documents_fts) VALUES ('rebuild')",
            [],
        )?;
    }

    conn.execute_batch(FTS_TRIGGERS)?;
    Ok(())
}

/// Turns a natural-language question into an FTS5 OR-query of quoted terms.
///
/// Quoting every term keeps punctuation and FTS operators in user text from
/// being parsed as query syntax. Returns `None` if no searchable term remains.
fn fts_query(question: &str) -> Option<String> {
    let terms: Vec<String> = question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
