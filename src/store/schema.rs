/// Document table for the local index.
///
/// Uses CREATE TABLE/INDEX IF NOT EXISTS for idempotent execution.
pub const INITIAL_SCHEMA: &str = r#"
-- Documents table: one row per ingested article
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY,
    external_id TEXT NOT NULL UNIQUE,
    content TEXT NOT NULL,
    url TEXT NOT NULL,
    ingested_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_ingested ON documents(ingested_at);
"#;

/// FTS5 virtual table over document content.
///
/// FTS5 does not support IF NOT EXISTS on every SQLite build, so callers check
/// sqlite_master before running this.
pub const FTS_TABLE_CREATION: &str = r#"
CREATE VIRTUAL TABLE documents_fts USING fts5(
    content,
    content='documents',
    content_rowid='id',
    tokenize='porter unicode61'
);
"#;

/// Triggers keeping the FTS index in sync with the documents table.
pub const FTS_TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
    INSERT INTO documents_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS documents_ad AFTER DELETE ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, content) VALUES ('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS documents_au AFTER UPDATE ON documents BEGIN
    INSERT INTO documents_fts(documents_fts, rowid, content) VALUES ('delete', old.id, old.content);
    INSERT INTO documents_fts(rowid, content) VALUES (new.id, new.content);
END;
"#;
