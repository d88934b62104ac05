//! Database schema definitions
//!
//! Forums nest through `parent_id`; threads, posts and attachments hang off
//! their owner through a non-null foreign key. Posts and attachments have no
//! link of their own, so they are keyed by their owner plus a natural key.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS forums (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    link TEXT NOT NULL UNIQUE,
    parent_id INTEGER REFERENCES forums(id),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_forums_parent ON forums(parent_id);

CREATE TABLE IF NOT EXISTS threads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    link TEXT NOT NULL UNIQUE,
    forum_id INTEGER NOT NULL REFERENCES forums(id),
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_threads_forum ON threads(forum_id);

CREATE TABLE IF NOT EXISTS posts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    author TEXT NOT NULL,
    created TEXT NOT NULL,
    content TEXT NOT NULL,
    thread_id INTEGER NOT NULL REFERENCES threads(id),
    created_at TEXT NOT NULL,
    UNIQUE(thread_id, author, created)
);

CREATE TABLE IF NOT EXISTS attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    link TEXT NOT NULL,
    post_id INTEGER NOT NULL REFERENCES posts(id),
    UNIQUE(post_id, link)
);

-- Dedup ledger for every page and download URL the crawler has claimed
CREATE TABLE IF NOT EXISTS visited_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    link TEXT NOT NULL UNIQUE,
    visited_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
