//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.

use crate::download::DownloadLink;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{EntityStore, StorageError, StorageResult, VisitedSet};
use crate::storage::{AttachmentRecord, ForumRecord, PostRecord, ThreadRecord};
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,

    /// id -> forum, loaded on the first `get_forum`
    forum_cache: Option<HashMap<i64, ForumRecord>>,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    ///
    /// Missing parent directories are created.
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            forum_cache: None,
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            forum_cache: None,
        })
    }

    /// Runs `work` as one IMMEDIATE transaction
    ///
    /// Every write `work` makes is committed together, or rolled back together
    /// when it returns an error. The entity helpers borrow the whole store, so
    /// the transaction is driven on the connection rather than through a
    /// borrowed `rusqlite::Transaction`.
    pub fn transaction<T, E>(&mut self, work: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(StorageError::from)?;

        let outcome = match work(self) {
            Ok(value) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(e) => Err(E::from(StorageError::from(e))),
            },
            Err(e) => Err(e),
        };

        if outcome.is_err() {
            self.rollback();
        }
        outcome
    }

    fn rollback(&mut self) {
        if !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!("Rollback failed: {}", e);
            }
        }
        // Forums cached inside the transaction may no longer exist
        self.forum_cache = None;
    }

    fn find_forum_by_link(&self, link: &str) -> StorageResult<Option<ForumRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, link, parent_id FROM forums WHERE link = ?1",
                params![link],
                forum_from_row,
            )
            .optional()?)
    }

    fn insert_forum(
        &mut self,
        name: &str,
        link: &str,
        parent_id: Option<i64>,
    ) -> StorageResult<ForumRecord> {
        self.conn
            .execute(
                "INSERT INTO forums (name, link, parent_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, link, parent_id, now()],
            )
            .map_err(classify)?;

        Ok(ForumRecord {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            link: link.to_string(),
            parent_id,
        })
    }

    fn find_thread_by_link(&self, link: &str) -> StorageResult<Option<ThreadRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, link, forum_id FROM threads WHERE link = ?1",
                params![link],
                thread_from_row,
            )
            .optional()?)
    }

    fn insert_thread(&mut self, name: &str, link: &str, forum_id: i64) -> StorageResult<ThreadRecord> {
        self.conn
            .execute(
                "INSERT INTO threads (name, link, forum_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, link, forum_id, now()],
            )
            .map_err(classify)?;

        Ok(ThreadRecord {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            link: link.to_string(),
            forum_id,
        })
    }

    fn find_post(&self, thread_id: i64, author: &str, created: &str) -> StorageResult<Option<PostRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, author, created, content, thread_id FROM posts
                 WHERE thread_id = ?1 AND author = ?2 AND created = ?3",
                params![thread_id, author, created],
                |row| {
                    Ok(PostRecord {
                        id: row.get(0)?,
                        author: row.get(1)?,
                        created: row.get(2)?,
                        content: row.get(3)?,
                        thread_id: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    fn insert_post(
        &mut self,
        author: &str,
        created: &str,
        content: &str,
        thread_id: i64,
    ) -> StorageResult<PostRecord> {
        self.conn
            .execute(
                "INSERT INTO posts (author, created, content, thread_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![author, created, content, thread_id, now()],
            )
            .map_err(classify)?;

        Ok(PostRecord {
            id: self.conn.last_insert_rowid(),
            author: author.to_string(),
            created: created.to_string(),
            content: content.to_string(),
            thread_id,
        })
    }

    fn find_attachment(&self, post_id: i64, link: &str) -> StorageResult<Option<AttachmentRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, link, post_id FROM attachments WHERE post_id = ?1 AND link = ?2",
                params![post_id, link],
                |row| {
                    Ok(AttachmentRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        link: row.get(2)?,
                        post_id: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    fn insert_attachment(&mut self, name: &str, link: &str, post_id: i64) -> StorageResult<AttachmentRecord> {
        self.conn
            .execute(
                "INSERT INTO attachments (name, link, post_id) VALUES (?1, ?2, ?3)",
                params![name, link, post_id],
            )
            .map_err(classify)?;

        Ok(AttachmentRecord {
            id: self.conn.last_insert_rowid(),
            name: name.to_string(),
            link: link.to_string(),
            post_id,
        })
    }

    fn count(&self, table: &str) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn load_forum_cache(&self) -> StorageResult<HashMap<i64, ForumRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, link, parent_id FROM forums")?;
        let forums = stmt
            .query_map([], forum_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(forums.into_iter().map(|f| (f.id, f)).collect())
    }
}

/// Runs the insert; on a unique-key conflict, hands back the row that won
///
/// Another connection to the same file may insert the key between our
/// lookup and our insert; that loser re-reads and reports `created = false`.
fn insert_or_recover<T>(
    inserted: StorageResult<T>,
    recover: impl FnOnce() -> StorageResult<Option<T>>,
    what: &str,
) -> StorageResult<(T, bool)> {
    match inserted {
        Ok(record) => Ok((record, true)),
        Err(StorageError::Conflict(message)) => {
            tracing::debug!("Lost insert race for {} ({}), re-reading", what, message);
            recover()?
                .map(|record| (record, false))
                .ok_or_else(|| StorageError::NotFound(what.to_string()))
        }
        Err(e) => Err(e),
    }
}

impl VisitedSet for SqliteStorage {
    fn try_visit(&mut self, url: &str) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO visited_urls (link, visited_at) VALUES (?1, ?2)",
            params![url, now()],
        )?;
        Ok(inserted == 1)
    }

    fn release(&mut self, url: &str) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM visited_urls WHERE link = ?1", params![url])?;
        Ok(removed == 1)
    }

    fn is_visited(&self, url: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM visited_urls WHERE link = ?1",
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count_visited(&self) -> StorageResult<u64> {
        self.count("visited_urls")
    }
}

impl EntityStore for SqliteStorage {
    fn create_or_get_forum(
        &mut self,
        name: &str,
        link: &str,
        parent_id: Option<i64>,
    ) -> StorageResult<(ForumRecord, bool)> {
        if let Some(existing) = self.find_forum_by_link(link)? {
            return Ok((existing, false));
        }

        let inserted = self.insert_forum(name, link, parent_id);
        let (forum, created) =
            insert_or_recover(inserted, || self.find_forum_by_link(link), link)?;

        if let Some(cache) = self.forum_cache.as_mut() {
            cache.insert(forum.id, forum.clone());
        }
        Ok((forum, created))
    }

    fn create_or_get_thread(
        &mut self,
        name: &str,
        link: &str,
        forum_id: i64,
    ) -> StorageResult<(ThreadRecord, bool)> {
        if let Some(existing) = self.find_thread_by_link(link)? {
            return Ok((existing, false));
        }

        let inserted = self.insert_thread(name, link, forum_id);
        insert_or_recover(inserted, || self.find_thread_by_link(link), link)
    }

    fn create_or_get_post(
        &mut self,
        author: &str,
        created: &str,
        content: &str,
        thread_id: i64,
    ) -> StorageResult<(PostRecord, bool)> {
        if let Some(existing) = self.find_post(thread_id, author, created)? {
            return Ok((existing, false));
        }

        let inserted = self.insert_post(author, created, content, thread_id);
        insert_or_recover(
            inserted,
            || self.find_post(thread_id, author, created),
            "post",
        )
    }

    fn create_or_get_attachment(
        &mut self,
        name: &str,
        link: &str,
        post_id: i64,
    ) -> StorageResult<(AttachmentRecord, bool)> {
        if let Some(existing) = self.find_attachment(post_id, link)? {
            return Ok((existing, false));
        }

        let inserted = self.insert_attachment(name, link, post_id);
        insert_or_recover(inserted, || self.find_attachment(post_id, link), link)
    }

    fn get_forum(&mut self, id: i64) -> StorageResult<Option<ForumRecord>> {
        if self.forum_cache.is_none() {
            self.forum_cache = Some(self.load_forum_cache()?);
        }
        Ok(self
            .forum_cache
            .as_ref()
            .and_then(|cache| cache.get(&id).cloned()))
    }

    fn get_thread(&self, id: i64) -> StorageResult<Option<ThreadRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, link, forum_id FROM threads WHERE id = ?1",
                params![id],
                thread_from_row,
            )
            .optional()?)
    }

    fn count_forums(&self) -> StorageResult<u64> {
        self.count("forums")
    }

    fn count_threads(&self) -> StorageResult<u64> {
        self.count("threads")
    }

    fn count_posts(&self) -> StorageResult<u64> {
        self.count("posts")
    }

    fn count_attachments(&self) -> StorageResult<u64> {
        self.count("attachments")
    }

    fn known_download_links(&self) -> StorageResult<Vec<DownloadLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.name, a.name, a.link FROM attachments a
             JOIN posts p ON p.id = a.post_id
             JOIN threads t ON t.id = p.thread_id
             ORDER BY a.id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut links = Vec::with_capacity(rows.len());
        for (category, filename, link) in rows {
            match Url::parse(&link) {
                Ok(url) => links.push(DownloadLink::new(category, filename, url)),
                Err(e) => tracing::warn!("Skipping stored attachment with bad link {}: {}", link, e),
            }
        }
        Ok(links)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn forum_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ForumRecord> {
    Ok(ForumRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        link: row.get(2)?,
        parent_id: row.get(3)?,
    })
}

fn thread_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRecord> {
    Ok(ThreadRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        link: row.get(2)?,
        forum_id: row.get(3)?,
    })
}

/// Separates unique-key conflicts from every other SQLite failure
fn classify(error: rusqlite::Error) -> StorageError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation
                && (failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY) =>
        {
            StorageError::Conflict(message.clone().unwrap_or_else(|| error.to_string()))
        }
        _ => StorageError::Sqlite(error),
    }
}
