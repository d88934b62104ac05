//! Storage traits and error types
//!
//! The crawl engine only talks to storage through these two contracts:
//! [`VisitedSet`] answers "has this URL been claimed yet", [`EntityStore`]
//! creates forum graph rows or hands back the ones that already exist.

use crate::download::DownloadLink;
use crate::storage::{AttachmentRecord, ForumRecord, PostRecord, ThreadRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A unique key was already taken by another writer
    #[error("Unique constraint conflict: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage lock poisoned by a panicked worker")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Dedup ledger of URLs already scheduled or processed
pub trait VisitedSet {
    /// Atomically claims a URL
    ///
    /// Returns true exactly once per URL across the lifetime of the store;
    /// every later call for the same URL returns false.
    fn try_visit(&mut self, url: &str) -> StorageResult<bool>;

    /// Gives up a claim so a later crawl can expand the URL again
    ///
    /// Returns true if the URL was claimed.
    fn release(&mut self, url: &str) -> StorageResult<bool>;

    /// Returns true if the URL has been claimed
    fn is_visited(&self, url: &str) -> StorageResult<bool>;

    /// Number of claimed URLs
    fn count_visited(&self) -> StorageResult<u64>;
}

/// Create-or-fetch persistence for the forum graph
///
/// Every `create_or_get_*` returns the record and whether this call created
/// it. A record is never created twice for the same key.
pub trait EntityStore {
    /// Keyed by `link`
    fn create_or_get_forum(
        &mut self,
        name: &str,
        link: &str,
        parent_id: Option<i64>,
    ) -> StorageResult<(ForumRecord, bool)>;

    /// Keyed by `link`; `forum_id` must refer to an existing forum
    fn create_or_get_thread(
        &mut self,
        name: &str,
        link: &str,
        forum_id: i64,
    ) -> StorageResult<(ThreadRecord, bool)>;

    /// Keyed by `(thread_id, author, created)`
    fn create_or_get_post(
        &mut self,
        author: &str,
        created: &str,
        content: &str,
        thread_id: i64,
    ) -> StorageResult<(PostRecord, bool)>;

    /// Keyed by `(post_id, link)`
    fn create_or_get_attachment(
        &mut self,
        name: &str,
        link: &str,
        post_id: i64,
    ) -> StorageResult<(AttachmentRecord, bool)>;

    /// Looks up a forum by id
    fn get_forum(&mut self, id: i64) -> StorageResult<Option<ForumRecord>>;

    /// Looks up a thread by id
    fn get_thread(&self, id: i64) -> StorageResult<Option<ThreadRecord>>;

    fn count_forums(&self) -> StorageResult<u64>;
    fn count_threads(&self) -> StorageResult<u64>;
    fn count_posts(&self) -> StorageResult<u64>;
    fn count_attachments(&self) -> StorageResult<u64>;

    /// Every stored attachment as a download, filed under its thread's name
    fn known_download_links(&self) -> StorageResult<Vec<DownloadLink>>;
}
