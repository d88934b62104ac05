//! Storage module for the crawled forum graph
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - The visited-URL ledger used for dedup across workers and runs
//! - Create-or-fetch persistence of forums, threads, posts and attachments

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{EntityStore, StorageError, StorageResult, VisitedSet};

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Store handle shared by every crawl worker
///
/// Check-and-insert operations are serialized by the mutex. The guard is
/// never held across an `.await`.
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Wraps a store for sharing between workers
pub fn shared(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks a shared store, turning a poisoned lock into an error
pub fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage.lock().map_err(|_| StorageError::Poisoned)
}

/// A forum row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumRecord {
    pub id: i64,
    pub name: String,
    pub link: String,
    pub parent_id: Option<i64>,
}

/// A thread row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub id: i64,
    pub name: String,
    pub link: String,
    pub forum_id: i64,
}

/// A post row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub id: i64,
    pub author: String,
    pub created: String,
    pub content: String,
    pub thread_id: i64,
}

/// An attachment row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRecord {
    pub id: i64,
    pub name: String,
    pub link: String,
    pub post_id: i64,
}
