//! Statistics from the harvest database
//!
//! Backs the `--stats` mode: counts straight from the store, no network.

use crate::storage::{EntityStore, StorageResult, VisitedSet};

/// Row counts per table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStatistics {
    pub forums: u64,
    pub threads: u64,
    pub posts: u64,
    pub attachments: u64,
    pub visited_urls: u64,
}

/// Loads statistics from storage
pub fn load_statistics<S>(storage: &S) -> StorageResult<DatabaseStatistics>
where
    S: EntityStore + VisitedSet,
{
    Ok(DatabaseStatistics {
        forums: storage.count_forums()?,
        threads: storage.count_threads()?,
        posts: storage.count_posts()?,
        attachments: storage.count_attachments()?,
        visited_urls: storage.count_visited()?,
    })
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &DatabaseStatistics) {
    println!("=== Harvest Database ===\n");

    println!("Entities:");
    println!("  Forums: {}", stats.forums);
    println!("  Threads: {}", stats.threads);
    println!("  Posts: {}", stats.posts);
    println!("  Attachments: {}", stats.attachments);
    println!();

    println!("Visited URLs: {}", stats.visited_urls);

    if stats.threads > 0 {
        println!(
            "Averages: {:.1} posts per thread, {:.2} attachments per post",
            stats.posts as f64 / stats.threads as f64,
            if stats.posts > 0 {
                stats.attachments as f64 / stats.posts as f64
            } else {
                0.0
            }
        );
    }
}
