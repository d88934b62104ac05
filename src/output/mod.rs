//! Output module for run summaries and database statistics

pub mod stats;

pub use stats::{load_statistics, print_statistics, DatabaseStatistics};

use crate::download::humansize;
use crate::orchestrator::RunSummary;

/// Prints the end-of-run summary to stdout
pub fn print_summary(summary: &RunSummary) {
    let crawl = &summary.crawl;
    let downloads = &summary.downloads;

    println!("=== Harvest Summary ===\n");

    println!("Created:");
    println!("  Forums: {}", crawl.forums_created);
    println!("  Threads: {}", crawl.threads_created);
    println!("  Posts: {}", crawl.posts_created);
    println!("  Attachments: {}", crawl.attachments_created);
    println!();

    println!("Crawl:");
    println!("  Pages processed: {}", crawl.pages_processed);
    println!("  Links visited: {}", crawl.urls_visited);
    println!("  Abandoned tasks: {}", crawl.tasks_abandoned);
    println!();

    println!("Downloads:");
    println!(
        "  Downloaded: {} ({})",
        downloads.downloaded,
        humansize(downloads.bytes_written)
    );
    println!("  Skipped (already on disk): {}", downloads.skipped);
    println!("  Failed: {}", downloads.failed);
    println!("  Duplicate links: {}", downloads.duplicates);
    println!();

    println!("Finished in {:.1}s", summary.elapsed.as_secs_f64());
}
