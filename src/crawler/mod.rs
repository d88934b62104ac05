//! Crawler module for forum graph discovery
//!
//! This module contains the core crawling logic:
//! - [`Task`] variants describing one forum or thread page to expand
//! - [`CrawlEngine`], the bounded worker pool that expands tasks, persists
//!   entities and emits download links

mod engine;
mod task;

pub use engine::{CrawlEngine, CrawlReport};
pub use task::{ForumTask, Task, ThreadTask};
