//! Forum-Harvest: an authenticated forum crawler and attachment downloader
//!
//! This crate walks a phpBB-style forum (forum → thread → post → attachment),
//! persists every entity it discovers exactly once, and downloads the linked
//! attachments either one at a time or through a bounded worker pool.

pub mod client;
pub mod config;
pub mod crawler;
pub mod download;
pub mod orchestrator;
pub mod output;
pub mod parser;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Forum-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] client::FetchError),

    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Returns true if the error must stop the whole run
    ///
    /// Fetch, parse and URL errors only abandon the task that hit them;
    /// everything touching the store, the filesystem or the login does not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Authentication(_)
                | Self::Storage(_)
                | Self::Io(_)
        )
    }

    pub(crate) fn parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Forum-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use client::{AuthContext, Credentials, ForumClient};
pub use config::Config;
pub use crawler::{CrawlEngine, CrawlReport, Task};
pub use download::{DownloadLink, DownloadStats, Downloader, SchedulingPolicy};
pub use orchestrator::{harvest, RunSummary};
pub use url::normalize_url;
