//! Download pipeline for discovered attachments
//!
//! This module handles:
//! - Mapping a [`DownloadLink`] to `{destination}/{category}/{filename}`
//! - Fetching each file once and writing it without ever exposing a partial
//!   file at its final path
//! - Running a batch serially (courteous) or on a bounded pool (aggressive)

mod downloader;
mod path;

pub use downloader::{DownloadOptions, Downloader};
pub use path::sanitize_component;

use crate::client::FetchError;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// A discovered file waiting to be written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    /// Subfolder the file lands in (the owning thread's name)
    pub category: String,
    pub filename: String,
    pub link: Url,
}

impl DownloadLink {
    pub fn new(category: impl Into<String>, filename: impl Into<String>, link: Url) -> Self {
        Self {
            category: category.into(),
            filename: filename.into(),
            link,
        }
    }
}

/// How a batch of downloads is scheduled, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// One at a time, spaced out
    Courteous,

    /// Bounded worker pool
    Aggressive,
}

impl SchedulingPolicy {
    pub fn from_courteous(courteous: bool) -> Self {
        if courteous {
            Self::Courteous
        } else {
            Self::Aggressive
        }
    }
}

/// Result of one successful `download`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf, bytes: u64 },

    /// File already on disk and overwrite is off; nothing was fetched
    Skipped { path: PathBuf },
}

/// Errors for a single download; never stop the batch
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not move download into place at {}: {message}", path.display())]
    Persist { path: PathBuf, message: String },
}

/// Totals for a batch of downloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub downloaded: u64,
    pub bytes_written: u64,
    pub skipped: u64,
    pub failed: u64,

    /// Links repeating an earlier link's source and target, not downloaded again
    pub duplicates: u64,
}

impl DownloadStats {
    /// Links handled, whatever their outcome
    pub fn total(&self) -> u64 {
        self.downloaded + self.skipped + self.failed + self.duplicates
    }

    pub(crate) fn record(&mut self, outcome: &Result<DownloadOutcome, DownloadError>) {
        match outcome {
            Ok(DownloadOutcome::Downloaded { bytes, .. }) => {
                self.downloaded += 1;
                self.bytes_written += bytes;
            }
            Ok(DownloadOutcome::Skipped { .. }) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Formats a byte count with binary units
pub fn humansize(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
