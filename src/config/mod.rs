//! Configuration module for Forum-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! A configuration file is optional; command-line flags override whatever it sets.
//!
//! # Example
//!
//! ```no_run
//! use forum_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Downloading into: {}", config.download.destination);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{Config, CrawlerConfig, DownloadConfig, OutputConfig, SiteConfig};

// Re-export parser functions
pub use parser::{load_config, load_or_default, parse_config};
pub use validation::validate;
