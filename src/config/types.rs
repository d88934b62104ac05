use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Forum-Harvest
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub crawler: CrawlerConfig,
    pub download: DownloadConfig,
    pub output: OutputConfig,
}

/// The forum being harvested
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// URL of the root forum page
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Name given to the root Forum entity
    #[serde(rename = "root-title")]
    pub root_title: String,

    /// Page fetched after login to confirm the session works
    #[serde(rename = "login-path")]
    pub login_path: String,

    /// Forum title only shown to logged-out visitors
    #[serde(rename = "logged-out-marker")]
    pub logged_out_marker: String,

    /// User agent sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Query parameters carrying per-session ids, stripped before dedup
    #[serde(rename = "session-params")]
    pub session_params: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://sae.wsu.edu/ttc/".to_string(),
            root_title: "Main Forum".to_string(),
            login_path: "index.php".to_string(),
            logged_out_marker: "All Users Must Register".to_string(),
            user_agent: concat!("forum-harvest/", env!("CARGO_PKG_VERSION")).to_string(),
            session_params: vec!["sid".to_string()],
        }
    }
}

/// Crawl expansion and HTTP client behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Number of pages fetched and expanded concurrently
    pub workers: usize,

    /// Retries for 5xx responses, timeouts and connection errors
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Delay between retries (milliseconds)
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Maximum redirect hops followed per request
    #[serde(rename = "max-redirects")]
    pub max_redirects: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_retries: 3,
            retry_delay_ms: 2000,
            request_timeout_secs: 30,
            max_redirects: 10,
        }
    }
}

impl CrawlerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Download pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Root folder downloaded files are written under
    pub destination: String,

    /// Worker pool size in aggressive mode
    pub workers: usize,

    /// Replace files that already exist on disk
    pub overwrite: bool,

    /// Download one file at a time with a pause between fetches
    pub courteous: bool,

    /// Pause between page and file fetches in courteous mode (milliseconds)
    #[serde(rename = "courteous-delay-ms")]
    pub courteous_delay_ms: u64,

    /// Also offer every attachment already recorded in the database
    #[serde(rename = "include-known")]
    pub include_known: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            destination: "./downloads".to_string(),
            workers: 10,
            overwrite: false,
            courteous: false,
            courteous_delay_ms: 1000,
            include_known: false,
        }
    }
}

impl DownloadConfig {
    pub fn courteous_delay(&self) -> Duration {
        Duration::from_millis(self.courteous_delay_ms)
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "./forum.db".to_string(),
        }
    }
}
