//! Authenticated HTTP client
//!
//! This module handles all HTTP requests for the harvester, including:
//! - Building the HTTP client with the configured user agent and timeouts
//! - Logging in and capturing the session cookies into an [`AuthContext`]
//! - Following redirects manually so cookies set mid-chain are not lost
//! - Retry logic for transient failures
//!
//! Retries and timeouts are this module's concern; callers see either a page
//! or a [`FetchError`] once the retry budget is spent.

mod auth;

pub use auth::{AuthContext, Credentials};

use crate::config::{CrawlerConfig, SiteConfig};
use crate::ConfigError;
use reqwest::header::{COOKIE, LOCATION};
use reqwest::{redirect::Policy, Client, Method, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors returned once a request has failed for good
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Failed to read body of {url}: {message}")]
    Body { url: String, message: String },

    #[error("Too many redirects from {url}")]
    TooManyRedirects { url: String },

    #[error("Invalid redirect from {url}: {message}")]
    InvalidRedirect { url: String, message: String },
}

impl FetchError {
    /// Returns true if another attempt could succeed
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | HTTP 5xx | Retry |
    /// | Timeout | Retry |
    /// | Connection / body error | Retry |
    /// | HTTP 4xx | Fail immediately |
    /// | Redirect problems | Fail immediately |
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500,
            Self::Timeout { .. } | Self::Network { .. } | Self::Body { .. } => true,
            Self::TooManyRedirects { .. } | Self::InvalidRedirect { .. } => false,
        }
    }

    fn from_reqwest(url: &Url, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

/// A fetched HTML page
#[derive(Debug, Clone)]
pub struct Page {
    /// Page body decoded as UTF-8 (lossy)
    pub content: String,

    /// URL the content was finally served from, after redirects
    pub final_url: Url,
}

/// HTTP client bound to one forum site
#[derive(Debug, Clone)]
pub struct ForumClient {
    http: Client,
    base_url: Url,
    login_url: Url,
    logged_out_marker: String,
    max_retries: u32,
    retry_delay: Duration,
    max_redirects: u32,
}

impl ForumClient {
    /// Builds a client for the configured site
    ///
    /// # Example
    ///
    /// ```no_run
    /// use forum_harvest::config::Config;
    /// use forum_harvest::client::ForumClient;
    ///
    /// let config = Config::default();
    /// let client = ForumClient::new(&config.site, &config.crawler).unwrap();
    /// ```
    pub fn new(site: &SiteConfig, crawler: &CrawlerConfig) -> Result<Self, crate::HarvestError> {
        let base_url = Url::parse(&site.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;
        let login_url = base_url
            .join(&site.login_path)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid login-path: {}", e)))?;

        let http = Client::builder()
            .user_agent(site.user_agent.clone())
            .timeout(crawler.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::none()) // Handle redirects manually
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            http,
            base_url,
            login_url,
            logged_out_marker: site.logged_out_marker.clone(),
            max_retries: crawler.max_retries,
            retry_delay: crawler.retry_delay(),
            max_redirects: crawler.max_redirects,
        })
    }

    /// The root forum URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetches an HTML page with the session's cookies
    pub async fn fetch(&self, url: &Url, auth: &AuthContext) -> Result<Page, FetchError> {
        let (body, final_url) = self.get_with_retry(url, auth).await?;
        Ok(Page {
            content: String::from_utf8_lossy(&body).into_owned(),
            final_url,
        })
    }

    /// Fetches a file's raw bytes with the session's cookies
    pub async fn fetch_bytes(&self, url: &Url, auth: &AuthContext) -> Result<Vec<u8>, FetchError> {
        let (body, _) = self.get_with_retry(url, auth).await?;
        Ok(body)
    }

    /// GET with the retry policy applied
    async fn get_with_retry(
        &self,
        url: &Url,
        auth: &AuthContext,
    ) -> Result<(Vec<u8>, Url), FetchError> {
        let mut attempt = 0;
        loop {
            match self.get_once(url, auth).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Attempt {}/{} for {} failed: {}",
                        attempt,
                        self.max_retries + 1,
                        url,
                        e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Single GET, redirects followed, body read in full
    async fn get_once(&self, url: &Url, auth: &AuthContext) -> Result<(Vec<u8>, Url), FetchError> {
        let (response, final_url) = self.send(Method::GET, url, None, auth).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: final_url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| FetchError::Body {
            url: final_url.to_string(),
            message: e.to_string(),
        })?;

        tracing::trace!("Fetched {} ({} bytes)", final_url, body.len());
        Ok((body.to_vec(), final_url))
    }

    /// Sends a request and follows redirects by hand
    ///
    /// Each hop sends the session cookies that apply to its URL, and cookies
    /// set by any hop are applied before the next one. A 301/302/303
    /// answering a POST is followed with a GET.
    async fn send(
        &self,
        method: Method,
        url: &Url,
        form: Option<&[(String, String)]>,
        auth: &AuthContext,
    ) -> Result<(reqwest::Response, Url), FetchError> {
        let mut method = method;
        let mut form = form;
        let mut current = url.clone();

        for _ in 0..=self.max_redirects {
            let mut request = self.http.request(method.clone(), current.clone());
            if let Some(header) = auth.cookie_header(&current) {
                request = request.header(COOKIE, header);
            }
            if let Some(fields) = form {
                request = request.form(fields);
            }

            tracing::debug!("{} {}", method, current);
            let response = request
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&current, e))?;

            auth.absorb(&current, response.headers());

            let status = response.status();
            if !is_followed_redirect(status) {
                return Ok((response, current));
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| FetchError::InvalidRedirect {
                    url: current.to_string(),
                    message: "missing Location header".to_string(),
                })?;

            let next = current
                .join(location)
                .map_err(|e| FetchError::InvalidRedirect {
                    url: current.to_string(),
                    message: e.to_string(),
                })?;

            if method == Method::POST
                && matches!(
                    status,
                    StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
                )
            {
                method = Method::GET;
                form = None;
            }

            current = next;
        }

        Err(FetchError::TooManyRedirects {
            url: url.to_string(),
        })
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}
