use crate::config::types::{Config, CrawlerConfig, DownloadConfig, OutputConfig, SiteConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site_config(&config.site)?;
    validate_crawler_config(&config.crawler)?;
    validate_download_config(&config.download)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the site section
fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            config.base_url
        )));
    }

    url.join(&config.login_path).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid login-path '{}': {}", config.login_path, e))
    })?;

    if config.root_title.trim().is_empty() {
        return Err(ConfigError::Validation(
            "root-title cannot be empty".to_string(),
        ));
    }

    if config.logged_out_marker.trim().is_empty() {
        return Err(ConfigError::Validation(
            "logged-out-marker cannot be empty".to_string(),
        ));
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "crawler workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "request-timeout-secs must be >= 1, got {}",
            config.request_timeout_secs
        )));
    }

    if config.max_redirects > 50 {
        return Err(ConfigError::Validation(format!(
            "max-redirects must be <= 50, got {}",
            config.max_redirects
        )));
    }

    Ok(())
}

/// Validates download configuration
fn validate_download_config(config: &DownloadConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 100 {
        return Err(ConfigError::Validation(format!(
            "download workers must be between 1 and 100, got {}",
            config.workers
        )));
    }

    if config.destination.is_empty() {
        return Err(ConfigError::Validation(
            "destination cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
