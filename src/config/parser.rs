use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// Every section is optional; missing keys fall back to their defaults.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use forum_harvest::config::load_config;
///
/// let config = load_config(Path::new("harvest.toml")).unwrap();
/// println!("Crawl workers: {}", config.crawler.workers);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Loads the configuration file if one was given, otherwise the defaults
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => Ok(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let config_content = r#"
[site]
base-url = "https://forum.example.com/"
root-title = "Index"
session-params = ["sid", "hilit"]

[crawler]
workers = 8
max-retries = 1

[download]
destination = "/tmp/harvest"
workers = 12
courteous = true

[output]
database-path = "./test.db"
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.site.base_url, "https://forum.example.com/");
        assert_eq!(config.site.root_title, "Index");
        assert_eq!(config.site.session_params, vec!["sid", "hilit"]);
        assert_eq!(config.crawler.workers, 8);
        assert_eq!(config.crawler.max_retries, 1);
        assert_eq!(config.download.workers, 12);
        assert!(config.download.courteous);
        assert_eq!(config.output.database_path, "./test.db");
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = parse_config("[crawler]\nworkers = 2\n").unwrap();
        assert_eq!(config.crawler.workers, 2);
        assert_eq!(config.crawler.max_redirects, 10);
        assert_eq!(config.download.workers, 10);
        assert!(!config.download.overwrite);
        assert_eq!(config.site.logged_out_marker, "All Users Must Register");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/harvest.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config("[download]\nworkers = 0\n");
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_no_path_gives_defaults() {
        let config = load_or_default(None).unwrap();
        assert_eq!(config.output.database_path, "./forum.db");
    }
}
