use crate::UrlError;
use url::Url;

/// List of tracking query parameters to remove during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
];

/// Session parameters stripped when no configuration says otherwise
pub const DEFAULT_SESSION_PARAMS: &[&str] = &["sid"];

/// Normalizes URLs into the keys used by the visited set and entity links
///
/// phpBB appends a per-session `sid` to every link it renders, so the same
/// thread shows up under a different URL on every login. Stripping those
/// parameters is what makes a URL a stable identity across runs.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    session_params: Vec<String>,
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_PARAMS.iter().map(|p| p.to_string()).collect())
    }
}

impl UrlNormalizer {
    pub fn new(session_params: Vec<String>) -> Self {
        Self { session_params }
    }

    /// Normalizes a URL string
    ///
    /// # Normalization Steps
    ///
    /// 1. Parse the URL; reject if malformed
    /// 2. Reject anything that is not http or https
    /// 3. Lowercase the host
    /// 4. Collapse repeated slashes in the path (a trailing slash is kept,
    ///    relative links resolve differently without it)
    /// 5. Remove fragment (everything after #)
    /// 6. Remove session and tracking query parameters
    /// 7. Sort remaining query parameters alphabetically
    /// 8. Remove empty query string (trailing ?)
    pub fn normalize(&self, url_str: &str) -> Result<Url, UrlError> {
        let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
        self.normalize_parsed(url)
    }

    /// Resolves `href` against `base` and normalizes the result
    pub fn resolve(&self, base: &Url, href: &str) -> Result<Url, UrlError> {
        let url = base
            .join(href.trim())
            .map_err(|e| UrlError::Parse(e.to_string()))?;
        self.normalize_parsed(url)
    }

    fn normalize_parsed(&self, mut url: Url) -> Result<Url, UrlError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(UrlError::InvalidScheme(format!(
                "Only HTTP and HTTPS schemes are supported, got: {}",
                url.scheme()
            )));
        }

        let host = url.host_str().ok_or(UrlError::MissingHost)?.to_lowercase();
        url.set_host(Some(&host))
            .map_err(|e| UrlError::Parse(format!("Failed to set host: {}", e)))?;

        let path = normalize_path(url.path());
        url.set_path(&path);

        url.set_fragment(None);

        if url.query().is_some() {
            let params = self.filter_and_sort_query_params(&url);
            if params.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(params);
            }
        }

        Ok(url)
    }

    /// Filters out session/tracking parameters and sorts the rest
    fn filter_and_sort_query_params(&self, url: &Url) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !self.is_dropped_param(key))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        params.sort();
        params
    }

    fn is_dropped_param(&self, key: &str) -> bool {
        self.session_params.iter().any(|p| p == key)
            || TRACKING_PARAMS.contains(&key)
            || key.starts_with("utm_")
    }
}

/// Normalizes a URL with the default session parameters
///
/// # Examples
///
/// ```
/// use forum_harvest::url::normalize_url;
///
/// let url = normalize_url("http://Forum.Example.com/viewtopic.php?t=2&sid=abc&f=1#p9").unwrap();
/// assert_eq!(url.as_str(), "http://forum.example.com/viewtopic.php?f=1&t=2");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    UrlNormalizer::default().normalize(url_str)
}

/// Returns true if both URLs point at the same scheme, host and port
pub fn same_site(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Collapses empty segments in a path, keeping a trailing slash
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));
    if path.ends_with('/') {
        result.push('/');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_scheme() {
        let result = normalize_url("http://example.com/page").unwrap();
        assert_eq!(result.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_keeps_trailing_slash() {
        let result = normalize_url("https://example.com/ttc/").unwrap();
        assert_eq!(result.as_str(), "https://example.com/ttc/");
    }

    #[test]
    fn test_remove_fragment() {
        let result = normalize_url("https://example.com/viewtopic.php?t=1#p42").unwrap();
        assert_eq!(result.as_str(), "https://example.com/viewtopic.php?t=1");
    }

    #[test]
    fn test_remove_session_id() {
        let result =
            normalize_url("https://example.com/viewforum.php?f=3&sid=0123456789abcdef").unwrap();
        assert_eq!(result.as_str(), "https://example.com/viewforum.php?f=3");
    }

    #[test]
    fn test_only_session_id_drops_query() {
        let result = normalize_url("https://example.com/index.php?sid=abc").unwrap();
        assert_eq!(result.as_str(), "https://example.com/index.php");
    }

    #[test]
    fn test_custom_session_params() {
        let normalizer = UrlNormalizer::new(vec!["s".to_string()]);
        let result = normalizer
            .normalize("https://example.com/thread?s=xyz&sid=kept")
            .unwrap();
        assert_eq!(result.as_str(), "https://example.com/thread?sid=kept");
    }

    #[test]
    fn test_remove_tracking_params() {
        let result = normalize_url("https://example.com/page?utm_source=twitter&f=2").unwrap();
        assert_eq!(result.as_str(), "https://example.com/page?f=2");
    }

    #[test]
    fn test_sort_query_params() {
        let result = normalize_url("https://example.com/viewtopic.php?t=2&f=1").unwrap();
        assert_eq!(result.as_str(), "https://example.com/viewtopic.php?f=1&t=2");
    }

    #[test]
    fn test_lowercase_host() {
        let result = normalize_url("https://EXAMPLE.COM/Page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/Page");
    }

    #[test]
    fn test_multiple_slashes() {
        let result = normalize_url("https://example.com///path//to///page").unwrap();
        assert_eq!(result.as_str(), "https://example.com/path/to/page");
    }

    #[test]
    fn test_resolve_relative_link() {
        let base = Url::parse("https://example.com/ttc/index.php").unwrap();
        let result = UrlNormalizer::default()
            .resolve(&base, "./viewforum.php?f=7&sid=abc")
            .unwrap();
        assert_eq!(result.as_str(), "https://example.com/ttc/viewforum.php?f=7");
    }

    #[test]
    fn test_invalid_scheme() {
        let result = normalize_url("ftp://example.com/page");
        assert!(matches!(result.unwrap_err(), UrlError::InvalidScheme(_)));

        let base = Url::parse("https://example.com/").unwrap();
        let result = UrlNormalizer::default().resolve(&base, "mailto:admin@example.com");
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_url() {
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_same_site() {
        let a = Url::parse("http://127.0.0.1:8080/a").unwrap();
        let b = Url::parse("http://127.0.0.1:8080/b?x=1").unwrap();
        let c = Url::parse("http://127.0.0.1:9090/a").unwrap();
        let d = Url::parse("https://127.0.0.1:8080/a").unwrap();
        assert!(same_site(&a, &b));
        assert!(!same_site(&a, &c));
        assert!(!same_site(&a, &d));
    }
}
