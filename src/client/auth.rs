//! Login and session state
//!
//! A successful login yields an [`AuthContext`]: the session's cookie store,
//! handed explicitly to every later fetch.

use super::ForumClient;
use crate::parser::{find_login_form, is_logged_out};
use crate::HarvestError;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::Method;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Forum account credentials
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session state returned by [`ForumClient::login`]
///
/// Wraps the session's cookie store. Every fetch is handed the context
/// explicitly; cookies the server sets, replaces or expires on a response are
/// applied to the store with their domain, path and expiry rules.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    jar: Arc<Jar>,
}

impl AuthContext {
    /// A context with no session, for boards readable without login
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Builds a context from `Set-Cookie` style strings scoped to `url`
    #[cfg(test)]
    pub(crate) fn with_cookies<'a>(url: &Url, cookies: impl IntoIterator<Item = &'a str>) -> Self {
        let jar = Jar::default();
        for cookie in cookies {
            jar.add_cookie_str(cookie, url);
        }
        Self { jar: Arc::new(jar) }
    }

    /// The `Cookie` header this session sends to `url`, if any
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    /// Applies every `Set-Cookie` of a response served from `url`
    pub(crate) fn absorb(&self, url: &Url, headers: &HeaderMap) {
        self.jar.set_cookies(&mut headers.get_all(SET_COOKIE).iter(), url);
    }
}

impl ForumClient {
    /// Logs into the forum using the provided credentials
    ///
    /// 1. GET the root page and find the quick-login form
    /// 2. POST the credentials (plus the form's hidden fields) to its action
    /// 3. GET the login check page and make sure the logged-out marker is gone
    ///
    /// Any failure is an authentication error; there is no retry at this level
    /// beyond the client's own per-request policy.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthContext, HarvestError> {
        tracing::info!("Logging in as {}", credentials.username);
        let auth = AuthContext::default();

        let (body, final_url) = self
            .get_with_retry(&self.base_url, &auth)
            .await
            .map_err(|e| HarvestError::Authentication(format!("could not load login page: {}", e)))?;
        let html = String::from_utf8_lossy(&body);

        let form = find_login_form(&html, &final_url).ok_or_else(|| {
            HarvestError::Authentication(format!("no login form found on {}", final_url))
        })?;

        let mut fields: Vec<(String, String)> = form
            .hidden
            .into_iter()
            .filter(|(name, _)| !matches!(name.as_str(), "username" | "password" | "login"))
            .collect();
        fields.push(("username".to_string(), credentials.username.clone()));
        fields.push(("password".to_string(), credentials.password.clone()));
        fields.push(("login".to_string(), "Login".to_string()));

        let (response, _) = self
            .send(Method::POST, &form.action, Some(&fields), &auth)
            .await
            .map_err(|e| HarvestError::Authentication(format!("login request failed: {}", e)))?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(HarvestError::Authentication(format!(
                "login form answered HTTP {}",
                status.as_u16()
            )));
        }

        // Double check that the session is actually logged in
        let (body, _) = self
            .get_with_retry(&self.login_url, &auth)
            .await
            .map_err(|e| HarvestError::Authentication(format!("could not verify login: {}", e)))?;
        let html = String::from_utf8_lossy(&body);

        if is_logged_out(&html, &self.logged_out_marker) {
            tracing::error!("Login unsuccessful");
            return Err(HarvestError::Authentication(
                "login unsuccessful, forum still shows the logged-out view".to_string(),
            ));
        }

        tracing::info!("Login successful");
        tracing::debug!(
            "Session cookies: {}",
            auth.cookie_header(&self.base_url).unwrap_or_default()
        );
        Ok(auth)
    }
}
