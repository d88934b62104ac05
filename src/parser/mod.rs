//! HTML parser for phpBB-style forum pages
//!
//! Pure functions over page content, no I/O. This module extracts:
//! - The quick-login form and the logged-out marker (login flow)
//! - Child forum, thread and next-page links (forum pages)
//! - Posts with author, timestamp, body and attachments (thread pages)
//!
//! Every link returned is absolute, normalized, and on the same site as the
//! page it was found on.

mod forum;
mod thread;

pub use forum::ForumPage;
pub use thread::{ParsedPost, ThreadPage};

use crate::url::{same_site, UrlNormalizer};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Error returned when a page does not have the shape its kind requires
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(pub String);

/// A titled link found on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLink {
    /// Link text, trimmed
    pub title: String,

    /// Absolute, normalized URL
    pub url: Url,
}

/// The form that submits the login credentials
#[derive(Debug, Clone)]
pub struct LoginForm {
    /// Absolute URL the form posts to
    pub action: Url,

    /// Hidden inputs carried alongside the credentials
    pub hidden: Vec<(String, String)>,
}

/// Page parser bound to a URL normalization policy
#[derive(Debug, Clone, Default)]
pub struct PageParser {
    normalizer: UrlNormalizer,
}

impl PageParser {
    pub fn new(normalizer: UrlNormalizer) -> Self {
        Self { normalizer }
    }

    /// Parses a forum listing page
    pub fn parse_forum_page(&self, html: &str, page_url: &Url) -> Result<ForumPage, ParseError> {
        forum::parse(self, html, page_url)
    }

    /// Parses one page of a thread
    pub fn parse_thread_page(&self, html: &str, page_url: &Url) -> Result<ThreadPage, ParseError> {
        thread::parse(self, html, page_url)
    }

    /// Resolves an href found on `page_url`
    ///
    /// Returns None if the link should be excluded:
    /// - empty or fragment-only hrefs
    /// - javascript:, mailto:, tel:, data: schemes
    /// - links leaving the site
    pub(crate) fn resolve(&self, href: &str, page_url: &Url) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            return None;
        }

        let url = self.normalizer.resolve(page_url, href).ok()?;
        if same_site(&url, page_url) {
            Some(url)
        } else {
            None
        }
    }

    /// Collects next-page links, deduplicated, in document order
    pub(crate) fn next_page_links(&self, root: ElementRef<'_>, page_url: &Url) -> Vec<Url> {
        let mut links: Vec<Url> = Vec::new();

        let marked = select_all(root, "a[rel='next'], .pagination li.next a, .pagination a.next");
        let labelled = select_all(root, ".pagination a").into_iter().filter(|a| {
            let text = element_text(*a).to_lowercase();
            text == "next" || text == "›" || text == "»"
        });

        for element in marked.into_iter().chain(labelled) {
            if let Some(url) = element
                .value()
                .attr("href")
                .and_then(|href| self.resolve(href, page_url))
            {
                if url != *page_url && !links.contains(&url) {
                    links.push(url);
                }
            }
        }

        links
    }
}

/// Finds the quick-login form on a page
///
/// The form holding the `quick-login` block wins; otherwise the first form
/// with a password input is used.
pub fn find_login_form(html: &str, page_url: &Url) -> Option<LoginForm> {
    let document = Html::parse_document(html);
    let forms = select_all(document.root_element(), "form");

    let form = forms
        .iter()
        .find(|form| {
            form.value().classes().any(|c| c == "quick-login")
                || !select_all(**form, ".quick-login").is_empty()
        })
        .or_else(|| {
            forms
                .iter()
                .find(|form| !select_all(**form, "input[type='password']").is_empty())
        })?;

    let action = page_url.join(form.value().attr("action").unwrap_or("")).ok()?;

    let hidden = select_all(*form, "input[type='hidden'][name]")
        .into_iter()
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or("");
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    Some(LoginForm { action, hidden })
}

/// Returns true if the page is the logged-out view of the board
pub fn is_logged_out(html: &str, marker: &str) -> bool {
    let document = Html::parse_document(html);
    select_all(document.root_element(), "a.forumtitle")
        .into_iter()
        .any(|title| element_text(title) == marker.trim())
}

/// Selects matching descendants; an invalid selector matches nothing
pub(crate) fn select_all<'a>(scope: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => scope.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

/// First matching descendant
pub(crate) fn select_first<'a>(scope: ElementRef<'a>, css: &str) -> Option<ElementRef<'a>> {
    select_all(scope, css).into_iter().next()
}

/// Text content with whitespace runs collapsed
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Page heading, falling back to the document title
pub(crate) fn page_title(root: ElementRef<'_>, heading_css: &str) -> Option<String> {
    select_first(root, heading_css)
        .or_else(|| select_first(root, "title"))
        .map(element_text)
        .filter(|s| !s.is_empty())
}
