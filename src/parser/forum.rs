//! Forum listing pages

use super::{element_text, page_title, select_all, PageLink, PageParser, ParseError};
use scraper::Html;
use url::Url;

/// Everything the crawler needs from one page of a forum listing
#[derive(Debug, Clone, Default)]
pub struct ForumPage {
    /// Forum heading, when the page has one
    pub title: Option<String>,

    /// Sub-forums listed on the page (`a.forumtitle`)
    pub child_forums: Vec<PageLink>,

    /// Topics listed on the page (`a.topictitle`)
    pub threads: Vec<PageLink>,

    /// Next page of this same listing
    pub pagination: Vec<Url>,
}

/// Markers that only appear on board pages
const FORUM_PAGE_MARKERS: &str = "#page-body, .forabg, .forumbg, a.forumtitle, a.topictitle";

pub(super) fn parse(parser: &PageParser, html: &str, page_url: &Url) -> Result<ForumPage, ParseError> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    if select_all(root, FORUM_PAGE_MARKERS).is_empty() {
        return Err(ParseError(format!("{} is not a forum page", page_url)));
    }

    let child_forums = collect_links(parser, root, "a.forumtitle[href]", page_url);
    let threads = collect_links(parser, root, "a.topictitle[href]", page_url);
    let pagination = parser.next_page_links(root, page_url);

    Ok(ForumPage {
        title: page_title(root, "h2.forum-title, #page-body h2"),
        child_forums,
        threads,
        pagination,
    })
}

/// Collects titled links, first occurrence of each URL wins
fn collect_links(
    parser: &PageParser,
    root: scraper::ElementRef<'_>,
    css: &str,
    page_url: &Url,
) -> Vec<PageLink> {
    let mut links: Vec<PageLink> = Vec::new();

    for element in select_all(root, css) {
        let Some(url) = element
            .value()
            .attr("href")
            .and_then(|href| parser.resolve(href, page_url))
        else {
            continue;
        };

        if links.iter().any(|link| link.url == url) {
            continue;
        }

        links.push(PageLink {
            title: element_text(element),
            url,
        });
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://forum.example.com/ttc/viewforum.php?f=2").unwrap()
    }

    const FORUM_HTML: &str = r#"<html><head><title>Tire Testing</title></head><body>
        <div id="page-body">
          <h2 class="forum-title"><a href="./viewforum.php?f=2">Tire Testing</a></h2>
          <div class="forabg">
            <a class="forumtitle" href="./viewforum.php?f=5&amp;sid=abc">Round 5</a>
            <a class="forumtitle" href="./viewforum.php?f=6">Round 6</a>
            <a class="forumtitle" href="https://elsewhere.org/forum">External</a>
          </div>
          <div class="forumbg">
            <a class="topictitle" href="./viewtopic.php?f=2&amp;t=11">Round 5 Data</a>
            <a class="topictitle" href="./viewtopic.php?f=2&amp;t=11&amp;sid=xyz">Round 5 Data</a>
            <a class="topictitle" href="./viewtopic.php?f=2&amp;t=12">  General   chat </a>
          </div>
          <div class="pagination">
            <strong>1</strong> <a href="./viewforum.php?f=2&amp;start=25">2</a>
            <a href="./viewforum.php?f=2&amp;start=25">Next</a>
          </div>
        </div></body></html>"#;

    #[test]
    fn test_parse_forum_page() {
        let page = PageParser::default()
            .parse_forum_page(FORUM_HTML, &page_url())
            .unwrap();

        assert_eq!(page.title.as_deref(), Some("Tire Testing"));

        let forums: Vec<_> = page.child_forums.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(forums, vec!["Round 5", "Round 6"]);
        assert_eq!(
            page.child_forums[0].url.as_str(),
            "https://forum.example.com/ttc/viewforum.php?f=5"
        );

        let threads: Vec<_> = page.threads.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(threads, vec!["Round 5 Data", "General chat"]);

        assert_eq!(page.pagination.len(), 1);
        assert_eq!(
            page.pagination[0].as_str(),
            "https://forum.example.com/ttc/viewforum.php?f=2&start=25"
        );
    }

    #[test]
    fn test_rel_next_pagination() {
        let html = r#"<div id="page-body">
            <a rel="next" href="viewforum.php?f=2&start=50">›</a></div>"#;
        let page = PageParser::default().parse_forum_page(html, &page_url()).unwrap();
        assert_eq!(page.pagination.len(), 1);
        assert!(page.child_forums.is_empty());
        assert!(page.threads.is_empty());
    }

    #[test]
    fn test_last_page_has_no_pagination() {
        let html = r#"<div id="page-body"><div class="pagination">
            <a href="./viewforum.php?f=2">1</a> <strong>2</strong></div></div>"#;
        let page = PageParser::default().parse_forum_page(html, &page_url()).unwrap();
        assert!(page.pagination.is_empty());
    }

    #[test]
    fn test_non_forum_page_is_error() {
        let html = "<html><body><p>Service unavailable</p></body></html>";
        let result = PageParser::default().parse_forum_page(html, &page_url());
        assert!(result.is_err());
    }
}
