//! Thread pages: posts and their attachments

use super::{element_text, page_title, select_all, select_first, PageLink, PageParser, ParseError};
use scraper::{ElementRef, Html};
use url::Url;

/// Attachment links all go through the board's download script
const ATTACHMENT_HREF: &str = "download/file.php";

/// One post as it appears on a thread page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPost {
    pub author: String,

    /// Site-native timestamp, kept as shown
    pub created: String,

    /// Raw HTML of the post body
    pub content: String,

    pub attachments: Vec<PageLink>,
}

/// Everything the crawler needs from one page of a thread
#[derive(Debug, Clone, Default)]
pub struct ThreadPage {
    pub title: Option<String>,
    pub posts: Vec<ParsedPost>,
    pub pagination: Vec<Url>,
}

pub(super) fn parse(parser: &PageParser, html: &str, page_url: &Url) -> Result<ThreadPage, ParseError> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let post_elements = select_all(root, "div.post");
    if post_elements.is_empty() {
        return Err(ParseError(format!("no posts found on {}", page_url)));
    }

    let posts = post_elements
        .into_iter()
        .enumerate()
        .map(|(index, post)| parse_post(parser, post, page_url, index))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ThreadPage {
        title: page_title(root, "h2.topic-title, #page-body h2"),
        posts,
        pagination: parser.next_page_links(root, page_url),
    })
}

fn parse_post(
    parser: &PageParser,
    post: ElementRef<'_>,
    page_url: &Url,
    index: usize,
) -> Result<ParsedPost, ParseError> {
    let author_block = select_first(post, ".author")
        .ok_or_else(|| ParseError(format!("post #{} on {} has no author line", index + 1, page_url)))?;

    let author = select_first(author_block, ".username")
        .or_else(|| select_first(author_block, "strong"))
        .map(element_text)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ParseError(format!("post #{} on {} has no author", index + 1, page_url)))?;

    let created = created_text(author_block, &author);

    let content = select_first(post, "div.content")
        .map(|body| body.inner_html().trim().to_string())
        .unwrap_or_default();

    Ok(ParsedPost {
        author,
        created,
        content,
        attachments: attachment_links(parser, post, page_url),
    })
}

/// Timestamp from the author line: `by <name> » <timestamp>`
fn created_text(author_block: ElementRef<'_>, author: &str) -> String {
    if let Some(time) = select_first(author_block, "time") {
        let text = element_text(time);
        if !text.is_empty() {
            return text;
        }
    }

    let line = element_text(author_block);
    if let Some((_, after)) = line.rsplit_once('»') {
        return after.trim().to_string();
    }

    let rest = line.replacen(author, "", 1);
    let rest = rest.trim();
    rest.strip_prefix("by ").unwrap_or(rest).trim().to_string()
}

/// Attachment links inside a post, inline or in the attachment box
fn attachment_links(parser: &PageParser, post: ElementRef<'_>, page_url: &Url) -> Vec<PageLink> {
    // (link, named from link text)
    let mut found: Vec<(PageLink, bool)> = Vec::new();

    for anchor in select_all(post, "a[href]") {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !href.contains(ATTACHMENT_HREF) {
            continue;
        }
        let Some(url) = parser.resolve(href, page_url) else {
            continue;
        };

        let text = element_text(anchor);
        let has_text = !text.is_empty();

        if let Some(existing) = found.iter_mut().find(|(link, _)| link.url == url) {
            // Inline thumbnails come first without text; the box link names the file
            if !existing.1 && has_text {
                existing.0.title = text;
                existing.1 = true;
            }
            continue;
        }

        let title = if has_text { text } else { fallback_name(anchor, &url) };
        found.push((PageLink { title, url }, has_text));
    }

    found.into_iter().map(|(link, _)| link).collect()
}

/// Name for an attachment link with no text
fn fallback_name(anchor: ElementRef<'_>, url: &Url) -> String {
    if let Some(alt) = select_first(anchor, "img")
        .and_then(|img| img.value().attr("alt"))
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
    {
        return alt.to_string();
    }

    if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "id") {
        return format!("attachment-{}", id);
    }

    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("attachment")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_url() -> Url {
        Url::parse("https://forum.example.com/ttc/viewtopic.php?f=2&t=11").unwrap()
    }

    const THREAD_HTML: &str = r#"<html><head><title>Round 5 Data</title></head><body>
      <div id="page-body">
        <h2 class="topic-title"><a href="./viewtopic.php?f=2&amp;t=11">Round 5 Data</a></h2>
        <div class="post bg2" id="p100">
          <div class="postbody">
            <p class="author">by <strong><a href="./memberlist.php?u=2" class="username">alice</a></strong> &raquo; Mon Mar 07, 2011 3:12 pm</p>
            <div class="content">First <b>post</b></div>
          </div>
        </div>
        <div class="post bg1" id="p101">
          <div class="postbody">
            <p class="author">by <strong>bob</strong> &raquo; Tue Mar 08, 2011 9:00 am</p>
            <div class="content">See attached
              <a href="./download/file.php?id=7&amp;sid=abc"><img src="thumb.png" alt=""></a>
            </div>
            <dl class="attachbox">
              <dd><a class="postlink" href="./download/file.php?id=7">file1.zip</a></dd>
              <dd><a href="./download/file.php?id=8"><img src="x.png" alt="plot.png"></a></dd>
            </dl>
            <a href="https://other.example.org/download/file.php?id=9">mirror</a>
          </div>
        </div>
        <div class="pagination"><a class="next" href="./viewtopic.php?f=2&amp;t=11&amp;start=15">Next</a></div>
      </div></body></html>"#;

    #[test]
    fn test_parse_thread_page() {
        let page = PageParser::default()
            .parse_thread_page(THREAD_HTML, &page_url())
            .unwrap();

        assert_eq!(page.title.as_deref(), Some("Round 5 Data"));
        assert_eq!(page.posts.len(), 2);

        let first = &page.posts[0];
        assert_eq!(first.author, "alice");
        assert_eq!(first.created, "Mon Mar 07, 2011 3:12 pm");
        assert_eq!(first.content, "First <b>post</b>");
        assert!(first.attachments.is_empty());

        let second = &page.posts[1];
        assert_eq!(second.author, "bob");
        assert_eq!(second.created, "Tue Mar 08, 2011 9:00 am");

        let names: Vec<_> = second.attachments.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(names, vec!["file1.zip", "plot.png"]);
        assert_eq!(
            second.attachments[0].url.as_str(),
            "https://forum.example.com/ttc/download/file.php?id=7"
        );

        assert_eq!(
            page.pagination,
            vec![Url::parse("https://forum.example.com/ttc/viewtopic.php?f=2&start=15&t=11").unwrap()]
        );
    }

    #[test]
    fn test_time_element_wins() {
        let html = r#"<div class="post"><p class="author"><span class="username">carol</span>
            <time datetime="2019-01-01T10:00:00+00:00">Tue Jan 01, 2019 10:00 am</time></p>
            <div class="content">hi</div></div>"#;
        let page = PageParser::default().parse_thread_page(html, &page_url()).unwrap();
        assert_eq!(page.posts[0].author, "carol");
        assert_eq!(page.posts[0].created, "Tue Jan 01, 2019 10:00 am");
    }

    #[test]
    fn test_created_without_separator() {
        let html = r#"<div class="post"><p class="author">by <strong>dave</strong> yesterday</p>
            <div class="content">x</div></div>"#;
        let page = PageParser::default().parse_thread_page(html, &page_url()).unwrap();
        assert_eq!(page.posts[0].created, "yesterday");
    }

    #[test]
    fn test_attachment_without_text_uses_id() {
        let html = r#"<div class="post"><p class="author"><strong>erin</strong></p>
            <div class="content"><a href="download/file.php?id=42"></a></div></div>"#;
        let page = PageParser::default().parse_thread_page(html, &page_url()).unwrap();
        assert_eq!(page.posts[0].attachments[0].title, "attachment-42");
    }

    #[test]
    fn test_page_without_posts_is_error() {
        let html = r#"<div id="page-body"><p>The requested topic does not exist.</p></div>"#;
        assert!(PageParser::default().parse_thread_page(html, &page_url()).is_err());
    }

    #[test]
    fn test_post_without_author_is_error() {
        let html = r#"<div class="post"><div class="content">orphan</div></div>"#;
        assert!(PageParser::default().parse_thread_page(html, &page_url()).is_err());
    }
}
