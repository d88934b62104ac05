//! Units of crawl work
//!
//! Tasks are immutable: expanding one only ever produces new tasks. Each task
//! remembers the chain of pages whose expansion led to it, so a crawl that
//! stops early can hand every unfinished branch back to the visited set.

use crate::parser::PageLink;
use crate::storage::{ForumRecord, ThreadRecord};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// One expanded page on the way from the root to a task
#[derive(Debug, PartialEq, Eq)]
pub struct Trail {
    url: Url,
    parent: Option<Arc<Trail>>,
}

impl Trail {
    fn extend(url: &Url, parent: &Option<Arc<Trail>>) -> Arc<Trail> {
        Arc::new(Trail {
            url: url.clone(),
            parent: parent.clone(),
        })
    }
}

/// One page to fetch and expand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Forum(ForumTask),
    Thread(ThreadTask),
}

/// A page of a forum listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumTask {
    pub url: Url,

    /// Full forum name, already prefixed with its ancestors
    pub title: String,

    pub parent_forum_id: Option<i64>,

    /// Set for pagination continuations of an already created forum
    pub forum_id: Option<i64>,

    pub page: u32,

    /// Pages expanded before this one, nearest first
    pub origin: Option<Arc<Trail>>,
}

/// A page of a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadTask {
    pub url: Url,
    pub title: String,

    /// Owning forum, which always exists before the task does
    pub forum_id: i64,

    /// Set for pagination continuations of an already created thread
    pub thread_id: Option<i64>,

    pub page: u32,

    /// Pages expanded before this one, nearest first
    pub origin: Option<Arc<Trail>>,
}

impl Task {
    /// The task for the board's root forum
    pub fn root(url: Url, title: impl Into<String>) -> Self {
        Task::Forum(ForumTask {
            url,
            title: title.into(),
            parent_forum_id: None,
            forum_id: None,
            page: 1,
            origin: None,
        })
    }

    pub fn url(&self) -> &Url {
        match self {
            Task::Forum(task) => &task.url,
            Task::Thread(task) => &task.url,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Task::Forum(_) => "forum",
            Task::Thread(_) => "thread",
        }
    }

    pub fn page(&self) -> u32 {
        match self {
            Task::Forum(task) => task.page,
            Task::Thread(task) => task.page,
        }
    }

    /// This task's URL followed by every page that led to it
    pub fn lineage(&self) -> Vec<&Url> {
        let origin = match self {
            Task::Forum(task) => &task.origin,
            Task::Thread(task) => &task.origin,
        };
        let mut urls = vec![self.url()];
        let mut next = origin.as_deref();
        while let Some(step) = next {
            urls.push(&step.url);
            next = step.parent.as_deref();
        }
        urls
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = match self {
            Task::Forum(task) => &task.title,
            Task::Thread(task) => &task.title,
        };
        write!(
            f,
            "{} '{}' page {} ({})",
            self.kind(),
            title,
            self.page(),
            self.url()
        )
    }
}

impl ForumTask {
    /// A sub-forum found on this page, which recorded `forum`
    pub fn child(&self, forum: &ForumRecord, link: PageLink) -> Self {
        Self {
            url: link.url,
            title: format!("{}/{}", forum.name, link.title),
            parent_forum_id: Some(forum.id),
            forum_id: None,
            page: 1,
            origin: Some(self.trail()),
        }
    }

    /// A thread listed on this page, which recorded `forum`
    pub fn thread(&self, forum: &ForumRecord, link: PageLink) -> ThreadTask {
        ThreadTask {
            url: link.url,
            title: link.title,
            forum_id: forum.id,
            thread_id: None,
            page: 1,
            origin: Some(self.trail()),
        }
    }

    /// The next page of this same forum listing
    pub fn next_page(&self, forum: &ForumRecord, url: Url) -> Self {
        Self {
            url,
            title: forum.name.clone(),
            parent_forum_id: forum.parent_id,
            forum_id: Some(forum.id),
            page: self.page + 1,
            origin: Some(self.trail()),
        }
    }

    fn trail(&self) -> Arc<Trail> {
        Trail::extend(&self.url, &self.origin)
    }
}

impl ThreadTask {
    /// The next page of this same thread
    pub fn next_page(&self, thread: &ThreadRecord, url: Url) -> Self {
        Self {
            url,
            title: thread.name.clone(),
            forum_id: thread.forum_id,
            thread_id: Some(thread.id),
            page: self.page + 1,
            origin: Some(Trail::extend(&self.url, &self.origin)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forum(id: i64, name: &str, parent_id: Option<i64>) -> ForumRecord {
        ForumRecord {
            id,
            name: name.to_string(),
            link: format!("https://example.com/viewforum.php?f={}", id),
            parent_id,
        }
    }

    fn link(title: &str, url: &str) -> PageLink {
        PageLink {
            title: title.to_string(),
            url: Url::parse(url).unwrap(),
        }
    }

    fn root() -> ForumTask {
        match Task::root(Url::parse("https://example.com/ttc/").unwrap(), "Main Forum") {
            Task::Forum(task) => task,
            Task::Thread(_) => unreachable!(),
        }
    }

    #[test]
    fn test_child_forum_name_is_prefixed() {
        let parent = forum(1, "Main Forum", None);
        let task = root().child(&parent, link("Round 5", "https://example.com/viewforum.php?f=5"));

        assert_eq!(task.title, "Main Forum/Round 5");
        assert_eq!(task.parent_forum_id, Some(1));
        assert_eq!(task.forum_id, None);
        assert_eq!(task.page, 1);
    }

    #[test]
    fn test_forum_pagination_reuses_entity() {
        let record = forum(3, "Main Forum/B", Some(1));
        let first = root().child(&forum(1, "Main Forum", None), link("B", &record.link));
        let next = first.next_page(&record, Url::parse("https://example.com/viewforum.php?f=3&start=25").unwrap());

        assert_eq!(next.forum_id, Some(3));
        assert_eq!(next.page, 2);
        assert_eq!(next.title, "Main Forum/B");
    }

    #[test]
    fn test_thread_pagination_reuses_entity() {
        let owner = forum(2, "A", None);
        let first = root().thread(&owner, link("T1", "https://example.com/viewtopic.php?t=9"));
        assert_eq!(first.forum_id, 2);
        assert_eq!(first.thread_id, None);

        let thread = ThreadRecord {
            id: 7,
            name: "T1".to_string(),
            link: first.url.to_string(),
            forum_id: 2,
        };
        let next = first.next_page(&thread, Url::parse("https://example.com/viewtopic.php?start=15&t=9").unwrap());
        assert_eq!(next.thread_id, Some(7));
        assert_eq!(next.forum_id, 2);
        assert_eq!(next.page, 2);
    }

    #[test]
    fn test_lineage_walks_back_to_root() {
        let a = forum(1, "Main Forum", None);
        let b = forum(2, "Main Forum/B", Some(1));
        let child = root().child(&a, link("B", "https://example.com/viewforum.php?f=2"));
        let second_page = child.next_page(
            &b,
            Url::parse("https://example.com/viewforum.php?f=2&start=25").unwrap(),
        );
        let thread = Task::Thread(second_page.thread(&b, link("T", "https://example.com/viewtopic.php?t=4")));

        let lineage: Vec<&str> = thread.lineage().into_iter().map(Url::as_str).collect();
        assert_eq!(
            lineage,
            vec![
                "https://example.com/viewtopic.php?t=4",
                "https://example.com/viewforum.php?f=2&start=25",
                "https://example.com/viewforum.php?f=2",
                "https://example.com/ttc/",
            ]
        );
        assert_eq!(Task::root(Url::parse("https://example.com/ttc/").unwrap(), "A").lineage().len(), 1);
    }

    #[test]
    fn test_display_names_kind_and_url() {
        let task = Task::root(Url::parse("https://example.com/ttc/").unwrap(), "Main Forum");
        assert_eq!(
            task.to_string(),
            "forum 'Main Forum' page 1 (https://example.com/ttc/)"
        );
    }
}
