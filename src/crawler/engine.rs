//! Crawl engine - expands the root forum into the full forum graph
//!
//! The engine owns a FIFO queue of [`Task`]s and a bounded pool of workers.
//! Each worker fetches and parses one page, then records what it found and
//! claims child URLs in one store transaction. Child tasks flow back to the
//! engine, which queues them.
//!
//! When a crawl stops early (cancelled, or a fatal error) the claims of every
//! queued task and of the pages that led to it are released, so the next run
//! reaches the unfinished branches again from the root.

use crate::client::{AuthContext, ForumClient};
use crate::crawler::task::{ForumTask, Task, ThreadTask};
use crate::download::DownloadLink;
use crate::parser::{ForumPage, PageParser, ThreadPage};
use crate::storage::{self, EntityStore, SharedStorage, SqliteStorage, StorageError, VisitedSet};
use crate::HarvestError;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Totals for one crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub forums_created: u64,
    pub threads_created: u64,
    pub posts_created: u64,
    pub attachments_created: u64,

    /// Tasks expanded successfully
    pub pages_processed: u64,

    /// Tasks dropped after a fetch or parse failure
    pub tasks_abandoned: u64,

    /// Size of the visited set when the crawl finished
    pub urls_visited: u64,

    /// Every attachment seen, in discovery order
    pub downloads: Vec<DownloadLink>,
}

impl CrawlReport {
    fn absorb(&mut self, expansion: &mut Expansion) {
        self.forums_created += expansion.forums_created;
        self.threads_created += expansion.threads_created;
        self.posts_created += expansion.posts_created;
        self.attachments_created += expansion.attachments_created;
        self.pages_processed += 1;
        self.downloads.append(&mut expansion.downloads);
    }
}

/// What one task produced
#[derive(Debug, Default)]
struct Expansion {
    children: Vec<Task>,
    downloads: Vec<DownloadLink>,
    forums_created: u64,
    threads_created: u64,
    posts_created: u64,
    attachments_created: u64,
}

/// Everything a worker needs, cheap to clone into each spawned task
#[derive(Clone)]
struct Worker {
    client: ForumClient,
    auth: Arc<AuthContext>,
    storage: SharedStorage,
    parser: Arc<PageParser>,
}

/// Expands tasks on a bounded worker pool until the queue drains
pub struct CrawlEngine {
    worker: Worker,
    workers: usize,

    /// Minimum time between two page dispatches
    spacing: Duration,
}

impl CrawlEngine {
    pub fn new(
        client: ForumClient,
        auth: AuthContext,
        storage: SharedStorage,
        parser: PageParser,
        workers: usize,
    ) -> Self {
        Self {
            worker: Worker {
                client,
                auth: Arc::new(auth),
                storage,
                parser: Arc::new(parser),
            },
            workers: workers.max(1),
            spacing: Duration::ZERO,
        }
    }

    /// Spaces page fetches at least `spacing` apart
    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    /// Claims the root URL and returns its task, or None if an earlier run
    /// already claimed it
    pub fn root_task(&self, url: url::Url, title: &str) -> Result<Option<Task>, HarvestError> {
        let mut storage = storage::lock(&self.worker.storage)?;
        if storage.try_visit(url.as_str())? {
            Ok(Some(Task::root(url, title)))
        } else {
            tracing::info!("Root {} already visited, nothing to crawl", url);
            Ok(None)
        }
    }

    /// Runs the crawl to completion
    ///
    /// Seed tasks must already be claimed in the visited set. Fetch and parse
    /// failures abandon only the task that hit them. A fatal error stops
    /// dispatch, lets in-flight tasks finish, then is returned. Cancellation
    /// also stops dispatch; the partial report is returned. Either way the
    /// tasks never dispatched are released from the visited set.
    pub async fn run(
        &self,
        seeds: Vec<Task>,
        cancel: &CancellationToken,
    ) -> Result<CrawlReport, HarvestError> {
        let start_time = Instant::now();
        let mut queue: VecDeque<Task> = seeds.into();
        let mut in_flight: JoinSet<(String, Result<Expansion, HarvestError>)> = JoinSet::new();
        let mut report = CrawlReport::default();
        let mut fatal: Option<HarvestError> = None;
        let mut finished: u64 = 0;
        let mut last_dispatch: Option<Instant> = None;

        tracing::info!(
            "Starting crawl with {} seed task(s), {} worker(s)",
            queue.len(),
            self.workers
        );

        loop {
            while fatal.is_none()
                && !cancel.is_cancelled()
                && in_flight.len() < self.workers
                && !queue.is_empty()
            {
                if let Some(wait) = self.wait_before_dispatch(last_dispatch) {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                let Some(task) = queue.pop_front() else {
                    break;
                };
                last_dispatch = Some(Instant::now());
                tracing::debug!("Dispatching {}", task);
                let worker = self.worker.clone();
                in_flight.spawn(async move {
                    let label = task.to_string();
                    (label, worker.expand(task).await)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            finished += 1;

            match joined {
                Ok((_, Ok(mut expansion))) => {
                    report.absorb(&mut expansion);
                    queue.extend(expansion.children);
                }
                Ok((label, Err(e))) if e.is_fatal() => {
                    tracing::error!("Fatal error while expanding {}: {}", label, e);
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
                Ok((label, Err(e))) => {
                    tracing::warn!("Abandoning {}: {}", label, e);
                    report.tasks_abandoned += 1;
                }
                Err(e) => {
                    tracing::error!("Crawl worker failed: {}", e);
                    report.tasks_abandoned += 1;
                }
            }

            if finished % 10 == 0 {
                tracing::info!(
                    "Progress: {} tasks processed, {} queued, {} in flight, {:.1}s elapsed",
                    finished,
                    queue.len(),
                    in_flight.len(),
                    start_time.elapsed().as_secs_f64()
                );
            }
        }

        if let Some(e) = fatal {
            if !queue.is_empty() {
                if let Err(release_error) = self.release_unfinished(&queue) {
                    tracing::error!("Could not release unfinished tasks: {}", release_error);
                }
            }
            return Err(e);
        }

        if !queue.is_empty() {
            let released = self.release_unfinished(&queue)?;
            tracing::warn!(
                "Crawl cancelled with {} task(s) never expanded, {} link(s) released for the next run",
                queue.len(),
                released
            );
        }

        report.urls_visited = storage::lock(&self.worker.storage)?.count_visited()?;

        tracing::info!(
            "Crawl finished: {} pages, {} abandoned, {} attachments seen in {:?}",
            report.pages_processed,
            report.tasks_abandoned,
            report.downloads.len(),
            start_time.elapsed()
        );

        Ok(report)
    }

    fn wait_before_dispatch(&self, last_dispatch: Option<Instant>) -> Option<Duration> {
        let elapsed = last_dispatch?.elapsed();
        let wait = self.spacing.checked_sub(elapsed)?;
        (!wait.is_zero()).then_some(wait)
    }

    /// Releases every queued task and the pages that led to it
    fn release_unfinished(&self, queue: &VecDeque<Task>) -> Result<usize, HarvestError> {
        let urls: HashSet<&str> = queue
            .iter()
            .flat_map(|task| task.lineage())
            .map(|url| url.as_str())
            .collect();

        let mut storage = storage::lock(&self.worker.storage)?;
        let released = storage.transaction(|store| {
            let mut released = 0;
            for url in &urls {
                if store.release(url)? {
                    released += 1;
                }
            }
            Ok::<_, StorageError>(released)
        })?;
        Ok(released)
    }
}

impl Worker {
    async fn expand(&self, task: Task) -> Result<Expansion, HarvestError> {
        match task {
            Task::Forum(task) => {
                let page = self.client.fetch(&task.url, &self.auth).await?;
                let parsed = self
                    .parser
                    .parse_forum_page(&page.content, &page.final_url)
                    .map_err(|e| HarvestError::parse(task.url.as_str(), e.0))?;
                self.commit(|store| record_forum_page(store, &task, parsed))
            }
            Task::Thread(task) => {
                let page = self.client.fetch(&task.url, &self.auth).await?;
                let parsed = self
                    .parser
                    .parse_thread_page(&page.content, &page.final_url)
                    .map_err(|e| HarvestError::parse(task.url.as_str(), e.0))?;
                self.commit(|store| record_thread_page(store, &task, parsed))
            }
        }
    }

    /// Runs one page's writes as a single store transaction
    fn commit(
        &self,
        work: impl FnOnce(&mut SqliteStorage) -> Result<Expansion, HarvestError>,
    ) -> Result<Expansion, HarvestError> {
        let mut storage = storage::lock(&self.storage)?;
        storage.transaction(work)
    }
}

/// Creates (or reuses) the forum, then claims and emits its children
fn record_forum_page(
    storage: &mut SqliteStorage,
    task: &ForumTask,
    page: ForumPage,
) -> Result<Expansion, HarvestError> {
    let mut expansion = Expansion::default();

    let forum = match task.forum_id {
        Some(id) => storage
            .get_forum(id)?
            .ok_or_else(|| StorageError::NotFound(format!("forum {}", id)))?,
        None => {
            let (forum, created) = storage.create_or_get_forum(
                &task.title,
                task.url.as_str(),
                task.parent_forum_id,
            )?;
            if created {
                tracing::info!("New forum: {}", forum.name);
                expansion.forums_created += 1;
            }
            forum
        }
    };

    for link in page.child_forums {
        if storage.try_visit(link.url.as_str())? {
            expansion
                .children
                .push(Task::Forum(task.child(&forum, link)));
        } else {
            tracing::debug!("Forum already visited: {}", link.url);
        }
    }

    for link in page.threads {
        if storage.try_visit(link.url.as_str())? {
            expansion
                .children
                .push(Task::Thread(task.thread(&forum, link)));
        } else {
            tracing::debug!("Thread already visited: {}", link.url);
        }
    }

    for url in page.pagination {
        if storage.try_visit(url.as_str())? {
            expansion
                .children
                .push(Task::Forum(task.next_page(&forum, url)));
        }
    }

    tracing::debug!(
        "Forum {} page {}: {} new task(s)",
        forum.name,
        task.page,
        expansion.children.len()
    );

    Ok(expansion)
}

/// Creates (or reuses) the thread, stores its posts and attachments
fn record_thread_page(
    storage: &mut SqliteStorage,
    task: &ThreadTask,
    page: ThreadPage,
) -> Result<Expansion, HarvestError> {
    let mut expansion = Expansion::default();

    let thread = match task.thread_id {
        Some(id) => storage
            .get_thread(id)?
            .ok_or_else(|| StorageError::NotFound(format!("thread {}", id)))?,
        None => {
            let name = if task.title.is_empty() {
                page.title.clone().unwrap_or_else(|| task.url.to_string())
            } else {
                task.title.clone()
            };
            let (thread, created) =
                storage.create_or_get_thread(&name, task.url.as_str(), task.forum_id)?;
            if created {
                tracing::info!("New thread: {}", thread.name);
                expansion.threads_created += 1;
            }
            thread
        }
    };

    for post in page.posts {
        let (record, created) =
            storage.create_or_get_post(&post.author, &post.created, &post.content, thread.id)?;
        if created {
            expansion.posts_created += 1;
        }

        for attachment in post.attachments {
            let (stored, created) = storage.create_or_get_attachment(
                &attachment.title,
                attachment.url.as_str(),
                record.id,
            )?;
            if created {
                expansion.attachments_created += 1;
            }
            tracing::debug!("Attachment {} in {}", stored.name, thread.name);
            expansion.downloads.push(DownloadLink::new(
                thread.name.clone(),
                stored.name,
                attachment.url,
            ));
        }
    }

    for url in page.pagination {
        if storage.try_visit(url.as_str())? {
            expansion
                .children
                .push(Task::Thread(task.next_page(&thread, url)));
        }
    }

    Ok(expansion)
}
