//! Fetches attachments and writes them into the destination tree

use super::path::{sanitize_component, with_marker};
use super::{humansize, DownloadError, DownloadLink, DownloadOutcome, DownloadStats, SchedulingPolicy};
use crate::client::{AuthContext, ForumClient};
use crate::config::DownloadConfig;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

/// Settings for a [`Downloader`]
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub destination: PathBuf,
    pub overwrite: bool,

    /// Pool size for the aggressive policy
    pub workers: usize,

    /// Spacing between network fetches for the courteous policy
    pub courteous_delay: Duration,
}

impl DownloadOptions {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            destination: PathBuf::from(&config.destination),
            overwrite: config.overwrite,
            workers: config.workers,
            courteous_delay: config.courteous_delay(),
        }
    }
}

/// Materializes download links under a destination root
#[derive(Clone)]
pub struct Downloader {
    client: ForumClient,
    auth: Arc<AuthContext>,
    options: Arc<DownloadOptions>,
}

impl Downloader {
    pub fn new(client: ForumClient, auth: AuthContext, options: DownloadOptions) -> Self {
        Self {
            client,
            auth: Arc::new(auth),
            options: Arc::new(options),
        }
    }

    /// `{destination}/{category}/{filename}` with both names sanitized
    pub fn target_path(&self, link: &DownloadLink) -> PathBuf {
        self.options
            .destination
            .join(sanitize_component(&link.category))
            .join(sanitize_component(&link.filename))
    }

    /// Like [`target_path`](Self::target_path), creating the category folder
    ///
    /// Creating a folder that already exists, or that another worker is
    /// creating at the same moment, is not an error.
    pub fn resolve_path(&self, link: &DownloadLink) -> Result<PathBuf, DownloadError> {
        let path = self.target_path(link);
        if let Some(dir) = path.parent() {
            ensure_dir(dir)?;
        }
        Ok(path)
    }

    /// Returns true if `download` would skip this link without fetching
    fn is_already_on_disk(&self, link: &DownloadLink) -> bool {
        !self.options.overwrite && self.target_path(link).exists()
    }

    /// Downloads one link
    ///
    /// An existing file is left alone unless overwrite is on. Otherwise the
    /// whole body is fetched, written to a temporary file in the category
    /// folder, synced, and renamed over the final path.
    pub async fn download(&self, link: &DownloadLink) -> Result<DownloadOutcome, DownloadError> {
        let path = self.resolve_path(link)?;

        if !self.options.overwrite && path.exists() {
            tracing::debug!("Already downloaded: {}", path.display());
            return Ok(DownloadOutcome::Skipped { path });
        }

        let bytes = self.client.fetch_bytes(&link.link, &self.auth).await?;
        let written = bytes.len() as u64;

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
            .await
            .map_err(|e| DownloadError::Persist {
                path: path.clone(),
                message: e.to_string(),
            })??;

        Ok(DownloadOutcome::Downloaded {
            path,
            bytes: written,
        })
    }

    /// Downloads a batch under the given policy
    ///
    /// Targets are settled first (see [`plan`](Self::plan)), so both policies
    /// do the same work. Cancellation stops new downloads from starting;
    /// those already running finish.
    pub async fn run(
        &self,
        links: Vec<DownloadLink>,
        policy: SchedulingPolicy,
        cancel: &CancellationToken,
    ) -> DownloadStats {
        let (links, duplicates) = self.plan(links);
        let mut stats = DownloadStats {
            duplicates,
            ..DownloadStats::default()
        };

        tracing::info!(
            "Downloading {} file(s) into {} ({:?})",
            links.len(),
            self.options.destination.display(),
            policy
        );

        match policy {
            SchedulingPolicy::Courteous => {
                let mut fetched_any = false;
                for link in links {
                    if cancel.is_cancelled() {
                        break;
                    }

                    let needs_fetch = !self.is_already_on_disk(&link);
                    if needs_fetch && fetched_any {
                        tokio::select! {
                            _ = tokio::time::sleep(self.options.courteous_delay) => {}
                            _ = cancel.cancelled() => break,
                        }
                    }
                    fetched_any |= needs_fetch;

                    let outcome = self.download(&link).await;
                    self.report(&link, &outcome);
                    stats.record(&outcome);
                }
            }
            SchedulingPolicy::Aggressive => {
                let outcomes: Vec<_> = stream::iter(links)
                    .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
                    .map(|link| async move {
                        let outcome = self.download(&link).await;
                        (link, outcome)
                    })
                    .buffer_unordered(self.options.workers.max(1))
                    .collect()
                    .await;

                for (link, outcome) in outcomes {
                    self.report(&link, &outcome);
                    stats.record(&outcome);
                }
            }
        }

        if cancel.is_cancelled() {
            tracing::warn!("Downloads cancelled after {} file(s)", stats.total());
        }

        tracing::info!(
            "Downloads finished: {} new ({}), {} skipped, {} failed, {} duplicate link(s)",
            stats.downloaded,
            humansize(stats.bytes_written),
            stats.skipped,
            stats.failed,
            stats.duplicates
        );

        stats
    }

    /// Gives every distinct source its own target path
    ///
    /// A link repeating an earlier link's source and target is dropped and
    /// counted. Different sources sharing one target are ordered by URL: the
    /// first keeps the name, each other one gets its attachment id (or its
    /// rank) added to the file name. Returns the links in their original
    /// order and the number dropped.
    pub fn plan(&self, links: Vec<DownloadLink>) -> (Vec<DownloadLink>, u64) {
        let offered = links.len();
        let mut seen = HashSet::new();
        let mut unique: Vec<DownloadLink> = links
            .into_iter()
            .filter(|link| {
                let fresh = seen.insert((self.target_path(link), link.link.clone()));
                if !fresh {
                    tracing::debug!("Duplicate download link {}", link.link);
                }
                fresh
            })
            .collect();
        let duplicates = (offered - unique.len()) as u64;

        let mut by_target: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
        for (index, link) in unique.iter().enumerate() {
            by_target.entry(self.target_path(link)).or_default().push(index);
        }
        let mut taken: HashSet<PathBuf> = by_target.keys().cloned().collect();

        for (target, mut sharing) in by_target {
            if sharing.len() < 2 {
                continue;
            }
            sharing.sort_by(|a, b| unique[*a].link.as_str().cmp(unique[*b].link.as_str()));
            for (rank, &index) in sharing.iter().enumerate().skip(1) {
                let renamed = self.distinct_name(&unique[index], rank + 1, &mut taken);
                tracing::warn!(
                    "{} also targets {}, saving it as {}",
                    unique[index].link,
                    target.display(),
                    renamed
                );
                unique[index].filename = renamed;
            }
        }

        (unique, duplicates)
    }

    /// First `{stem}-{marker}` name whose target is still free, claiming it
    fn distinct_name(&self, link: &DownloadLink, rank: usize, taken: &mut HashSet<PathBuf>) -> String {
        let marker = link
            .link
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_else(|| rank.to_string());

        let mut attempt = 1;
        loop {
            let name = if attempt == 1 {
                with_marker(&link.filename, &marker)
            } else {
                with_marker(&link.filename, &format!("{}-{}", marker, attempt))
            };
            let candidate = DownloadLink::new(link.category.clone(), name.clone(), link.link.clone());
            if taken.insert(self.target_path(&candidate)) {
                return name;
            }
            attempt += 1;
        }
    }

    fn report(&self, link: &DownloadLink, outcome: &Result<DownloadOutcome, DownloadError>) {
        match outcome {
            Ok(DownloadOutcome::Downloaded { path, bytes }) => {
                tracing::info!("Downloaded {} ({})", path.display(), humansize(*bytes));
            }
            Ok(DownloadOutcome::Skipped { .. }) => {}
            Err(e) => {
                tracing::warn!(
                    "Failed to download {} to {}: {}",
                    link.link,
                    self.target_path(link).display(),
                    e
                );
            }
        }
    }
}

fn ensure_dir(dir: &Path) -> Result<(), DownloadError> {
    match std::fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(source) => Err(DownloadError::Io {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

/// Writes `bytes` to `path` through a synced temporary file in the same folder
///
/// The temporary file is deleted if anything fails before the rename.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let io_error = |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(io_error)?;
    temp.write_all(bytes).map_err(io_error)?;
    temp.as_file().sync_all().map_err(io_error)?;

    temp.persist(path).map_err(|e| DownloadError::Persist {
        path: path.to_path_buf(),
        message: e.error.to_string(),
    })?;

    Ok(())
}
