//! Orchestrator - one complete harvest run
//!
//! Login, crawl, then download. Every worker pool is created inside the
//! stage that uses it and fully drained before that stage returns, whether
//! it finished, failed or was cancelled.

use crate::client::{Credentials, ForumClient};
use crate::config::Config;
use crate::crawler::{CrawlEngine, CrawlReport, Task};
use crate::download::{DownloadOptions, DownloadStats, Downloader, SchedulingPolicy};
use crate::parser::PageParser;
use crate::storage::{self, open_storage, EntityStore};
use crate::url::UrlNormalizer;
use crate::HarvestError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Totals for a whole run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub crawl: CrawlReport,
    pub downloads: DownloadStats,
    pub elapsed: Duration,
}

/// Runs a complete harvest
///
/// 1. Create the destination root and open the store
/// 2. Log in
/// 3. Crawl from the root forum (skipped if an earlier run expanded it)
/// 4. Download every attachment found, plus stored ones with `include-known`
///
/// Only authentication, store and filesystem failures are returned as
/// errors; failed pages and downloads are counted in the summary.
pub async fn harvest(
    config: &Config,
    credentials: &Credentials,
    cancel: CancellationToken,
) -> Result<RunSummary, HarvestError> {
    let start_time = Instant::now();

    let destination = Path::new(&config.download.destination);
    std::fs::create_dir_all(destination).map_err(|e| {
        tracing::error!(
            "Cannot create destination {}: {}",
            destination.display(),
            e
        );
        HarvestError::Io(e)
    })?;

    let storage = storage::shared(open_storage(Path::new(&config.output.database_path))?);
    tracing::info!("Using database {}", config.output.database_path);

    let client = ForumClient::new(&config.site, &config.crawler)?;
    let auth = client.login(credentials).await?;

    let normalizer = UrlNormalizer::new(config.site.session_params.clone());
    let root = normalizer.normalize(&config.site.base_url)?;

    let policy = SchedulingPolicy::from_courteous(config.download.courteous);
    let crawl_workers = match policy {
        SchedulingPolicy::Courteous => 1,
        SchedulingPolicy::Aggressive => config.crawler.workers,
    };

    let mut engine = CrawlEngine::new(
        client.clone(),
        auth.clone(),
        Arc::clone(&storage),
        PageParser::new(normalizer),
        crawl_workers,
    );
    if policy == SchedulingPolicy::Courteous {
        engine = engine.with_spacing(config.download.courteous_delay());
    }

    let seeds: Vec<Task> = engine
        .root_task(root, &config.site.root_title)?
        .into_iter()
        .collect();
    let crawl = engine.run(seeds, &cancel).await?;

    let mut links = crawl.downloads.clone();
    if config.download.include_known {
        let known = storage::lock(&storage)?.known_download_links()?;
        tracing::info!("Adding {} attachment(s) already in the store", known.len());
        links.extend(known);
    }

    let downloads = if cancel.is_cancelled() {
        tracing::warn!("Run cancelled, skipping {} download(s)", links.len());
        DownloadStats::default()
    } else {
        let downloader = Downloader::new(client, auth, DownloadOptions::from_config(&config.download));
        downloader.run(links, policy, &cancel).await
    };

    Ok(RunSummary {
        crawl,
        downloads,
        elapsed: start_time.elapsed(),
    })
}
