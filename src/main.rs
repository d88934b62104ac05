//! Forum-Harvest main entry point
//!
//! This is the command-line interface for the forum crawler and attachment
//! downloader.

use anyhow::Context;
use clap::Parser;
use forum_harvest::config::{load_or_default, validate, Config};
use forum_harvest::output::{load_statistics, print_statistics, print_summary};
use forum_harvest::storage::open_storage;
use forum_harvest::{harvest, Credentials};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Forum-Harvest: crawl a phpBB forum and download its attachments
///
/// Logs in with the given account, walks every forum and thread reachable
/// from the root, records forums, threads, posts and attachments in a SQLite
/// database, and downloads each attachment into a folder named after its
/// thread. Re-running picks up only what earlier runs have not seen.
#[derive(Parser, Debug)]
#[command(name = "forum-harvest")]
#[command(version)]
#[command(about = "Crawl a phpBB forum and download its attachments", long_about = None)]
struct Cli {
    /// Forum username
    #[arg(value_name = "USERNAME", required_unless_present_any = ["stats", "dry_run"])]
    username: Option<String>,

    /// Forum password
    #[arg(value_name = "PASSWORD", required_unless_present_any = ["stats", "dry_run"])]
    password: Option<String>,

    /// Path to TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory downloads are written into
    #[arg(short, long, value_name = "DIR")]
    destination: Option<PathBuf>,

    /// Number of parallel downloads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Overwrite files that already exist
    #[arg(short, long)]
    force: bool,

    /// Crawl and download one request at a time
    #[arg(short, long)]
    courteous: bool,

    /// Path to the SQLite database
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Root forum URL
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the configuration and print it without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = build_config(&cli)?;

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_harvest(&cli, &config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("forum_harvest=info,warn"),
            1 => EnvFilter::new("forum_harvest=debug,info"),
            2 => EnvFilter::new("forum_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads the config file (if any) and applies command-line overrides
fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    if let Some(path) = &cli.config {
        tracing::info!("Loading configuration from: {}", path.display());
    }
    let mut config = load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(destination) = &cli.destination {
        config.download.destination = destination.display().to_string();
    }
    if let Some(workers) = cli.workers {
        config.download.workers = workers;
    }
    if cli.force {
        config.download.overwrite = true;
    }
    if cli.courteous {
        config.download.courteous = true;
    }
    if let Some(database) = &cli.database {
        config.output.database_path = database.display().to_string();
    }
    if let Some(base_url) = &cli.base_url {
        config.site.base_url = base_url.clone();
    }

    validate(&config).context("Invalid configuration")?;
    Ok(config)
}

/// Handles the --dry-run mode: prints the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Forum-Harvest Dry Run ===\n");

    println!("Site:");
    println!("  Root: {} ({})", config.site.base_url, config.site.root_title);
    println!("  Login check page: {}", config.site.login_path);
    println!("  User agent: {}", config.site.user_agent);
    println!("  Session params stripped: {}", config.site.session_params.join(", "));

    println!("\nCrawler:");
    println!("  Workers: {}", config.crawler.workers);
    println!(
        "  Retries: {} ({}ms apart)",
        config.crawler.max_retries, config.crawler.retry_delay_ms
    );
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);

    println!("\nDownloads:");
    println!("  Destination: {}", config.download.destination);
    println!(
        "  Mode: {}",
        if config.download.courteous {
            format!("courteous ({}ms between files)", config.download.courteous_delay_ms)
        } else {
            format!("aggressive ({} workers)", config.download.workers)
        }
    );
    println!("  Overwrite existing: {}", config.download.overwrite);
    println!("  Include known attachments: {}", config.download.include_known);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))
        .context("Failed to open database")?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest: login, crawl, download
async fn handle_harvest(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let (Some(username), Some(password)) = (&cli.username, &cli.password) else {
        anyhow::bail!("username and password are required");
    };
    let credentials = Credentials::new(username.as_str(), password.as_str());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight work");
            interrupt.cancel();
        }
    });

    match harvest(config, &credentials, cancel).await {
        Ok(summary) => {
            tracing::info!("Harvest completed");
            print_summary(&summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvest failed: {}", e);
            Err(e.into())
        }
    }
}
