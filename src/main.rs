//! lbry-harvest main entry point
//!
//! This is the command-line interface for the two-stage index crawler and
//! LBRY downloader.

use anyhow::Context;
use clap::Parser;
use lbry_harvest::config::{load_or_default, Config};
use lbry_harvest::output::{self, PageRange, RunReport, EXIT_FATAL};
use lbry_harvest::storage::open_catalog;
use lbry_harvest::{PipelineController, RunOptions, StageSelection};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// lbry-harvest: crawl guncadindex for Odysee links and download them via lbrynet
///
/// Stage1 (-x) walks the index pages and records every post's Odysee link in
/// the catalog. Stage2 (-s) resolves the links through a local `lbrynet`
/// daemon and downloads the files. Without either flag both stages run.
#[derive(Parser, Debug)]
#[command(name = "lbry-harvest")]
#[command(version)]
#[command(about = "Two-stage index crawler and LBRY downloader", long_about = None)]
struct Cli {
    /// Run Stage1 (crawl the index)
    #[arg(short = 'x', long = "crawl")]
    crawl: bool,

    /// Run Stage2 (resolve and download), optionally limited to pages START [END]
    #[arg(short = 's', long = "download", num_args = 0..=2, value_name = "PAGE")]
    download: Option<Vec<u32>>,

    /// Last index page to walk
    #[arg(short = 'e', long = "end", value_name = "PAGE")]
    end: Option<u32>,

    /// Write the run report as JSON to this path
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    output: Option<PathBuf>,

    /// Fast mode: more concurrent requests and shorter spacing
    #[arg(short, long)]
    fast: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Catalog database path
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Concurrent post fetches during the crawl
    #[arg(short = 'c', long = "concurrency", value_name = "N")]
    concurrency: Option<usize>,

    /// Concurrent daemon downloads
    #[arg(short = 'd', long = "downloads", value_name = "N")]
    downloads: Option<usize>,

    /// Path to TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory the daemon saves files into
    #[arg(long, value_name = "PATH")]
    download_dir: Option<PathBuf>,

    /// Start from an empty catalog, deleting the existing database
    #[arg(long, conflicts_with = "stats")]
    fresh: bool,

    /// Show statistics from the catalog and exit
    #[arg(long)]
    stats: bool,
}

impl Cli {
    fn stages(&self) -> StageSelection {
        StageSelection::from_flags(self.crawl, self.download.is_some())
    }

    /// Applies command-line overrides on top of the file configuration
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(db) = &self.db {
            config.output.database_path = db.to_string_lossy().into_owned();
        }
        if let Some(path) = &self.output {
            config.output.report_path = Some(path.to_string_lossy().into_owned());
        }
        if self.fast {
            config.crawler.fast = true;
        }
        if let Some(n) = self.concurrency {
            if config.crawler.fast {
                config.crawler.fast_concurrency = n;
            } else {
                config.crawler.concurrency = n;
            }
        }
        if let Some(n) = self.downloads {
            config.daemon.concurrency = n;
        }
        if let Some(dir) = &self.download_dir {
            config.daemon.download_dir = dir.to_string_lossy().into_owned();
        }

        if let Some(pages) = &self.download {
            if let Some(start) = pages.first() {
                config.crawler.start_page = *start;
            }
            if let Some(end) = pages.get(1) {
                config.crawler.end_page = *end;
            }
        }
        if let Some(end) = self.end {
            config.crawler.end_page = end;
        }
    }

    /// Stage2 page filter: only when `-s` was given explicit bounds
    fn download_pages(&self, config: &Config) -> Option<std::ops::RangeInclusive<u32>> {
        self.download
            .as_ref()
            .filter(|pages| !pages.is_empty())
            .map(|_| config.crawler.start_page..=config.crawler.end_page)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = load_or_default(cli.config.as_deref()).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            cli.config
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "defaults".to_string())
        )
    })?;
    cli.apply_overrides(&mut config);

    if cli.stats {
        handle_stats(&config)?;
        return Ok(0);
    }

    let options = RunOptions {
        stages: cli.stages(),
        download_pages: cli.download_pages(&config),
        report_path: config.output.report_path.as_ref().map(PathBuf::from),
        fresh: cli.fresh,
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let controller = match PipelineController::from_config(config.clone(), options.clone(), cancel)
    {
        Ok(controller) => controller,
        Err(e) => {
            tracing::error!("Cannot start run: {}", e);
            let report = startup_failure_report(&config, &options, e.to_string());
            output::print_report(&report);
            return Ok(report.exit_code());
        }
    };

    let report = controller.run().await;
    if !cli.quiet {
        output::print_report(&report);
    }
    Ok(report.exit_code())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("lbry_harvest=info,warn"),
            1 => EnvFilter::new("lbry_harvest=debug,info"),
            2 => EnvFilter::new("lbry_harvest=trace,debug"),
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

/// Cancels the run on the first Ctrl-C
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight work");
            cancel.cancel();
        }
    });
}

/// Handles the --stats mode: shows catalog statistics
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let path = Path::new(&config.output.database_path);
    if !path.exists() {
        anyhow::bail!("No catalog at {}", path.display());
    }

    let catalog = open_catalog(path, false)
        .with_context(|| format!("Failed to open catalog {}", path.display()))?;
    let stats = catalog.with(|store| output::load_statistics(&*store))?;
    output::print_statistics(&stats);
    Ok(())
}

/// Report for a run that could not even open its catalog
fn startup_failure_report(config: &Config, options: &RunOptions, error: String) -> RunReport {
    let page_range = options.stages.runs_crawl().then_some(PageRange {
        start: config.crawler.start_page,
        end: config.crawler.end_page,
    });
    let mut report = RunReport::new(options.stages.names(), page_range, config.crawler.fast);
    report.fatal_error = Some(error);

    if let Some(path) = &options.report_path {
        if let Err(e) = report.write_json(path) {
            tracing::error!("Failed to write report to {}: {}", path.display(), e);
        }
    }
    report
}
