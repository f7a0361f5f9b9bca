//! Pipeline controller - stage selection and run bookkeeping
//!
//! The controller owns the catalog handle, the page source and (for Stage2)
//! the daemon handle. It runs the selected stages in order, records the run in
//! the catalog and always produces a [`RunReport`], even when a stage aborts.

use crate::config::{compute_config_hash, validate, Config};
use crate::crawler::{HttpSource, PageSource, PageWalker};
use crate::daemon::{ContentDaemon, DaemonError, LbrynetClient};
use crate::downloader::DownloadOrchestrator;
use crate::output::{PageRange, RunReport};
use crate::resolver::LinkResolver;
use crate::retry::RetryPolicy;
use crate::storage::{open_catalog, CatalogHandle, RunStatus};
use crate::HarvestError;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Which stages a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageSelection {
    /// Stage1: walk the index and build the catalog
    CrawlOnly,
    /// Stage2: resolve and download catalogued links
    DownloadOnly,
    Both,
}

impl StageSelection {
    /// Stage1 only with `-x`, Stage2 only with `-s`, otherwise both
    pub fn from_flags(crawl: bool, download: bool) -> Self {
        match (crawl, download) {
            (true, false) => Self::CrawlOnly,
            (false, true) => Self::DownloadOnly,
            _ => Self::Both,
        }
    }

    pub fn runs_crawl(&self) -> bool {
        matches!(self, Self::CrawlOnly | Self::Both)
    }

    pub fn runs_download(&self) -> bool {
        matches!(self, Self::DownloadOnly | Self::Both)
    }

    /// Label stored on the run record
    pub fn label(&self) -> &'static str {
        match self {
            Self::CrawlOnly => "crawl",
            Self::DownloadOnly => "download",
            Self::Both => "crawl+download",
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.runs_crawl() {
            names.push("crawl".to_string());
        }
        if self.runs_download() {
            names.push("download".to_string());
        }
        names
    }
}

/// Per-invocation options that do not live in the configuration file
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub stages: StageSelection,
    /// Stage2 only handles posts discovered on these pages
    pub download_pages: Option<RangeInclusive<u32>>,
    pub report_path: Option<PathBuf>,
    pub fresh: bool,
}

impl RunOptions {
    pub fn new(stages: StageSelection) -> Self {
        Self {
            stages,
            download_pages: None,
            report_path: None,
            fresh: false,
        }
    }
}

/// Runs the selected stages against one catalog
pub struct PipelineController {
    config: Config,
    options: RunOptions,
    catalog: CatalogHandle,
    source: Arc<dyn PageSource>,
    daemon: Option<Arc<dyn ContentDaemon>>,
    cancel: CancellationToken,
}

impl PipelineController {
    /// Validates `config`, opens the catalog and builds the HTTP page source
    ///
    /// The daemon client is created when Stage2 starts.
    pub fn from_config(
        config: Config,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<Self, HarvestError> {
        validate(&config)?;

        let catalog = open_catalog(Path::new(&config.output.database_path), options.fresh)?;
        if options.fresh {
            tracing::info!("Starting from an empty catalog");
        }
        let source = HttpSource::from_config(&config.user_agent, &config.crawler)?;

        Ok(Self {
            config,
            options,
            catalog,
            source: Arc::new(source),
            daemon: None,
            cancel,
        })
    }

    /// Builds a controller around existing collaborators
    pub fn new(
        config: Config,
        options: RunOptions,
        catalog: CatalogHandle,
        source: Arc<dyn PageSource>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            options,
            catalog,
            source,
            daemon: None,
            cancel,
        }
    }

    /// Uses `daemon` for Stage2 instead of connecting to `lbrynet`
    pub fn with_daemon(mut self, daemon: Arc<dyn ContentDaemon>) -> Self {
        self.daemon = Some(daemon);
        self
    }

    pub fn catalog(&self) -> &CatalogHandle {
        &self.catalog
    }

    fn page_range(&self) -> Option<PageRange> {
        if self.options.stages.runs_crawl() {
            Some(PageRange {
                start: self.config.crawler.start_page,
                end: self.config.crawler.end_page,
            })
        } else {
            self.options.download_pages.as_ref().map(|r| PageRange {
                start: *r.start(),
                end: *r.end(),
            })
        }
    }

    /// Runs the selected stages and returns the finalized report
    ///
    /// Stage errors are recorded on the report rather than returned; use
    /// [`RunReport::exit_code`] to decide the process status.
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let stages = self.options.stages;
        let mut report = RunReport::new(stages.names(), self.page_range(), self.config.crawler.fast);

        tracing::info!("Starting {} run", stages.label());

        let result = self.start_run(&mut report).await;
        if let Err(e) = &result {
            tracing::error!("Run aborted: {}", e);
            report.fatal_error = Some(e.to_string());
        }

        report.interrupted = self.cancel.is_cancelled();
        report.elapsed_secs = started.elapsed().as_secs_f64();

        if let Some(run_id) = report.run_id {
            let status = if report.fatal_error.is_some() {
                RunStatus::Failed
            } else if report.interrupted {
                RunStatus::Interrupted
            } else {
                RunStatus::Completed
            };
            if let Err(e) = self.catalog.with(|c| c.finish_run(run_id, status)) {
                tracing::warn!("Could not close run record {}: {}", run_id, e);
            }
        }

        if let Err(e) = report.finalize(&self.catalog, self.options.report_path.is_some()) {
            tracing::warn!("Could not read final catalog counts: {}", e);
        }

        if let Some(path) = &self.options.report_path {
            if let Err(e) = report.write_json(path) {
                tracing::error!("Failed to write report to {}: {}", path.display(), e);
            }
        }

        report
    }

    async fn start_run(&self, report: &mut RunReport) -> Result<(), HarvestError> {
        let config_hash = compute_config_hash(&self.config)?;
        let run_id = self
            .catalog
            .with(|c| c.create_run(self.options.stages.label(), &config_hash))?;
        report.run_id = Some(run_id);

        if self.options.stages.runs_crawl() {
            self.run_crawl(report).await?;
        }

        if self.options.stages.runs_download() && !self.cancel.is_cancelled() {
            self.run_download(report).await?;
        }

        Ok(())
    }

    async fn run_crawl(&self, report: &mut RunReport) -> Result<(), HarvestError> {
        let started = Instant::now();
        let crawler = &self.config.crawler;
        tracing::info!(
            "Stage1: walking pages {}-{} ({} mode)",
            crawler.start_page,
            crawler.end_page,
            if crawler.fast { "fast" } else { "normal" }
        );

        let walker = PageWalker::new(
            &self.config,
            self.catalog.clone(),
            self.source.clone(),
            self.cancel.clone(),
        )?;
        let summary = walker
            .walk(
                crawler.start_page,
                crawler.end_page,
                crawler.effective_concurrency(),
            )
            .await;

        report.crawl_secs = Some(started.elapsed().as_secs_f64());
        report.walk = Some(summary?);
        Ok(())
    }

    async fn run_download(&self, report: &mut RunReport) -> Result<(), HarvestError> {
        let started = Instant::now();
        let daemon = self.open_daemon().await?;
        let retry = RetryPolicy::from(&self.config.retry);
        let pages = self.options.download_pages.clone();

        if let Some(range) = &pages {
            tracing::info!("Stage2: limited to posts from pages {}-{}", range.start(), range.end());
        }

        let resolver = LinkResolver::new(
            self.catalog.clone(),
            daemon.clone(),
            retry.clone(),
            self.cancel.clone(),
        )
        .with_pages(pages.clone());
        let resolved = resolver.run(self.config.daemon.resolve_concurrency).await;
        report.download_secs = Some(started.elapsed().as_secs_f64());
        report.resolve = Some(resolved?);

        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let orchestrator = DownloadOrchestrator::new(
            self.catalog.clone(),
            daemon,
            &self.config.daemon,
            retry,
            self.cancel.clone(),
        )
        .with_pages(pages);
        let downloaded = orchestrator
            .run(
                self.config.daemon.concurrency,
                Path::new(&self.config.daemon.download_dir),
            )
            .await;
        report.download_secs = Some(started.elapsed().as_secs_f64());
        report.download = Some(downloaded?);
        Ok(())
    }

    /// Returns the daemon handle after probing it with `status`
    async fn open_daemon(&self) -> Result<Arc<dyn ContentDaemon>, HarvestError> {
        let daemon: Arc<dyn ContentDaemon> = match &self.daemon {
            Some(daemon) => daemon.clone(),
            None => Arc::new(LbrynetClient::from_config(&self.config.daemon)?),
        };

        match daemon.status().await {
            Ok(status) if !status.is_running => {
                tracing::warn!("lbrynet daemon reports it is still starting up")
            }
            Ok(_) => tracing::debug!("lbrynet daemon is up"),
            Err(e @ DaemonError::Unreachable { .. }) => {
                tracing::error!(
                    "Cannot connect to lbrynet daemon. Please run `lbrynet start` before Stage2."
                );
                return Err(e.into());
            }
            Err(e) => tracing::warn!("lbrynet status probe failed: {}", e),
        }

        Ok(daemon)
    }
}
