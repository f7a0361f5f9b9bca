//! Run report
//!
//! A [`RunReport`] is created when the controller starts, filled in as each
//! stage finishes and finalized from the catalog at the end. It is printed to
//! the console and, when a report path is configured, written as JSON.

use crate::crawler::WalkSummary;
use crate::downloader::DownloadSummary;
use crate::resolver::ResolveSummary;
use crate::state::EntryStatus;
use crate::storage::{now_timestamp, CatalogEntry, CatalogHandle, FailedPage, StoreResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Exit status for a run that completed, possibly with per-item failures
pub const EXIT_OK: u8 = 0;
/// Exit status for a run that hit a fatal condition
pub const EXIT_FATAL: u8 = 1;
/// Exit status for a run stopped by Ctrl-C
pub const EXIT_INTERRUPTED: u8 = 130;

/// Inclusive page bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

/// A Failed entry as listed in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEntry {
    pub post_url: String,
    pub page: Option<u32>,
    pub external_url: Option<String>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl From<&CatalogEntry> for FailedEntry {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            post_url: entry.post_url.clone(),
            page: entry.page,
            external_url: entry.external_url.clone(),
            attempt_count: entry.attempt_count,
            last_error: entry.last_error.clone(),
        }
    }
}

/// Summary of one controller invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub run_id: Option<i64>,
    pub stages: Vec<String>,
    pub page_range: Option<PageRange>,
    pub fast_mode: bool,
    pub elapsed_secs: f64,
    pub crawl_secs: Option<f64>,
    pub download_secs: Option<f64>,

    pub walk: Option<WalkSummary>,
    pub resolve: Option<ResolveSummary>,
    pub download: Option<DownloadSummary>,

    pub total_entries: u64,
    pub status_counts: BTreeMap<EntryStatus, u64>,
    pub failed_entries: Vec<FailedEntry>,
    pub failed_pages: Vec<FailedPage>,

    pub fatal_error: Option<String>,
    pub interrupted: bool,

    /// Every catalog entry; only filled for the JSON export
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<CatalogEntry>,
}

impl RunReport {
    pub fn new(stages: Vec<String>, page_range: Option<PageRange>, fast_mode: bool) -> Self {
        Self {
            started_at: now_timestamp(),
            finished_at: None,
            run_id: None,
            stages,
            page_range,
            fast_mode,
            elapsed_secs: 0.0,
            crawl_secs: None,
            download_secs: None,
            walk: None,
            resolve: None,
            download: None,
            total_entries: 0,
            status_counts: BTreeMap::new(),
            failed_entries: Vec::new(),
            failed_pages: Vec::new(),
            fatal_error: None,
            interrupted: false,
            entries: Vec::new(),
        }
    }

    /// Fills the catalog-derived fields
    ///
    /// With `include_entries` every catalog row is embedded for export.
    pub fn finalize(&mut self, catalog: &CatalogHandle, include_entries: bool) -> StoreResult<()> {
        catalog.with(|c| {
            self.status_counts = c.count_by_status()?;
            self.total_entries = c.count_total()?;
            self.failed_entries = c.failed_entries()?.iter().map(FailedEntry::from).collect();
            self.failed_pages = c.failed_pages()?;
            if include_entries {
                self.entries = c.all_entries()?;
            }
            Ok(())
        })?;
        self.finished_at = Some(now_timestamp());
        Ok(())
    }

    pub fn count(&self, status: EntryStatus) -> u64 {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }

    pub fn downloaded(&self) -> u64 {
        self.count(EntryStatus::Downloaded)
    }

    pub fn failed(&self) -> u64 {
        self.count(EntryStatus::Failed)
    }

    pub fn skipped(&self) -> u64 {
        self.count(EntryStatus::Skipped)
    }

    /// Process exit status for this run
    ///
    /// Per-item failures are partial success. A fatal error wins over an
    /// interruption.
    pub fn exit_code(&self) -> u8 {
        if self.fatal_error.is_some() {
            EXIT_FATAL
        } else if self.interrupted {
            EXIT_INTERRUPTED
        } else {
            EXIT_OK
        }
    }

    /// Writes the report as pretty-printed JSON, creating parent directories
    pub fn write_json(&self, path: &Path) -> Result<(), crate::HarvestError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        tracing::info!("Report written to {}", path.display());
        Ok(())
    }
}
