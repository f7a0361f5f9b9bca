//! Storage traits and error types
//!
//! This module defines the trait interface for catalog backends and
//! associated error types.

use crate::state::{CrawlCursor, EntryStatus};
use crate::storage::{CatalogEntry, FailedPage, RunRecord, RunStatus};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Stale transition for {post_url}: {from} -> {to} is not permitted")]
    StaleTransition {
        post_url: String,
        from: EntryStatus,
        to: EntryStatus,
    },

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Catalog schema version {found} is newer than supported version {supported}")]
    IncompatibleSchema { found: u32, supported: u32 },

    #[error("Catalog lock poisoned by a panicked writer")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Trait for catalog backend implementations
///
/// Every write is transactional. Status changes go through compare-and-set
/// methods that reject moves the current status does not permit.
pub trait CatalogStore {
    // ===== Entries =====

    /// Inserts an entry or merges it into the existing row for its `post_url`
    ///
    /// Merging fills absent fields and adopts the incoming status only when it
    /// is a forward advance on the main chain; it never regresses status and
    /// never touches `attempt_count`.
    ///
    /// # Returns
    ///
    /// `true` if a new row was inserted
    fn upsert(&mut self, entry: &CatalogEntry) -> StoreResult<bool>;

    /// Gets an entry by its post URL
    fn get(&self, post_url: &str) -> StoreResult<Option<CatalogEntry>>;

    /// Returns up to `limit` entries in `status`, oldest `updated_at` first
    fn next_pending(&self, status: EntryStatus, limit: usize) -> StoreResult<Vec<CatalogEntry>> {
        self.next_pending_in(status, limit, None)
    }

    /// Like [`CatalogStore::next_pending`], restricted to posts discovered on `pages`
    fn next_pending_in(
        &self,
        status: EntryStatus,
        limit: usize,
        pages: Option<&RangeInclusive<u32>>,
    ) -> StoreResult<Vec<CatalogEntry>>;

    /// Compare-and-set status transition
    ///
    /// Fails with `StaleTransition` if the current status does not permit the
    /// move. Moving into Resolved requires [`CatalogStore::mark_resolved`].
    fn mark(
        &mut self,
        post_url: &str,
        new_status: EntryStatus,
        error: Option<&str>,
    ) -> StoreResult<CatalogEntry>;

    /// Transition Discovered → Resolved, storing the identifier
    fn mark_resolved(&mut self, post_url: &str, resolved_id: &str) -> StoreResult<CatalogEntry>;

    /// Transition Downloading → Downloaded, storing the daemon's output path
    fn mark_downloaded(
        &mut self,
        post_url: &str,
        download_path: Option<&str>,
    ) -> StoreResult<CatalogEntry>;

    /// Records a failed attempt that will be retried
    ///
    /// Increments `attempt_count` and stores `error` without changing status.
    fn record_attempt(&mut self, post_url: &str, error: &str) -> StoreResult<CatalogEntry>;

    // ===== Statistics =====

    /// Counts entries per status (every status present, zero when empty)
    fn count_by_status(&self) -> StoreResult<BTreeMap<EntryStatus, u64>>;

    /// Gets total entry count
    fn count_total(&self) -> StoreResult<u64>;

    /// All entries in status Failed, oldest first
    fn failed_entries(&self) -> StoreResult<Vec<CatalogEntry>>;

    /// Every entry, ordered by page then insertion order
    fn all_entries(&self) -> StoreResult<Vec<CatalogEntry>>;

    // ===== Crawl Cursor =====

    fn load_cursor(&self) -> StoreResult<Option<CrawlCursor>>;

    fn save_cursor(&mut self, cursor: &CrawlCursor) -> StoreResult<()>;

    // ===== Failed Index Pages =====

    /// Records (or re-records) an index page whose fetch failed
    fn record_failed_page(&mut self, page: u32, error: &str) -> StoreResult<()>;

    /// Removes a failed page record after a successful fetch
    fn clear_failed_page(&mut self, page: u32) -> StoreResult<()>;

    /// All recorded failed pages in ascending order
    fn failed_pages(&self) -> StoreResult<Vec<FailedPage>>;

    // ===== Run Management =====

    /// Creates a new run record and returns its ID
    fn create_run(&mut self, stage: &str, config_hash: &str) -> StoreResult<i64>;

    /// Sets the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StoreResult<()>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StoreResult<Option<RunRecord>>;
}
