//! Storage module for the durable catalog
//!
//! This module handles all database operations for the pipeline, including:
//! - SQLite database initialization and schema management
//! - Catalog entry persistence with compare-and-set status transitions
//! - Crawl cursor and failed index page bookkeeping
//! - Run tracking for audit and resumption

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteCatalog;
pub use traits::{CatalogStore, StoreError, StoreResult};

use crate::state::EntryStatus;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Maximum stored length of an error message
pub const MAX_ERROR_LEN: usize = 500;

/// Opens an existing catalog or creates one at `path`
///
/// With `fresh` set, any existing database at `path` is removed first.
pub fn open_catalog(path: &Path, fresh: bool) -> StoreResult<CatalogHandle> {
    let store = if fresh {
        SqliteCatalog::create_fresh(path)?
    } else {
        SqliteCatalog::open(path)?
    };
    Ok(CatalogHandle::new(store))
}

/// Current time in the catalog's timestamp format
///
/// Fixed-width RFC 3339 in UTC, so the text form sorts chronologically.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Truncates an error message to [`MAX_ERROR_LEN`] characters
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_LEN) {
        Some((idx, _)) => format!("{}…", &message[..idx]),
        None => message.to_string(),
    }
}

/// One discovered post and its processing state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub post_url: String,
    pub page: Option<u32>,
    pub title: Option<String>,
    /// Description text from the post page
    pub description: Option<String>,
    pub external_url: Option<String>,
    pub resolved_id: Option<String>,
    pub status: EntryStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub download_path: Option<String>,
    pub discovered_at: String,
    pub updated_at: String,
}

impl CatalogEntry {
    fn with_status(post_url: impl Into<String>, page: Option<u32>, status: EntryStatus) -> Self {
        let now = now_timestamp();
        Self {
            post_url: post_url.into(),
            page,
            title: None,
            description: None,
            external_url: None,
            resolved_id: None,
            status,
            attempt_count: 0,
            last_error: None,
            download_path: None,
            discovered_at: now.clone(),
            updated_at: now,
        }
    }

    /// A freshly crawled post with its hosting link, if it has one
    pub fn discovered(
        post_url: impl Into<String>,
        page: Option<u32>,
        external_url: Option<String>,
    ) -> Self {
        Self {
            external_url,
            ..Self::with_status(post_url, page, EntryStatus::Discovered)
        }
    }

    /// A post whose fetch or parse failed
    pub fn failed(post_url: impl Into<String>, page: Option<u32>, error: &str) -> Self {
        Self {
            last_error: Some(truncate_error(error)),
            ..Self::with_status(post_url, page, EntryStatus::Failed)
        }
    }

    /// A post that will never be processed
    pub fn skipped(post_url: impl Into<String>, page: Option<u32>, reason: &str) -> Self {
        Self {
            last_error: Some(truncate_error(reason)),
            ..Self::with_status(post_url, page, EntryStatus::Skipped)
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Checks the `resolved_id` ⇔ status invariant
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.post_url.is_empty() {
            return Err("post_url cannot be empty".to_string());
        }

        match (self.status.requires_resolved_id(), self.resolved_id.is_some()) {
            (true, false) => Err(format!(
                "entry {} in status {} has no resolved_id",
                self.post_url, self.status
            )),
            (false, true) => Err(format!(
                "entry {} in status {} must not carry a resolved_id",
                self.post_url, self.status
            )),
            _ => Ok(()),
        }
    }
}

/// An index page whose fetch exhausted its retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPage {
    pub page: u32,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    pub updated_at: String,
}

/// Represents a pipeline run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stage: String,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Shared handle to the catalog store
///
/// Every component that proposes state changes holds a clone of this handle.
/// Each call runs one store operation under the lock; the lock is never held
/// across an await point.
#[derive(Clone)]
pub struct CatalogHandle {
    inner: Arc<Mutex<Box<dyn CatalogStore + Send>>>,
}

impl CatalogHandle {
    pub fn new<S: CatalogStore + Send + 'static>(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    /// Runs `f` against the store
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut (dyn CatalogStore + Send)) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        f(guard.as_mut())
    }
}
