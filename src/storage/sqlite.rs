//! SQLite catalog implementation
//!
//! This module provides a SQLite-based implementation of the CatalogStore trait.

use crate::state::{CrawlCursor, EntryStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CatalogStore, StoreError, StoreResult};
use crate::storage::{
    now_timestamp, truncate_error, CatalogEntry, FailedPage, RunRecord, RunStatus,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a writer waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ENTRY_COLUMNS: &str = "post_url, page, title, external_url, resolved_id, status, \
     attempt_count, last_error, download_path, discovered_at, updated_at, description";

/// SQLite catalog backend
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// Opens the catalog at `path`, creating it if it does not exist
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteCatalog)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database or schema is incompatible
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Removes any database at `path` (and its WAL sidecars) and opens a new one
    pub fn create_fresh(path: &Path) -> StoreResult<Self> {
        for file in [
            path.to_path_buf(),
            sidecar(path, "-wal"),
            sidecar(path, "-shm"),
        ] {
            match std::fs::remove_file(&file) {
                Ok(()) => tracing::debug!("Removed {}", file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Self::open(path)
    }

    /// Creates an in-memory catalog
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Applies a compare-and-set status change inside one transaction
    ///
    /// Diversions clear `resolved_id`. The optional values only overwrite
    /// their columns when present.
    fn transition(
        &mut self,
        post_url: &str,
        to: EntryStatus,
        resolved_id: Option<&str>,
        error: Option<&str>,
        download_path: Option<&str>,
    ) -> StoreResult<CatalogEntry> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = fetch_entry(&tx, post_url)?
            .ok_or_else(|| StoreError::NotFound(post_url.to_string()))?;

        if !current.status.can_transition_to(to) {
            return Err(StoreError::StaleTransition {
                post_url: post_url.to_string(),
                from: current.status,
                to,
            });
        }

        let error = error.map(truncate_error);
        let updated = tx.execute(
            "UPDATE entries SET
                status = ?1,
                resolved_id = CASE WHEN ?1 IN ('failed', 'skipped') THEN NULL
                                   ELSE COALESCE(?2, resolved_id) END,
                last_error = COALESCE(?3, last_error),
                download_path = COALESCE(?4, download_path),
                updated_at = ?5
             WHERE post_url = ?6 AND status = ?7",
            params![
                to.to_db_string(),
                resolved_id,
                error,
                download_path,
                now_timestamp(),
                post_url,
                current.status.to_db_string(),
            ],
        )?;

        if updated != 1 {
            return Err(StoreError::StaleTransition {
                post_url: post_url.to_string(),
                from: current.status,
                to,
            });
        }

        let entry = fetch_entry(&tx, post_url)?
            .ok_or_else(|| StoreError::NotFound(post_url.to_string()))?;
        tx.commit()?;

        tracing::debug!("{}: {} -> {}", post_url, current.status, to);
        Ok(entry)
    }

    fn query_entries(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<CatalogEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let status_text: String = row.get(5)?;
    let status = EntryStatus::from_db_string(&status_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("unknown entry status '{}'", status_text).into(),
        )
    })?;

    Ok(CatalogEntry {
        post_url: row.get(0)?,
        page: row.get(1)?,
        title: row.get(2)?,
        external_url: row.get(3)?,
        resolved_id: row.get(4)?,
        status,
        attempt_count: row.get(6)?,
        last_error: row.get(7)?,
        download_path: row.get(8)?,
        discovered_at: row.get(9)?,
        updated_at: row.get(10)?,
        description: row.get(11)?,
    })
}

fn fetch_entry(conn: &Connection, post_url: &str) -> rusqlite::Result<Option<CatalogEntry>> {
    conn.query_row(
        &format!("SELECT {} FROM entries WHERE post_url = ?1", ENTRY_COLUMNS),
        params![post_url],
        entry_from_row,
    )
    .optional()
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        stage: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
            .unwrap_or(RunStatus::Running),
    })
}

/// Combines an incoming entry with the stored row for the same post
///
/// Returns None when the merge changes nothing.
fn merge_entry(existing: &CatalogEntry, incoming: &CatalogEntry) -> Option<CatalogEntry> {
    let mut merged = existing.clone();
    merged.page = existing.page.or(incoming.page);
    merged.title = existing.title.clone().or_else(|| incoming.title.clone());
    merged.description = existing
        .description
        .clone()
        .or_else(|| incoming.description.clone());
    merged.external_url = existing
        .external_url
        .clone()
        .or_else(|| incoming.external_url.clone());

    if incoming.status.is_forward_of(existing.status) {
        merged.status = incoming.status;
        merged.resolved_id = incoming
            .resolved_id
            .clone()
            .or_else(|| existing.resolved_id.clone());
        merged.download_path = incoming
            .download_path
            .clone()
            .or_else(|| existing.download_path.clone());
        merged.last_error = incoming
            .last_error
            .clone()
            .or_else(|| existing.last_error.clone());
    }

    (merged != *existing).then_some(merged)
}

impl CatalogStore for SqliteCatalog {
    // ===== Entries =====

    fn upsert(&mut self, entry: &CatalogEntry) -> StoreResult<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = match fetch_entry(&tx, &entry.post_url)? {
            None => {
                entry.check_invariants().map_err(StoreError::InvalidEntry)?;
                tx.execute(
                    &format!(
                        "INSERT INTO entries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                        ENTRY_COLUMNS
                    ),
                    params![
                        entry.post_url,
                        entry.page,
                        entry.title,
                        entry.external_url,
                        entry.resolved_id,
                        entry.status.to_db_string(),
                        entry.attempt_count,
                        entry.last_error.as_deref().map(truncate_error),
                        entry.download_path,
                        entry.discovered_at,
                        entry.updated_at,
                        entry.description,
                    ],
                )?;
                true
            }
            Some(existing) => {
                if let Some(merged) = merge_entry(&existing, entry) {
                    merged.check_invariants().map_err(StoreError::InvalidEntry)?;
                    tx.execute(
                        "UPDATE entries SET page = ?1, title = ?2, external_url = ?3,
                            resolved_id = ?4, status = ?5, last_error = ?6,
                            download_path = ?7, updated_at = ?8, description = ?9
                         WHERE post_url = ?10",
                        params![
                            merged.page,
                            merged.title,
                            merged.external_url,
                            merged.resolved_id,
                            merged.status.to_db_string(),
                            merged.last_error.as_deref().map(truncate_error),
                            merged.download_path,
                            now_timestamp(),
                            merged.description,
                            merged.post_url,
                        ],
                    )?;
                }
                false
            }
        };

        tx.commit()?;
        Ok(inserted)
    }

    fn get(&self, post_url: &str) -> StoreResult<Option<CatalogEntry>> {
        Ok(fetch_entry(&self.conn, post_url)?)
    }

    fn next_pending_in(
        &self,
        status: EntryStatus,
        limit: usize,
        pages: Option<&RangeInclusive<u32>>,
    ) -> StoreResult<Vec<CatalogEntry>> {
        let (first, last) = match pages {
            Some(range) => (Some(*range.start()), Some(*range.end())),
            None => (None, None),
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.query_entries(
            &format!(
                "SELECT {} FROM entries
                 WHERE status = ?1 AND (?2 IS NULL OR page BETWEEN ?2 AND ?3)
                 ORDER BY updated_at ASC, id ASC
                 LIMIT ?4",
                ENTRY_COLUMNS
            ),
            params![status.to_db_string(), first, last, limit],
        )
    }

    fn mark(
        &mut self,
        post_url: &str,
        new_status: EntryStatus,
        error: Option<&str>,
    ) -> StoreResult<CatalogEntry> {
        if new_status == EntryStatus::Resolved {
            return Err(StoreError::InvalidEntry(format!(
                "{}: moving to {} requires a resolved_id",
                post_url, new_status
            )));
        }
        self.transition(post_url, new_status, None, error, None)
    }

    fn mark_resolved(&mut self, post_url: &str, resolved_id: &str) -> StoreResult<CatalogEntry> {
        if resolved_id.is_empty() {
            return Err(StoreError::InvalidEntry(format!(
                "{}: empty resolved_id",
                post_url
            )));
        }
        self.transition(
            post_url,
            EntryStatus::Resolved,
            Some(resolved_id),
            None,
            None,
        )
    }

    fn mark_downloaded(
        &mut self,
        post_url: &str,
        download_path: Option<&str>,
    ) -> StoreResult<CatalogEntry> {
        self.transition(post_url, EntryStatus::Downloaded, None, None, download_path)
    }

    fn record_attempt(&mut self, post_url: &str, error: &str) -> StoreResult<CatalogEntry> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = fetch_entry(&tx, post_url)?
            .ok_or_else(|| StoreError::NotFound(post_url.to_string()))?;
        if current.status.is_terminal() {
            return Err(StoreError::StaleTransition {
                post_url: post_url.to_string(),
                from: current.status,
                to: current.status,
            });
        }

        tx.execute(
            "UPDATE entries SET attempt_count = attempt_count + 1, last_error = ?1, updated_at = ?2
             WHERE post_url = ?3",
            params![truncate_error(error), now_timestamp(), post_url],
        )?;

        let entry = fetch_entry(&tx, post_url)?
            .ok_or_else(|| StoreError::NotFound(post_url.to_string()))?;
        tx.commit()?;
        Ok(entry)
    }

    // ===== Statistics =====

    fn count_by_status(&self) -> StoreResult<BTreeMap<EntryStatus, u64>> {
        let mut counts: BTreeMap<EntryStatus, u64> = EntryStatus::all_states()
            .into_iter()
            .map(|status| (status, 0))
            .collect();

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM entries GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status_text, count) = row?;
            if let Some(status) = EntryStatus::from_db_string(&status_text) {
                counts.insert(status, count as u64);
            }
        }

        Ok(counts)
    }

    fn count_total(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn failed_entries(&self) -> StoreResult<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM entries WHERE status = ?1 ORDER BY updated_at ASC, id ASC",
                ENTRY_COLUMNS
            ),
            params![EntryStatus::Failed.to_db_string()],
        )
    }

    fn all_entries(&self) -> StoreResult<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM entries ORDER BY page IS NULL, page ASC, id ASC",
                ENTRY_COLUMNS
            ),
            [],
        )
    }

    // ===== Crawl Cursor =====

    fn load_cursor(&self) -> StoreResult<Option<CrawlCursor>> {
        let cursor = self
            .conn
            .query_row(
                "SELECT start_page, end_page, last_completed FROM crawl_cursor WHERE id = 1",
                [],
                |row| {
                    Ok(CrawlCursor {
                        start_page: row.get(0)?,
                        end_page: row.get(1)?,
                        last_completed: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(cursor)
    }

    fn save_cursor(&mut self, cursor: &CrawlCursor) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO crawl_cursor (id, start_page, end_page, last_completed, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                start_page = excluded.start_page,
                end_page = excluded.end_page,
                last_completed = excluded.last_completed,
                updated_at = excluded.updated_at",
            params![
                cursor.start_page,
                cursor.end_page,
                cursor.last_completed,
                now_timestamp()
            ],
        )?;
        Ok(())
    }

    // ===== Failed Index Pages =====

    fn record_failed_page(&mut self, page: u32, error: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO failed_pages (page, last_error, attempt_count, updated_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(page) DO UPDATE SET
                last_error = excluded.last_error,
                attempt_count = attempt_count + 1,
                updated_at = excluded.updated_at",
            params![page, truncate_error(error), now_timestamp()],
        )?;
        Ok(())
    }

    fn clear_failed_page(&mut self, page: u32) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM failed_pages WHERE page = ?1", params![page])?;
        Ok(())
    }

    fn failed_pages(&self) -> StoreResult<Vec<FailedPage>> {
        let mut stmt = self.conn.prepare(
            "SELECT page, last_error, attempt_count, updated_at FROM failed_pages ORDER BY page ASC",
        )?;
        let pages = stmt
            .query_map([], |row| {
                Ok(FailedPage {
                    page: row.get(0)?,
                    last_error: row.get(1)?,
                    attempt_count: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    // ===== Run Management =====

    fn create_run(&mut self, stage: &str, config_hash: &str) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (started_at, stage, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                now_timestamp(),
                stage,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StoreResult<()> {
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now_timestamp(), run_id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("run {}", run_id)));
        }
        Ok(())
    }

    fn get_latest_run(&self) -> StoreResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, stage, config_hash, status
                 FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }
}
