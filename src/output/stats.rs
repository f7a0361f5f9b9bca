//! Statistics generation from the catalog database
//!
//! This module provides functionality for extracting and displaying
//! catalog statistics (`--stats`) and the end-of-run summary.

use crate::output::report::RunReport;
use crate::state::{CrawlCursor, EntryStatus};
use crate::storage::{CatalogStore, RunRecord, StoreResult};
use std::collections::BTreeMap;

/// Catalog statistics summary
#[derive(Debug, Clone)]
pub struct CatalogStatistics {
    /// Total number of catalog entries
    pub total_entries: u64,

    /// Count of entries by status
    pub entries_by_status: BTreeMap<EntryStatus, u64>,

    /// Entries whose post embeds a hosting link
    pub with_link: u64,

    /// Index pages whose fetch exhausted its retries
    pub failed_pages: Vec<u32>,

    pub cursor: Option<CrawlCursor>,

    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from the store
pub fn load_statistics(store: &dyn CatalogStore) -> StoreResult<CatalogStatistics> {
    let entries = store.all_entries()?;

    Ok(CatalogStatistics {
        total_entries: store.count_total()?,
        entries_by_status: store.count_by_status()?,
        with_link: entries.iter().filter(|e| e.external_url.is_some()).count() as u64,
        failed_pages: store.failed_pages()?.into_iter().map(|f| f.page).collect(),
        cursor: store.load_cursor()?,
        latest_run: store.get_latest_run()?,
    })
}

fn percentage(count: u64, total: u64) -> f64 {
    if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CatalogStatistics) {
    println!("=== Catalog Statistics ===\n");

    println!("Overview:");
    println!("  Total entries: {}", stats.total_entries);
    println!(
        "  With hosting link: {} ({:.1}%)",
        stats.with_link,
        percentage(stats.with_link, stats.total_entries)
    );
    if let Some(cursor) = &stats.cursor {
        match cursor.last_completed {
            Some(last) => println!(
                "  Crawl cursor: page {} of {}-{}",
                last, cursor.start_page, cursor.end_page
            ),
            None => println!("  Crawl cursor: not started"),
        }
    }
    println!();

    println!("Entries by Status:");
    for (status, count) in &stats.entries_by_status {
        println!(
            "  {}: {} ({:.1}%)",
            status,
            count,
            percentage(*count, stats.total_entries)
        );
    }
    println!();

    if !stats.failed_pages.is_empty() {
        println!("Failed Index Pages ({}):", stats.failed_pages.len());
        let pages: Vec<String> = stats.failed_pages.iter().map(u32::to_string).collect();
        println!("  {}", pages.join(", "));
        println!();
    }

    if let Some(run) = &stats.latest_run {
        println!(
            "Latest Run: #{} {} ({}), started {}",
            run.id,
            run.stage,
            run.status.to_db_string(),
            run.started_at
        );
    }
}

/// Prints the end-of-run summary
pub fn print_report(report: &RunReport) {
    println!("\n=== Run Summary ===\n");
    println!("  Stages: {}", report.stages.join(", "));
    if let Some(range) = &report.page_range {
        println!("  Pages: {}-{}", range.start, range.end);
    }
    println!("  Elapsed: {:.1}s", report.elapsed_secs);

    if let Some(walk) = &report.walk {
        println!(
            "  Crawl: {} pages walked, {} failed, {} posts ({} new, {} links)",
            walk.pages_walked, walk.pages_failed, walk.posts_seen, walk.posts_new, walk.links_found
        );
    }
    if let Some(resolve) = &report.resolve {
        println!(
            "  Resolve: {} resolved, {} skipped, {} failed",
            resolve.resolved, resolve.skipped, resolve.failed
        );
    }
    if let Some(download) = &report.download {
        println!(
            "  Download: {} started, {} downloaded, {} failed",
            download.started, download.downloaded, download.failed
        );
    }
    println!();

    println!("Catalog ({} entries):", report.total_entries);
    for (status, count) in &report.status_counts {
        if *count > 0 {
            println!("  {}: {}", status, count);
        }
    }

    if !report.failed_entries.is_empty() {
        println!("\nFailed entries ({}):", report.failed_entries.len());
        for entry in report.failed_entries.iter().take(20) {
            println!(
                "  - {} ({})",
                entry.post_url,
                entry.last_error.as_deref().unwrap_or("unknown error")
            );
        }
        if report.failed_entries.len() > 20 {
            println!("  ... and {} more", report.failed_entries.len() - 20);
        }
    }

    if let Some(error) = &report.fatal_error {
        println!("\nFatal: {}", error);
    } else if report.interrupted {
        println!("\nInterrupted; rerun with the same --db to resume.");
    }
}
