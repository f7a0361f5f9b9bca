//! Integration tests for the download orchestrator

use crate::support::*;
use lbry_harvest::daemon::ContentDaemon;
use lbry_harvest::downloader::DownloadOrchestrator;
use lbry_harvest::retry::RetryPolicy;
use lbry_harvest::state::EntryStatus;
use lbry_harvest::storage::CatalogHandle;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn orchestrator(
    catalog: &CatalogHandle,
    daemon: Arc<dyn ContentDaemon>,
    cancel: CancellationToken,
) -> DownloadOrchestrator {
    let config = test_config(Path::new("unused.db"));
    DownloadOrchestrator::new(
        catalog.clone(),
        daemon,
        &config.daemon,
        RetryPolicy::immediate(3),
        cancel,
    )
    .with_poll_interval(Duration::from_millis(5))
}

fn count(catalog: &CatalogHandle, status: EntryStatus) -> u64 {
    catalog.with(|c| c.count_by_status()).unwrap()[&status]
}

#[tokio::test]
async fn test_three_downloads_with_two_slots() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    for slug in ["a", "b", "c"] {
        insert_resolved(&catalog, slug, 1);
    }

    let daemon = Arc::new(FakeDaemon::new(3));
    let summary = orchestrator(&catalog, daemon.clone(), CancellationToken::new())
        .run(2, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.downloaded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(daemon.starts().len(), 3);
    assert_eq!(count(&catalog, EntryStatus::Downloaded), 3);

    let a = entry(&catalog, &post_url("a"));
    assert_eq!(a.download_path.as_deref(), Some("/downloads/aid.stl"));
    assert_eq!(a.resolved_id.as_deref(), Some("lbry://a#aid"));
    assert_invariants(&catalog);
}

#[tokio::test]
async fn test_unreachable_daemon_leaves_nothing_downloading() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    for slug in ["a", "b", "c"] {
        insert_resolved(&catalog, slug, 1);
    }

    let daemon = FakeDaemon::new(1).refusing_downloads();
    let err = orchestrator(&catalog, Arc::new(daemon), CancellationToken::new())
        .run(2, dir.path())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(count(&catalog, EntryStatus::Downloading), 0);
    assert_eq!(count(&catalog, EntryStatus::Resolved), 3);
}

#[tokio::test]
async fn test_restart_resumes_only_unfinished_entries() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    let done = insert_resolved(&catalog, "done", 1);
    let running = insert_resolved(&catalog, "running", 1);
    insert_resolved(&catalog, "fresh", 1);

    // State left behind by an interrupted run
    catalog
        .with(|c| {
            c.mark(&done, EntryStatus::Downloading, None)?;
            c.mark_downloaded(&done, Some("/downloads/doneid.stl"))?;
            c.mark(&running, EntryStatus::Downloading, None)?;
            Ok(())
        })
        .unwrap();

    let daemon = Arc::new(FakeDaemon::new(2).with_known_download("runningid"));
    let summary = orchestrator(&catalog, daemon.clone(), CancellationToken::new())
        .run(2, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.adopted, 1);
    assert_eq!(summary.downloaded, 2);
    assert_eq!(daemon.starts(), vec!["lbry://fresh#freshid".to_string()]);
    assert_eq!(count(&catalog, EntryStatus::Downloaded), 3);
    assert_eq!(
        entry(&catalog, &done).download_path.as_deref(),
        Some("/downloads/doneid.stl")
    );
}

#[tokio::test]
async fn test_adopted_download_unknown_to_daemon_is_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    let lost = insert_resolved(&catalog, "lost", 1);
    catalog
        .with(|c| c.mark(&lost, EntryStatus::Downloading, None))
        .unwrap();

    let daemon = Arc::new(FakeDaemon::new(1));
    let summary = orchestrator(&catalog, daemon.clone(), CancellationToken::new())
        .run(1, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(daemon.starts(), vec!["lbry://lost#lostid".to_string()]);
    assert_eq!(entry(&catalog, &lost).attempt_count, 0);
}

#[tokio::test]
async fn test_page_filter_limits_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    insert_resolved(&catalog, "early", 1);
    let late = insert_resolved(&catalog, "late", 7);

    let daemon = Arc::new(FakeDaemon::new(1));
    orchestrator(&catalog, daemon.clone(), CancellationToken::new())
        .with_pages(Some(5..=9))
        .run(2, dir.path())
        .await
        .unwrap();

    assert_eq!(daemon.starts(), vec!["lbry://late#lateid".to_string()]);
    assert_eq!(entry(&catalog, &late).status, EntryStatus::Downloaded);
    assert_eq!(
        entry(&catalog, &post_url("early")).status,
        EntryStatus::Resolved
    );
}

#[tokio::test]
async fn test_cancelled_run_starts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    insert_resolved(&catalog, "a", 1);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let daemon = Arc::new(FakeDaemon::new(1));
    let summary = orchestrator(&catalog, daemon.clone(), cancel)
        .run(2, dir.path())
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert!(daemon.starts().is_empty());
    assert_eq!(count(&catalog, EntryStatus::Resolved), 1);
}

#[tokio::test]
async fn test_in_flight_downloads_never_exceed_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    for slug in ["a", "b", "c", "d", "e", "f", "g"] {
        insert_resolved(&catalog, slug, 1);
    }

    let daemon = Arc::new(FakeDaemon::new(3));
    let summary = orchestrator(&catalog, daemon.clone(), CancellationToken::new())
        .run(2, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.downloaded, 7);
    assert_eq!(daemon.peak_active(), 2);
}
