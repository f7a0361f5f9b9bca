//! End-to-end runs through the pipeline controller

use crate::support::*;
use lbry_harvest::output::{EXIT_FATAL, EXIT_INTERRUPTED, EXIT_OK};
use lbry_harvest::state::EntryStatus;
use lbry_harvest::storage::CatalogHandle;
use lbry_harvest::{PipelineController, RunOptions, StageSelection};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn controller(
    dir: &TempDir,
    catalog: &CatalogHandle,
    options: RunOptions,
    daemon: Arc<FakeDaemon>,
    cancel: CancellationToken,
) -> PipelineController {
    let mut config = test_config(Path::new("unused.db"));
    config.daemon.download_dir = dir.path().join("downloads").to_string_lossy().into_owned();
    PipelineController::new(config, options, catalog.clone(), three_page_site(), cancel)
        .with_daemon(daemon)
}

#[tokio::test]
async fn test_full_run_downloads_every_linked_post() {
    let dir = tempfile::tempdir().unwrap();
    let report_path = dir.path().join("out").join("report.json");
    let catalog = memory_catalog();
    let daemon = Arc::new(FakeDaemon::new(2));

    let mut options = RunOptions::new(StageSelection::Both);
    options.report_path = Some(report_path.clone());
    let report = controller(&dir, &catalog, options, daemon.clone(), CancellationToken::new())
        .run()
        .await;

    assert_eq!(report.fatal_error, None);
    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(report.total_entries, 6);
    assert_eq!(report.downloaded(), 5);
    assert_eq!(report.skipped(), 1);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.resolve.as_ref().unwrap().no_link, 1);
    assert_eq!(daemon.starts().len(), 5);
    assert!(dir.path().join("downloads").is_dir());

    let a1 = entry(&catalog, &post_url("a1"));
    assert_eq!(a1.resolved_id.as_deref(), Some("lbry://a1#a12"));
    assert_eq!(a1.download_path.as_deref(), Some("/downloads/a12.stl"));
    assert_eq!(a1.description.as_deref(), Some("Printable receiver parts"));
    assert_eq!(entry(&catalog, &post_url("a2")).description, None);
    assert_invariants(&catalog);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 6);
    let exported = entries
        .iter()
        .find(|e| e["post_url"] == serde_json::json!(post_url("a1")))
        .unwrap();
    assert_eq!(exported["description"], "Printable receiver parts");
    assert_eq!(json["stages"], serde_json::json!(["crawl", "download"]));
    assert!(json["fatal_error"].is_null());
}

#[tokio::test]
async fn test_missing_claim_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    let daemon = Arc::new(FakeDaemon::new(1).with_missing("lbry://@chan#1/a2#2"));

    let report = controller(
        &dir,
        &catalog,
        RunOptions::new(StageSelection::Both),
        daemon.clone(),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(report.downloaded(), 4);
    assert_eq!(report.skipped(), 2);

    let a2 = entry(&catalog, &post_url("a2"));
    assert_eq!(a2.status, EntryStatus::Skipped);
    assert!(a2.resolved_id.is_none());
    assert!(!daemon.starts().iter().any(|uri| uri.contains("a2")));
}

#[tokio::test]
async fn test_second_run_repeats_no_work() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    let daemon = Arc::new(FakeDaemon::new(1));

    for _ in 0..2 {
        let report = controller(
            &dir,
            &catalog,
            RunOptions::new(StageSelection::Both),
            daemon.clone(),
            CancellationToken::new(),
        )
        .run()
        .await;
        assert_eq!(report.exit_code(), EXIT_OK);
        assert_eq!(report.downloaded(), 5);
    }

    assert_eq!(daemon.starts().len(), 5);
    assert_eq!(catalog.with(|c| c.count_total()).unwrap(), 6);
}

#[tokio::test]
async fn test_crawl_only_leaves_daemon_alone() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();

    let report = controller(
        &dir,
        &catalog,
        RunOptions::new(StageSelection::CrawlOnly),
        Arc::new(FakeDaemon::unreachable()),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert_eq!(report.exit_code(), EXIT_OK);
    assert!(report.walk.is_some());
    assert!(report.resolve.is_none());
    assert!(report.download.is_none());
    assert_eq!(report.count(EntryStatus::Discovered), 6);
}

#[tokio::test]
async fn test_unreachable_daemon_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    insert_resolved(&catalog, "a", 1);

    let report = controller(
        &dir,
        &catalog,
        RunOptions::new(StageSelection::DownloadOnly),
        Arc::new(FakeDaemon::unreachable()),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert_eq!(report.exit_code(), EXIT_FATAL);
    assert!(report.fatal_error.as_deref().unwrap().contains("unreachable"));
    assert_eq!(report.count(EntryStatus::Resolved), 1);
    assert_eq!(report.count(EntryStatus::Downloading), 0);
    assert!(report.walk.is_none());
}

#[tokio::test]
async fn test_interrupted_run_exits_with_interrupt_code() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = memory_catalog();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let daemon = Arc::new(FakeDaemon::new(1));
    let report = controller(
        &dir,
        &catalog,
        RunOptions::new(StageSelection::Both),
        daemon.clone(),
        cancel,
    )
    .run()
    .await;

    assert!(report.interrupted);
    assert_eq!(report.exit_code(), EXIT_INTERRUPTED);
    assert!(report.walk.as_ref().unwrap().interrupted);
    assert!(report.download.is_none());
    assert!(daemon.starts().is_empty());
}
