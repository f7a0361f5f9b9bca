//! Integration tests for the page walker
//!
//! These tests serve canned index and post pages from an in-memory source and
//! check what the walker records in the catalog.

use crate::support::*;
use async_trait::async_trait;
use lbry_harvest::crawler::{FetchError, PageSource, PageWalker};
use lbry_harvest::retry::RetryPolicy;
use lbry_harvest::state::{CrawlCursor, EntryStatus};
use lbry_harvest::storage::CatalogHandle;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

fn walker(catalog: &CatalogHandle, source: Arc<FakeSource>) -> PageWalker {
    let config = test_config(Path::new("unused.db"));
    PageWalker::new(&config, catalog.clone(), source, CancellationToken::new())
        .unwrap()
        .with_retry(RetryPolicy::immediate(3))
        .with_spacing(Duration::ZERO, Duration::ZERO)
}

fn pages_of(catalog: &CatalogHandle) -> Vec<Option<u32>> {
    catalog
        .with(|c| c.all_entries())
        .unwrap()
        .into_iter()
        .map(|e| e.page)
        .collect()
}

#[tokio::test]
async fn test_walk_records_posts_and_links() {
    let catalog = memory_catalog();
    let summary = walker(&catalog, three_page_site()).walk(1, 3, 2).await.unwrap();

    assert_eq!(summary.pages_walked, 3);
    assert_eq!(summary.posts_seen, 6);
    assert_eq!(summary.posts_new, 6);
    assert_eq!(summary.links_found, 5);

    let a1 = entry(&catalog, &post_url("a1"));
    assert_eq!(a1.status, EntryStatus::Discovered);
    assert_eq!(a1.page, Some(1));
    assert_eq!(a1.title.as_deref(), Some("Post a1"));
    assert_eq!(
        a1.external_url.as_deref(),
        Some("https://odysee.com/@chan:1/a1:2")
    );

    let b2 = entry(&catalog, &post_url("b2"));
    assert_eq!(b2.status, EntryStatus::Discovered);
    assert!(b2.external_url.is_none());

    let cursor = catalog.with(|c| c.load_cursor()).unwrap().unwrap();
    assert_eq!(cursor.last_completed, Some(3));
    assert_invariants(&catalog);
}

#[tokio::test]
async fn test_failed_page_is_skipped_without_aborting() {
    let source = three_page_site();
    source.time_out(page_url(2));

    let catalog = memory_catalog();
    let summary = walker(&catalog, source.clone()).walk(1, 3, 2).await.unwrap();

    assert_eq!(summary.pages_walked, 2);
    assert_eq!(summary.pages_failed, 1);
    assert_eq!(source.hits(&page_url(2)), 3);

    let pages = pages_of(&catalog);
    assert_eq!(pages.len(), 4);
    assert!(pages.iter().all(|p| *p == Some(1) || *p == Some(3)));
    assert!(!pages.contains(&Some(2)));

    let failed = catalog.with(|c| c.failed_pages()).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].page, 2);
}

#[tokio::test]
async fn test_failed_page_is_retried_first_on_next_run() {
    let source = three_page_site();
    source.time_out(page_url(2));

    let catalog = memory_catalog();
    walker(&catalog, source.clone()).walk(1, 3, 2).await.unwrap();

    source.serve(page_url(2), index_html(&["b1", "b2"]));
    let summary = walker(&catalog, source.clone()).walk(1, 3, 2).await.unwrap();

    assert_eq!(summary.pages_recovered, 1);
    assert_eq!(summary.pages_walked, 1);
    assert!(catalog.with(|c| c.failed_pages()).unwrap().is_empty());
    assert_eq!(entry(&catalog, &post_url("b1")).page, Some(2));
    assert_eq!(source.hits(&page_url(1)), 1);
}

#[tokio::test]
async fn test_rescan_produces_no_duplicates() {
    let catalog = memory_catalog();
    let source = three_page_site();
    walker(&catalog, source.clone()).walk(1, 3, 2).await.unwrap();

    let mut config = test_config(Path::new("unused.db"));
    config.crawler.rescan = true;
    let rescan = PageWalker::new(&config, catalog.clone(), source.clone(), CancellationToken::new())
        .unwrap()
        .with_retry(RetryPolicy::immediate(3))
        .with_spacing(Duration::ZERO, Duration::ZERO);
    let summary = rescan.walk(1, 3, 2).await.unwrap();

    assert_eq!(summary.pages_walked, 3);
    assert_eq!(summary.posts_new, 0);
    assert_eq!(summary.posts_known, 5);
    assert_eq!(catalog.with(|c| c.count_total()).unwrap(), 6);

    // Posts that already carry a link are not fetched again
    assert_eq!(source.hits(&post_url("a1")), 1);
    assert_eq!(source.hits(&post_url("b2")), 2);
}

#[tokio::test]
async fn test_walk_resumes_from_cursor() {
    let catalog = memory_catalog();
    catalog
        .with(|c| {
            c.save_cursor(&CrawlCursor {
                start_page: 1,
                end_page: 3,
                last_completed: Some(2),
            })
        })
        .unwrap();

    let source = three_page_site();
    let summary = walker(&catalog, source.clone()).walk(1, 3, 2).await.unwrap();

    assert_eq!(summary.pages_walked, 1);
    assert_eq!(source.hits(&page_url(1)), 0);
    assert_eq!(source.hits(&page_url(2)), 0);
    assert_eq!(source.hits(&page_url(3)), 1);
    assert_eq!(pages_of(&catalog), vec![Some(3), Some(3)]);
}

#[tokio::test]
async fn test_different_start_page_restarts_walk() {
    let catalog = memory_catalog();
    catalog
        .with(|c| {
            c.save_cursor(&CrawlCursor {
                start_page: 1,
                end_page: 3,
                last_completed: Some(3),
            })
        })
        .unwrap();

    let source = three_page_site();
    let summary = walker(&catalog, source.clone()).walk(2, 3, 2).await.unwrap();
    assert_eq!(summary.pages_walked, 2);
    assert_eq!(source.hits(&page_url(2)), 1);
}

#[tokio::test]
async fn test_post_failures_are_recorded() {
    let source = three_page_site();
    source.fail_with(post_url("a2"), 500);
    source.serve(post_url("c2"), "   ");

    let catalog = memory_catalog();
    let summary = walker(&catalog, source.clone()).walk(1, 3, 2).await.unwrap();
    assert_eq!(summary.posts_failed, 2);

    let a2 = entry(&catalog, &post_url("a2"));
    assert_eq!(a2.status, EntryStatus::Failed);
    assert!(a2.last_error.unwrap().contains("500"));
    assert_eq!(source.hits(&post_url("a2")), 3);

    let c2 = entry(&catalog, &post_url("c2"));
    assert_eq!(c2.status, EntryStatus::Failed);
    assert!(c2.resolved_id.is_none());
}

#[tokio::test]
async fn test_robots_disallowed_posts_are_skipped() {
    let source = three_page_site();
    source.serve(
        format!("{}/robots.txt", SITE),
        "User-agent: *\nDisallow: /detail/a1\n",
    );

    let catalog = memory_catalog();
    let summary = walker(&catalog, source.clone()).walk(1, 1, 2).await.unwrap();

    assert_eq!(summary.posts_disallowed, 1);
    assert_eq!(entry(&catalog, &post_url("a1")).status, EntryStatus::Skipped);
    assert_eq!(source.hits(&post_url("a1")), 0);
    assert_eq!(entry(&catalog, &post_url("a2")).status, EntryStatus::Discovered);
}

#[tokio::test]
async fn test_cancelled_walk_stops_before_next_page() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let catalog = memory_catalog();
    let config = test_config(Path::new("unused.db"));
    let source = three_page_site();
    let summary = PageWalker::new(&config, catalog.clone(), source.clone(), cancel)
        .unwrap()
        .with_spacing(Duration::ZERO, Duration::ZERO)
        .walk(1, 3, 2)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(source.hits(&page_url(1)), 0);
    assert!(catalog.with(|c| c.load_cursor()).unwrap().is_none());
}

/// Cancels the run the first time `trigger` is fetched
struct CancelOnFetch {
    inner: Arc<FakeSource>,
    trigger: String,
    cancel: CancellationToken,
}

#[async_trait]
impl PageSource for CancelOnFetch {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        if url.as_str() == self.trigger {
            self.cancel.cancel();
        }
        self.inner.fetch(url).await
    }
}

#[tokio::test]
async fn test_post_cancelled_during_backoff_is_fetched_next_run() {
    let source = three_page_site();
    source.fail_with(post_url("a1"), 503);

    let catalog = memory_catalog();
    let config = test_config(Path::new("unused.db"));
    let cancel = CancellationToken::new();
    let cancelling = Arc::new(CancelOnFetch {
        inner: source.clone(),
        trigger: post_url("a1"),
        cancel: cancel.clone(),
    });

    let mut slow_retry = RetryPolicy::immediate(3);
    slow_retry.initial_delay = Duration::from_secs(30);
    slow_retry.max_delay = Duration::from_secs(30);

    let summary = PageWalker::new(&config, catalog.clone(), cancelling, cancel)
        .unwrap()
        .with_retry(slow_retry)
        .with_spacing(Duration::ZERO, Duration::ZERO)
        .walk(1, 1, 1)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(source.hits(&post_url("a1")), 1);
    assert!(catalog.with(|c| c.get(&post_url("a1"))).unwrap().is_none());
    assert!(catalog.with(|c| c.load_cursor()).unwrap().is_none());

    source.serve(post_url("a1"), post_html(Some("@chan:1/a1:2")));
    let summary = walker(&catalog, source.clone()).walk(1, 1, 1).await.unwrap();

    assert!(!summary.interrupted);
    assert_eq!(source.hits(&post_url("a1")), 2);
    let a1 = entry(&catalog, &post_url("a1"));
    assert_eq!(a1.status, EntryStatus::Discovered);
    assert!(a1.external_url.is_some());
}

#[tokio::test]
async fn test_post_fetches_stay_within_concurrency() {
    let slugs = ["p1", "p2", "p3", "p4", "p5", "p6"];
    let source = FakeSource::new().with_latency(Duration::from_millis(20));
    source.serve(page_url(1), index_html(&slugs));
    for slug in slugs {
        source.serve(post_url(slug), post_html(Some(&format!("@chan:1/{}:2", slug))));
    }
    let source = Arc::new(source);

    let catalog = memory_catalog();
    let summary = walker(&catalog, source.clone()).walk(1, 1, 2).await.unwrap();

    assert_eq!(summary.posts_new, 6);
    assert_eq!(source.peak_in_flight(), 2);
}
