//! Shared fakes for the integration tests

use async_trait::async_trait;
use lbry_harvest::config::Config;
use lbry_harvest::crawler::{FetchError, PageSource};
use lbry_harvest::daemon::{
    claim_id_of, ContentDaemon, DaemonError, DaemonStatus, DownloadState, ResolvedClaim,
};
use lbry_harvest::storage::{CatalogEntry, CatalogHandle, SqliteCatalog};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const SITE: &str = "https://guncadindex.com";

pub fn page_url(page: u32) -> String {
    format!("{}/search?page={}", SITE, page)
}

pub fn post_url(slug: &str) -> String {
    format!("{}/detail/{}", SITE, slug)
}

/// Index page listing the given post slugs
pub fn index_html(slugs: &[&str]) -> String {
    let cards: String = slugs
        .iter()
        .map(|slug| {
            format!(
                r#"<div class="grid-view-max"><a href="/detail/{slug}"><h3 class="card-title">Post {slug}</h3></a></div>"#
            )
        })
        .collect();
    format!("<html><body>{}</body></html>", cards)
}

/// Post page embedding an Odysee link through the site's redirector
pub fn post_html(odysee_path: Option<&str>) -> String {
    let link = odysee_path
        .map(|p| {
            format!(
                r#"<a href="/out/?u={}">Watch on Odysee</a>"#,
                urlencoding::encode(&format!("https://odysee.com/{}", p))
            )
        })
        .unwrap_or_default();
    format!(
        r#"<html><body><a href="https://github.com/x/y">Source</a>{}</body></html>"#,
        link
    )
}

/// Three index pages with two posts each; post b2 has no hosting link
pub fn post_html_with_description(odysee_path: &str, description: &str) -> String {
    post_html(Some(odysee_path)).replace(
        "<body>",
        &format!(
            r#"<body><div class="description-container"><span class="description-text">{}</span></div>"#,
            description
        ),
    )
}

pub fn three_page_site() -> Arc<FakeSource> {
    let source = FakeSource::new();
    source
        .serve(page_url(1), index_html(&["a1", "a2"]))
        .serve(page_url(2), index_html(&["b1", "b2"]))
        .serve(page_url(3), index_html(&["c1", "c2"]));
    source.serve(
        post_url("a1"),
        post_html_with_description("@chan:1/a1:2", "Printable   receiver\n parts"),
    );
    for slug in ["a2", "b1", "c1", "c2"] {
        source.serve(post_url(slug), post_html(Some(&format!("@chan:1/{}:2", slug))));
    }
    source.serve(post_url("b2"), post_html(None));
    Arc::new(source)
}

enum Reply {
    Body(String),
    Timeout,
    Status(u16),
}

/// In-memory [`PageSource`] serving canned pages
#[derive(Default)]
pub struct FakeSource {
    pages: Mutex<HashMap<String, Reply>>,
    hits: Mutex<HashMap<String, u32>>,
    latency: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: impl Into<String>, body: impl Into<String>) -> &Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.into(), Reply::Body(body.into()));
        self
    }

    pub fn time_out(&self, url: impl Into<String>) -> &Self {
        self.pages.lock().unwrap().insert(url.into(), Reply::Timeout);
        self
    }

    pub fn fail_with(&self, url: impl Into<String>, status: u16) -> &Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.into(), Reply::Status(status));
        self
    }

    /// Every fetch takes `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Most fetches that were ever in progress at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of fetches of `url` so far
    pub fn hits(&self, url: &str) -> u32 {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let key = url.to_string();
        *self.hits.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

        if !self.latency.is_zero() {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        match self.pages.lock().unwrap().get(&key) {
            Some(Reply::Body(body)) => Ok(body.clone()),
            Some(Reply::Timeout) => Err(FetchError::Timeout { url: key }),
            Some(Reply::Status(status)) => Err(FetchError::Status {
                url: key,
                status: *status,
            }),
            None => Err(FetchError::Status {
                url: key,
                status: 404,
            }),
        }
    }
}

/// In-memory [`ContentDaemon`]
///
/// Every canonical URI resolves to `lbry://<name>#<name><short id>`, taken
/// from its last segment, unless listed as missing. Downloads complete after `polls_needed` status polls.
pub struct FakeDaemon {
    pub polls_needed: u32,
    pub unreachable: bool,
    /// `status` works but every download request is refused by the transport
    pub unreachable_downloads: bool,
    missing: Mutex<Vec<String>>,
    starts: Mutex<Vec<String>>,
    polls: Mutex<HashMap<String, u32>>,
    known: Mutex<Vec<String>>,
    /// Claims started and not yet reported complete
    active: Mutex<HashSet<String>>,
    peak: AtomicUsize,
}

impl FakeDaemon {
    pub fn new(polls_needed: u32) -> Self {
        Self {
            polls_needed,
            unreachable: false,
            unreachable_downloads: false,
            missing: Mutex::new(Vec::new()),
            starts: Mutex::new(Vec::new()),
            polls: Mutex::new(HashMap::new()),
            known: Mutex::new(Vec::new()),
            active: Mutex::new(HashSet::new()),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::new(1)
        }
    }

    /// `status` answers but every download request is refused by the transport
    pub fn refusing_downloads(mut self) -> Self {
        self.unreachable_downloads = true;
        self
    }

    /// Claims that `resolve` reports as not found
    pub fn with_missing(self, uri: &str) -> Self {
        self.missing.lock().unwrap().push(uri.to_string());
        self
    }

    /// Downloads the daemon already knows about (started by an earlier run)
    pub fn with_known_download(self, claim_id: &str) -> Self {
        self.known.lock().unwrap().push(claim_id.to_string());
        self
    }

    /// URIs passed to `start_download`, in call order
    pub fn starts(&self) -> Vec<String> {
        self.starts.lock().unwrap().clone()
    }

    /// Most downloads that were ever running at once
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn refused(&self) -> DaemonError {
        DaemonError::Unreachable {
            endpoint: "http://localhost:5279".to_string(),
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl ContentDaemon for FakeDaemon {
    async fn status(&self) -> Result<DaemonStatus, DaemonError> {
        if self.unreachable {
            return Err(self.refused());
        }
        Ok(DaemonStatus { is_running: true })
    }

    async fn resolve(&self, uri: &str) -> Result<ResolvedClaim, DaemonError> {
        if self.unreachable {
            return Err(self.refused());
        }
        if self.missing.lock().unwrap().iter().any(|m| m == uri) {
            return Err(DaemonError::NotFound {
                uri: uri.to_string(),
                reason: "Could not find claim".to_string(),
            });
        }

        let last = uri.rsplit('/').next().unwrap_or(uri);
        let (name, short_id) = last.split_once('#').unwrap_or((last, "0"));
        let claim_id = format!("{}{}", name.trim_start_matches('@'), short_id);
        Ok(ResolvedClaim {
            permanent_url: format!("lbry://{}#{}", name, claim_id),
            claim_id,
            name: name.to_string(),
        })
    }

    async fn start_download(&self, uri: &str, _dir: &Path) -> Result<DownloadState, DaemonError> {
        if self.unreachable || self.unreachable_downloads {
            return Err(self.refused());
        }
        self.starts.lock().unwrap().push(uri.to_string());
        if let Some(claim_id) = claim_id_of(uri) {
            self.known.lock().unwrap().push(claim_id.to_string());
            let mut active = self.active.lock().unwrap();
            active.insert(claim_id.to_string());
            self.peak.fetch_max(active.len(), Ordering::SeqCst);
        }
        Ok(DownloadState::Pending)
    }

    async fn download_status(&self, claim_id: &str) -> Result<DownloadState, DaemonError> {
        if self.unreachable {
            return Err(self.refused());
        }
        if !self.known.lock().unwrap().iter().any(|k| k == claim_id) {
            return Ok(DownloadState::Missing);
        }

        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(claim_id.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.polls_needed {
            self.active.lock().unwrap().remove(claim_id);
            Ok(DownloadState::Completed {
                path: Some(format!("/downloads/{}.stl", claim_id)),
            })
        } else {
            Ok(DownloadState::Running {
                progress: Some(*count as f64 / self.polls_needed as f64),
            })
        }
    }
}

/// Configuration with no request spacing and instant retries
pub fn test_config(db_path: &Path) -> Config {
    let mut config = Config::default();
    config.crawler.base_url = format!("{}/search", SITE);
    config.crawler.start_page = 1;
    config.crawler.end_page = 3;
    config.crawler.min_spacing_ms = 0;
    config.crawler.max_spacing_ms = 0;
    config.crawler.fast_min_spacing_ms = 0;
    config.crawler.fast_max_spacing_ms = 0;
    config.retry.initial_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config.retry.jitter = false;
    config.daemon.poll_interval_ms = 10;
    config.output.database_path = db_path.to_string_lossy().into_owned();
    config
}

pub fn memory_catalog() -> CatalogHandle {
    CatalogHandle::new(SqliteCatalog::in_memory().unwrap())
}

/// Inserts an entry that has already been resolved to `lbry://<slug>#<slug>id`
pub fn insert_resolved(catalog: &CatalogHandle, slug: &str, page: u32) -> String {
    let url = post_url(slug);
    catalog
        .with(|c| {
            c.upsert(&CatalogEntry::discovered(
                url.as_str(),
                Some(page),
                Some(format!("https://odysee.com/@chan:1/{}:2", slug)),
            ))?;
            c.mark_resolved(&url, &format!("lbry://{}#{}id", slug, slug))?;
            Ok(())
        })
        .unwrap();
    url
}

pub fn entry(catalog: &CatalogHandle, url: &str) -> CatalogEntry {
    catalog.with(|c| c.get(url)).unwrap().unwrap()
}

/// Asserts the status/identifier invariant on every entry
pub fn assert_invariants(catalog: &CatalogHandle) {
    for entry in catalog.with(|c| c.all_entries()).unwrap() {
        if let Err(e) = entry.check_invariants() {
            panic!("{}", e);
        }
    }
}
