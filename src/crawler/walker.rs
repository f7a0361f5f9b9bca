//! Index page walker (Stage1)
//!
//! Walks the index pages in ascending order, visits every post found on each
//! page with bounded concurrency and records what it learns in the catalog as
//! it goes. Progress is saved after every page so an interrupted walk resumes
//! at the next unprocessed page.

use crate::config::Config;
use crate::crawler::fetcher::{FetchError, PageSource};
use crate::crawler::parser::{PageLayout, PostLink};
use crate::crawler::throttle::Throttle;
use crate::retry::{with_retry, RetryPolicy};
use crate::robots::{fetch_robots, RobotsPolicy};
use crate::state::CrawlCursor;
use crate::storage::{CatalogEntry, CatalogHandle, StoreError};
use crate::{ConfigError, HarvestError};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Counters for one walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    pub pages_walked: u32,
    pub pages_failed: u32,
    /// Previously failed pages that succeeded on retry
    pub pages_recovered: u32,
    pub posts_seen: u64,
    pub posts_new: u64,
    /// Posts already catalogued with a link or a later status; not refetched
    pub posts_known: u64,
    pub posts_failed: u64,
    pub posts_disallowed: u64,
    pub links_found: u64,
    pub interrupted: bool,
}

/// What happened to one post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Recorded { inserted: bool, has_link: bool },
    AlreadyKnown,
    Failed,
    Disallowed,
    /// Cancelled before the post could be recorded; left for the next run
    Interrupted,
}

enum PageOutcome {
    Completed,
    Failed,
    Interrupted,
}

/// Stage1 driver
pub struct PageWalker {
    catalog: CatalogHandle,
    source: Arc<dyn PageSource>,
    layout: PageLayout,
    retry: RetryPolicy,
    spacing: (Duration, Duration),
    base_url: Url,
    page_param: String,
    agent: String,
    respect_robots: bool,
    rescan: bool,
    cancel: CancellationToken,
}

impl PageWalker {
    pub fn new(
        config: &Config,
        catalog: CatalogHandle,
        source: Arc<dyn PageSource>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.crawler.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("base_url: {}", e)))?;

        Ok(Self {
            catalog,
            source,
            layout: PageLayout::from_config(&config.crawler)?,
            retry: RetryPolicy::from(&config.retry),
            spacing: config.crawler.spacing(),
            base_url,
            page_param: config.crawler.page_param.clone(),
            agent: config.user_agent.crawler_name.clone(),
            respect_robots: config.crawler.respect_robots,
            rescan: config.crawler.rescan,
            cancel,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_spacing(mut self, min: Duration, max: Duration) -> Self {
        self.spacing = (min, max);
        self
    }

    /// URL of index page `page`
    pub fn page_url(&self, page: u32) -> Url {
        let mut url = self.base_url.clone();
        let kept: Vec<(String, String)> = self
            .base_url
            .query_pairs()
            .filter(|(k, _)| k != self.page_param.as_str())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(&self.page_param, &page.to_string());
        url
    }

    /// Walks pages `start..=end`, resuming from the stored cursor
    ///
    /// Failed index pages that an earlier run already passed are retried
    /// first. Store failures abort the walk; every other failure is recorded
    /// and the walk moves on.
    pub async fn walk(
        &self,
        start: u32,
        end: u32,
        concurrency: usize,
    ) -> Result<WalkSummary, HarvestError> {
        let mut summary = WalkSummary::default();

        let robots = if self.respect_robots {
            fetch_robots(self.source.as_ref(), &self.base_url, &self.agent).await
        } else {
            RobotsPolicy::allow_all(&self.agent)
        };
        let throttle =
            Throttle::new(self.spacing.0, self.spacing.1).with_floor(robots.crawl_delay());

        let stored = self.catalog.with(|c| c.load_cursor())?;
        let mut cursor = if self.rescan {
            CrawlCursor::new(start, end)
        } else {
            CrawlCursor::resume(stored, start, end)
        };

        if cursor.last_completed.is_some() {
            tracing::info!(
                "Resuming walk at page {} (pages {}-{})",
                cursor.next_page().map_or("done".to_string(), |p| p.to_string()),
                start,
                end
            );
        }

        let retry_pages: Vec<u32> = self
            .catalog
            .with(|c| c.failed_pages())?
            .into_iter()
            .map(|f| f.page)
            .filter(|p| (start..=end).contains(p) && cursor.last_completed.is_some_and(|l| *p <= l))
            .collect();

        for page in retry_pages {
            if self.cancel.is_cancelled() {
                summary.interrupted = true;
                return Ok(summary);
            }
            tracing::info!("Retrying previously failed page {}", page);
            match self
                .process_page(page, concurrency, &robots, &throttle, &mut summary)
                .await?
            {
                PageOutcome::Completed => summary.pages_recovered += 1,
                PageOutcome::Failed => {}
                PageOutcome::Interrupted => {
                    summary.interrupted = true;
                    return Ok(summary);
                }
            }
        }

        for page in cursor.remaining() {
            if self.cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            match self
                .process_page(page, concurrency, &robots, &throttle, &mut summary)
                .await?
            {
                PageOutcome::Completed | PageOutcome::Failed => {
                    cursor.advance(page);
                    self.catalog.with(|c| c.save_cursor(&cursor))?;
                }
                PageOutcome::Interrupted => {
                    summary.interrupted = true;
                    break;
                }
            }
        }

        tracing::info!(
            "Walk finished: {} pages, {} failed, {} posts ({} new, {} links)",
            summary.pages_walked,
            summary.pages_failed,
            summary.posts_seen,
            summary.posts_new,
            summary.links_found
        );
        Ok(summary)
    }

    /// Fetches one index page and returns the posts it lists
    pub async fn discover_page(
        &self,
        page: u32,
        throttle: &Throttle,
    ) -> Result<Vec<PostLink>, FetchError> {
        let url = self.page_url(page);
        let html = self.fetch_with_retry(&url, throttle, "index page").await?;
        Ok(self.layout.extract_posts(&html, &url))
    }

    async fn process_page(
        &self,
        page: u32,
        concurrency: usize,
        robots: &RobotsPolicy,
        throttle: &Throttle,
        summary: &mut WalkSummary,
    ) -> Result<PageOutcome, HarvestError> {
        let url = self.page_url(page);

        let posts = if robots.allows(&url) {
            self.discover_page(page, throttle).await
        } else {
            Err(FetchError::Request {
                url: url.to_string(),
                reason: "disallowed by robots.txt".to_string(),
            })
        };

        let posts = match posts {
            Ok(posts) => posts,
            Err(e) => {
                if self.cancel.is_cancelled() {
                    return Ok(PageOutcome::Interrupted);
                }
                tracing::warn!("Page {} failed: {}", page, e);
                self.catalog
                    .with(|c| c.record_failed_page(page, &e.to_string()))?;
                summary.pages_failed += 1;
                return Ok(PageOutcome::Failed);
            }
        };

        if posts.is_empty() {
            tracing::info!("Page {}: no posts found", page);
        }

        let total = posts.len();
        let mut new_on_page = 0u64;
        let mut visited = 0usize;
        let mut outcomes = std::pin::pin!(self.visit_posts(page, posts, concurrency, robots, throttle));

        while let Some(outcome) = outcomes.next().await {
            let outcome = outcome?;
            if outcome == PostOutcome::Interrupted {
                continue;
            }
            visited += 1;
            summary.posts_seen += 1;
            match outcome {
                PostOutcome::Recorded { inserted, has_link } => {
                    if inserted {
                        summary.posts_new += 1;
                        new_on_page += 1;
                    }
                    if has_link {
                        summary.links_found += 1;
                    }
                }
                PostOutcome::AlreadyKnown => summary.posts_known += 1,
                PostOutcome::Failed => summary.posts_failed += 1,
                PostOutcome::Disallowed => summary.posts_disallowed += 1,
                PostOutcome::Interrupted => {}
            }
        }

        if visited < total {
            return Ok(PageOutcome::Interrupted);
        }

        self.catalog.with(|c| c.clear_failed_page(page))?;
        summary.pages_walked += 1;
        tracing::info!("Page {}: {} posts ({} new)", page, total, new_on_page);
        Ok(PageOutcome::Completed)
    }

    /// Lazily visits the posts of one page with bounded concurrency
    ///
    /// Each item is produced once the post has been recorded in the catalog.
    /// After cancellation no further posts are started.
    pub fn visit_posts<'a>(
        &'a self,
        page: u32,
        posts: Vec<PostLink>,
        concurrency: usize,
        robots: &'a RobotsPolicy,
        throttle: &'a Throttle,
    ) -> impl Stream<Item = Result<PostOutcome, StoreError>> + 'a {
        stream::iter(posts)
            .take_while(move |_| futures::future::ready(!self.cancel.is_cancelled()))
            .map(move |post| self.visit_post(post, page, robots, throttle))
            .buffer_unordered(concurrency.max(1))
    }

    async fn visit_post(
        &self,
        post: PostLink,
        page: u32,
        robots: &RobotsPolicy,
        throttle: &Throttle,
    ) -> Result<PostOutcome, StoreError> {
        let post_url = post.url.to_string();

        if let Some(existing) = self.catalog.with(|c| c.get(&post_url))? {
            if existing.external_url.is_some()
                || existing.status.is_terminal()
                || existing.status.requires_resolved_id()
            {
                tracing::debug!("Already catalogued: {}", post_url);
                return Ok(PostOutcome::AlreadyKnown);
            }
        }

        if !robots.allows(&post.url) {
            tracing::debug!("Disallowed by robots.txt: {}", post_url);
            let entry = CatalogEntry::skipped(&post_url, Some(page), "disallowed by robots.txt")
                .with_title(post.title);
            self.catalog.with(|c| c.upsert(&entry))?;
            return Ok(PostOutcome::Disallowed);
        }

        let html = match self.fetch_with_retry(&post.url, throttle, "post").await {
            Ok(html) => html,
            Err(_) if self.cancel.is_cancelled() => {
                tracing::debug!("Cancelled while fetching {}", post_url);
                return Ok(PostOutcome::Interrupted);
            }
            Err(e) => {
                tracing::warn!("Post {} failed: {}", post_url, e);
                let entry =
                    CatalogEntry::failed(&post_url, Some(page), &e.to_string()).with_title(post.title);
                self.catalog.with(|c| c.upsert(&entry))?;
                return Ok(PostOutcome::Failed);
            }
        };

        match self.layout.extract_post(&html, &post.url) {
            Ok(details) => {
                let has_link = details.hosting_link.is_some();
                if let Some(link) = &details.hosting_link {
                    tracing::debug!("{} -> {}", post_url, link);
                }
                let entry = CatalogEntry::discovered(&post_url, Some(page), details.hosting_link)
                    .with_title(post.title)
                    .with_description(details.description);
                let inserted = self.catalog.with(|c| c.upsert(&entry))?;
                Ok(PostOutcome::Recorded { inserted, has_link })
            }
            Err(e) => {
                tracing::warn!("{}", e);
                let entry =
                    CatalogEntry::failed(&post_url, Some(page), &e.to_string()).with_title(post.title);
                self.catalog.with(|c| c.upsert(&entry))?;
                Ok(PostOutcome::Failed)
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        url: &Url,
        throttle: &Throttle,
        label: &str,
    ) -> Result<String, FetchError> {
        let label = format!("{} {}", label, url);
        with_retry(&self.retry, &self.cancel, &label, || async {
            throttle.acquire().await;
            self.source.fetch(url).await
        })
        .await
    }
}
