use crate::daemon::{ContentDaemon, DaemonError};
use crate::retry::{IsRetryable, RetryPolicy};
use crate::state::EntryStatus;
use crate::storage::{CatalogEntry, CatalogHandle};
use crate::url::to_canonical_uri;
use crate::HarvestError;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Entries pulled from the catalog per batch
const RESOLVE_BATCH: usize = 64;

/// Errors from resolving one hosting link
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unresolvable link {url}: {reason}")]
    Unresolvable { url: String, reason: String },

    #[error("Transient resolve error for {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("lbrynet daemon unreachable at {endpoint}: {reason}")]
    DaemonUnreachable { endpoint: String, reason: String },
}

impl IsRetryable for ResolveError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<ResolveError> for HarvestError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Unresolvable { url, reason } => Self::UnresolvableLink { url, reason },
            ResolveError::Transient { url, reason } => Self::TransientResolve { url, reason },
            ResolveError::DaemonUnreachable { endpoint, reason } => {
                Self::DaemonUnreachable { endpoint, reason }
            }
        }
    }
}

/// What happened to one Discovered entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved,
    Skipped,
    /// Skipped because the post embeds no hosting link
    NoLink,
    Failed,
    /// Cancelled while waiting to retry; the entry stays Discovered
    Interrupted,
}

/// Counters for one resolver run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveSummary {
    pub resolved: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Entries skipped because the post embeds no hosting link
    pub no_link: u64,
    pub interrupted: bool,
}

/// Maps hosting links to content-network identifiers
pub struct LinkResolver {
    catalog: CatalogHandle,
    daemon: Arc<dyn ContentDaemon>,
    retry: RetryPolicy,
    pages: Option<RangeInclusive<u32>>,
    cancel: CancellationToken,
}

impl LinkResolver {
    pub fn new(
        catalog: CatalogHandle,
        daemon: Arc<dyn ContentDaemon>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            daemon,
            retry,
            pages: None,
            cancel,
        }
    }

    /// Restricts the run to posts discovered on `pages`
    pub fn with_pages(mut self, pages: Option<RangeInclusive<u32>>) -> Self {
        self.pages = pages;
        self
    }

    /// Resolves one external URL to the daemon's permanent claim URI
    pub async fn resolve(&self, external_url: &str) -> Result<String, ResolveError> {
        let canonical = to_canonical_uri(external_url).ok_or_else(|| ResolveError::Unresolvable {
            url: external_url.to_string(),
            reason: "not a resolvable Odysee or lbry:// link".to_string(),
        })?;

        match self.daemon.resolve(&canonical).await {
            Ok(claim) => Ok(claim.permanent_url),
            Err(DaemonError::NotFound { reason, .. }) => Err(ResolveError::Unresolvable {
                url: external_url.to_string(),
                reason,
            }),
            Err(DaemonError::Unreachable { endpoint, reason }) => {
                Err(ResolveError::DaemonUnreachable { endpoint, reason })
            }
            Err(e) => Err(ResolveError::Transient {
                url: external_url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Resolves every Discovered entry in range
    ///
    /// Returns early with an error when the daemon is unreachable or the
    /// catalog fails; every other failure is recorded on the entry.
    pub async fn run(&self, concurrency: usize) -> Result<ResolveSummary, HarvestError> {
        let mut summary = ResolveSummary::default();

        loop {
            if self.cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let batch = self.catalog.with(|c| {
                c.next_pending_in(EntryStatus::Discovered, RESOLVE_BATCH, self.pages.as_ref())
            })?;
            if batch.is_empty() {
                break;
            }

            tracing::debug!("Resolving batch of {} entries", batch.len());

            let outcomes: Vec<Result<ResolveOutcome, HarvestError>> = stream::iter(batch)
                .map(|entry| self.resolve_entry(entry))
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

            for outcome in outcomes {
                match outcome? {
                    ResolveOutcome::Resolved => summary.resolved += 1,
                    ResolveOutcome::Skipped => summary.skipped += 1,
                    ResolveOutcome::NoLink => {
                        summary.skipped += 1;
                        summary.no_link += 1;
                    }
                    ResolveOutcome::Failed => summary.failed += 1,
                    ResolveOutcome::Interrupted => summary.interrupted = true,
                }
            }
        }

        tracing::info!(
            "Resolution finished: {} resolved, {} skipped ({} without link), {} failed",
            summary.resolved,
            summary.skipped,
            summary.no_link,
            summary.failed
        );
        Ok(summary)
    }

    async fn resolve_entry(&self, entry: CatalogEntry) -> Result<ResolveOutcome, HarvestError> {
        let post_url = entry.post_url.as_str();

        let Some(external_url) = entry.external_url.as_deref() else {
            self.catalog
                .with(|c| c.mark(post_url, EntryStatus::Skipped, Some("no hosting link")))?;
            return Ok(ResolveOutcome::NoLink);
        };

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.resolve(external_url).await {
                Ok(resolved_id) => {
                    tracing::info!("Resolved {} -> {}", external_url, resolved_id);
                    self.catalog
                        .with(|c| c.mark_resolved(post_url, &resolved_id))?;
                    return Ok(ResolveOutcome::Resolved);
                }
                Err(ResolveError::Unresolvable { reason, .. }) => {
                    tracing::warn!("Skipping {}: {}", external_url, reason);
                    self.catalog
                        .with(|c| c.mark(post_url, EntryStatus::Skipped, Some(&reason)))?;
                    return Ok(ResolveOutcome::Skipped);
                }
                Err(e @ ResolveError::DaemonUnreachable { .. }) => {
                    tracing::error!("{}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    let message = e.to_string();
                    self.catalog.with(|c| c.record_attempt(post_url, &message))?;

                    if !self.retry.should_retry(attempt) {
                        tracing::warn!(
                            "Giving up on {} after {} attempts: {}",
                            external_url,
                            attempt,
                            message
                        );
                        self.catalog
                            .with(|c| c.mark(post_url, EntryStatus::Failed, Some(&message)))?;
                        return Ok(ResolveOutcome::Failed);
                    }

                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(
                        "Resolve attempt {} for {} failed ({}), retrying in {:?}",
                        attempt,
                        external_url,
                        message,
                        delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(ResolveOutcome::Interrupted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
