use super::inflight::{DownloadOutcome, InFlight, Phase};
use crate::config::DaemonConfig;
use crate::daemon::{ContentDaemon, DaemonError, DownloadState};
use crate::retry::RetryPolicy;
use crate::state::EntryStatus;
use crate::storage::CatalogHandle;
use crate::HarvestError;
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Counters for one orchestrator run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    /// `get` requests the daemon accepted
    pub started: u64,
    /// Downloading entries picked up from an earlier run
    pub adopted: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub retries: u64,
    pub interrupted: bool,
}

/// Drives the daemon to download every Resolved entry
pub struct DownloadOrchestrator {
    catalog: CatalogHandle,
    daemon: Arc<dyn ContentDaemon>,
    retry: RetryPolicy,
    poll_interval: Duration,
    download_timeout: Duration,
    pages: Option<RangeInclusive<u32>>,
    cancel: CancellationToken,
}

impl DownloadOrchestrator {
    pub fn new(
        catalog: CatalogHandle,
        daemon: Arc<dyn ContentDaemon>,
        config: &DaemonConfig,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            daemon,
            retry,
            poll_interval: config.poll_interval(),
            download_timeout: config.download_timeout(),
            pages: None,
            cancel,
        }
    }

    /// Restricts the run to posts discovered on `pages`
    pub fn with_pages(mut self, pages: Option<RangeInclusive<u32>>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_download_timeout(mut self, download_timeout: Duration) -> Self {
        self.download_timeout = download_timeout;
        self
    }

    /// Downloads every Resolved entry into `output_dir`
    ///
    /// Entries left Downloading by an interrupted run are adopted first. At
    /// most `concurrency` downloads are in flight; a slot frees up only when a
    /// download completes or fails for good. An unreachable daemon aborts the
    /// run immediately.
    pub async fn run(
        &self,
        concurrency: usize,
        output_dir: &Path,
    ) -> Result<DownloadSummary, HarvestError> {
        let mut summary = DownloadSummary::default();
        std::fs::create_dir_all(output_dir)?;

        let mut queue: VecDeque<_> = self
            .catalog
            .with(|c| {
                let mut pending =
                    c.next_pending_in(EntryStatus::Downloading, usize::MAX, self.pages.as_ref())?;
                pending.extend(c.next_pending_in(
                    EntryStatus::Resolved,
                    usize::MAX,
                    self.pages.as_ref(),
                )?);
                Ok(pending)
            })?
            .into();

        if queue.is_empty() {
            tracing::info!("No resolved entries to download");
            return Ok(summary);
        }
        tracing::info!(
            "Downloading {} entries into {} ({} at a time)",
            queue.len(),
            output_dir.display(),
            concurrency
        );

        let concurrency = concurrency.max(1);
        let mut in_flight: Vec<InFlight> = Vec::with_capacity(concurrency);

        loop {
            if !self.cancel.is_cancelled() {
                while in_flight.len() < concurrency {
                    let Some(entry) = queue.pop_front() else {
                        break;
                    };
                    match InFlight::from_entry(&entry, Instant::now()) {
                        Some(flight) => {
                            if flight.adopted {
                                tracing::info!("Adopting in-progress download {}", flight.resolved_id);
                                summary.adopted += 1;
                            }
                            in_flight.push(flight);
                        }
                        None => tracing::warn!("{} has no resolved identifier", entry.post_url),
                    }
                }
            }

            if in_flight.is_empty() {
                summary.interrupted = self.cancel.is_cancelled() && !queue.is_empty();
                break;
            }

            let now = Instant::now();
            let steps = futures::future::join_all(
                in_flight
                    .iter_mut()
                    .filter(|flight| flight.is_due(now))
                    .map(|flight| self.advance(flight, output_dir, now)),
            )
            .await;

            for step in steps {
                match step? {
                    Step::Accepted => summary.started += 1,
                    Step::Retrying => summary.retries += 1,
                    Step::Waiting => {}
                }
            }

            in_flight.retain(|flight| match flight.outcome {
                Some(DownloadOutcome::Downloaded) => {
                    summary.downloaded += 1;
                    false
                }
                Some(DownloadOutcome::Failed) => {
                    summary.failed += 1;
                    false
                }
                None => true,
            });

            if self.cancel.is_cancelled() {
                tracing::info!(
                    "Cancelled with {} downloads in flight; the daemon keeps them running",
                    in_flight.len()
                );
                summary.interrupted = true;
                break;
            }

            let now = Instant::now();
            let next_due = in_flight
                .iter()
                .map(|flight| flight.due_at(now))
                .min()
                .unwrap_or(now);

            if in_flight.len() < concurrency && !queue.is_empty() {
                continue;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(next_due) => {}
            }
        }

        tracing::info!(
            "Downloads finished: {} downloaded, {} failed, {} retries",
            summary.downloaded,
            summary.failed,
            summary.retries
        );
        Ok(summary)
    }

    /// Moves one in-flight download along by a single step
    async fn advance(
        &self,
        flight: &mut InFlight,
        output_dir: &Path,
        now: Instant,
    ) -> Result<Step, HarvestError> {
        match flight.phase {
            Phase::Backoff { .. } => {
                flight.phase = Phase::Starting;
                self.start(flight, output_dir).await
            }
            Phase::Starting => self.start(flight, output_dir).await,
            Phase::Polling { .. } => {
                if flight.timed_out(now, self.download_timeout) {
                    let reason = format!("download timed out after {:?}", self.download_timeout);
                    return self.fail_attempt(flight, &reason);
                }
                self.poll(flight, output_dir).await
            }
        }
    }

    async fn start(&self, flight: &mut InFlight, output_dir: &Path) -> Result<Step, HarvestError> {
        flight.adopted = false;

        let state = match self
            .daemon
            .start_download(&flight.resolved_id, output_dir)
            .await
        {
            Ok(state) => state,
            Err(e) => return self.daemon_failure(flight, e),
        };

        if !flight.downloading {
            self.catalog
                .with(|c| c.mark(&flight.post_url, EntryStatus::Downloading, None))?;
            flight.downloading = true;
        }
        flight.accepted_at = Some(Instant::now());
        tracing::debug!("Daemon accepted {} ({})", flight.resolved_id, state);

        self.apply_state(flight, state)?;
        Ok(Step::Accepted)
    }

    async fn poll(&self, flight: &mut InFlight, output_dir: &Path) -> Result<Step, HarvestError> {
        let Some(claim_id) = flight.claim_id.clone() else {
            return self.fail_attempt(flight, "resolved identifier carries no claim id");
        };

        match self.daemon.download_status(&claim_id).await {
            Ok(DownloadState::Missing) if flight.adopted => {
                tracing::info!(
                    "Daemon no longer knows {}, starting it again",
                    flight.resolved_id
                );
                flight.phase = Phase::Starting;
                self.start(flight, output_dir).await
            }
            Ok(DownloadState::Missing) => {
                self.fail_attempt(flight, "daemon lost track of the download")
            }
            Ok(state) => {
                self.apply_state(flight, state)?;
                Ok(match flight.phase {
                    Phase::Backoff { .. } => Step::Retrying,
                    _ => Step::Waiting,
                })
            }
            Err(e) => self.daemon_failure(flight, e),
        }
    }

    /// Reacts to a state reported by the daemon for an accepted download
    fn apply_state(&self, flight: &mut InFlight, state: DownloadState) -> Result<(), HarvestError> {
        match state {
            DownloadState::Completed { path } => {
                self.catalog
                    .with(|c| c.mark_downloaded(&flight.post_url, path.as_deref()))?;
                tracing::info!(
                    "Downloaded {}{}",
                    flight.resolved_id,
                    path.map(|p| format!(" -> {}", p)).unwrap_or_default()
                );
                flight.outcome = Some(DownloadOutcome::Downloaded);
            }
            DownloadState::Errored { reason } => {
                self.fail_attempt(flight, &reason)?;
            }
            DownloadState::Pending | DownloadState::Running { .. } | DownloadState::Missing => {
                flight.phase = Phase::Polling {
                    next_poll: Instant::now() + self.poll_interval,
                };
            }
        }
        Ok(())
    }

    fn daemon_failure(&self, flight: &mut InFlight, err: DaemonError) -> Result<Step, HarvestError> {
        if let DaemonError::Unreachable { .. } = err {
            tracing::error!("{}", err);
            return Err(err.into());
        }
        self.fail_attempt(flight, &err.to_string())
    }

    /// Records a failed attempt and either schedules a retry or gives up
    fn fail_attempt(&self, flight: &mut InFlight, reason: &str) -> Result<Step, HarvestError> {
        flight.failures += 1;
        flight.accepted_at = None;
        self.catalog
            .with(|c| c.record_attempt(&flight.post_url, reason))?;

        if !self.retry.should_retry(flight.failures) {
            tracing::warn!(
                "Giving up on {} after {} attempts: {}",
                flight.resolved_id,
                flight.failures,
                reason
            );
            self.catalog
                .with(|c| c.mark(&flight.post_url, EntryStatus::Failed, Some(reason)))?;
            flight.outcome = Some(DownloadOutcome::Failed);
            return Ok(Step::Waiting);
        }

        let delay = self.retry.backoff(flight.failures);
        tracing::warn!(
            "Download attempt {} for {} failed ({}), retrying in {:?}",
            flight.failures,
            flight.resolved_id,
            reason,
            delay
        );
        flight.phase = Phase::Backoff {
            until: Instant::now() + delay,
        };
        Ok(Step::Retrying)
    }
}

/// Result of advancing one in-flight download
enum Step {
    Accepted,
    Retrying,
    Waiting,
}
