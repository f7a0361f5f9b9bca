use crate::daemon::claim_id_of;
use crate::state::EntryStatus;
use crate::storage::CatalogEntry;
use std::time::Duration;
use tokio::time::Instant;

/// Where an in-flight download stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// A `get` request must be sent
    Starting,
    /// The daemon accepted the download; poll at `next_poll`
    Polling { next_poll: Instant },
    /// Waiting out a retry delay before starting again
    Backoff { until: Instant },
}

/// How a download left the in-flight set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded,
    Failed,
}

/// One identifier the orchestrator is driving
#[derive(Debug, Clone)]
pub struct InFlight {
    pub post_url: String,
    pub resolved_id: String,
    pub claim_id: Option<String>,
    pub phase: Phase,
    /// Failed attempts during this run
    pub failures: u32,
    /// When the daemon last accepted the download
    pub accepted_at: Option<Instant>,
    /// True once the catalog entry is in Downloading
    pub downloading: bool,
    /// True when no `get` has been sent for this entry during this run
    pub adopted: bool,
    pub outcome: Option<DownloadOutcome>,
}

impl InFlight {
    /// Builds the in-flight record for a Resolved or Downloading entry
    ///
    /// Downloading entries were left behind by an earlier run; they are polled
    /// straight away instead of being started again.
    pub fn from_entry(entry: &CatalogEntry, now: Instant) -> Option<Self> {
        let resolved_id = entry.resolved_id.clone()?;
        let adopted = entry.status == EntryStatus::Downloading;

        Some(Self {
            post_url: entry.post_url.clone(),
            claim_id: claim_id_of(&resolved_id).map(str::to_string),
            resolved_id,
            phase: if adopted {
                Phase::Polling { next_poll: now }
            } else {
                Phase::Starting
            },
            failures: 0,
            accepted_at: adopted.then_some(now),
            downloading: adopted,
            adopted,
            outcome: None,
        })
    }

    /// The instant this record next needs attention
    pub fn due_at(&self, now: Instant) -> Instant {
        match self.phase {
            Phase::Starting => now,
            Phase::Polling { next_poll } => next_poll,
            Phase::Backoff { until } => until,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.outcome.is_none() && self.due_at(now) <= now
    }

    /// True when the accepted download has run longer than `timeout`
    pub fn timed_out(&self, now: Instant, timeout: Duration) -> bool {
        self.accepted_at
            .is_some_and(|accepted| now.saturating_duration_since(accepted) > timeout)
    }
}
