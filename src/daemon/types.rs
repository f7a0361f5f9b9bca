use crate::retry::IsRetryable;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors from the content daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Cannot connect to lbrynet daemon at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Daemon call {method} timed out")]
    Timeout { method: String },

    #[error("Daemon call {method} failed: {message}")]
    Rpc { method: String, message: String },

    #[error("Unexpected daemon response to {method}: {reason}")]
    Protocol { method: String, reason: String },

    #[error("Claim not found for {uri}: {reason}")]
    NotFound { uri: String, reason: String },

    #[error("Daemon refused to download {uri}: {reason}")]
    Rejected { uri: String, reason: String },
}

impl DaemonError {
    /// The URI, method or endpoint the error is about
    pub fn subject(&self) -> &str {
        match self {
            Self::Unreachable { endpoint, .. } => endpoint,
            Self::Timeout { method } | Self::Rpc { method, .. } | Self::Protocol { method, .. } => {
                method
            }
            Self::NotFound { uri, .. } | Self::Rejected { uri, .. } => uri,
        }
    }
}

impl IsRetryable for DaemonError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unreachable { .. } | Self::NotFound { .. })
    }
}

/// Daemon health as reported by `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub is_running: bool,
}

/// A claim the daemon resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClaim {
    /// Permanent `lbry://name#claim_id` URI
    pub permanent_url: String,
    pub claim_id: String,
    pub name: String,
}

/// Progress of one download as seen by the daemon
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DownloadState {
    /// Accepted but no data written yet
    Pending,
    Running { progress: Option<f64> },
    Completed { path: Option<String> },
    Errored { reason: String },
    /// The daemon has no record of the download
    Missing,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Errored { .. })
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running {
                progress: Some(p),
            } => write!(f, "running ({:.0}%)", p * 100.0),
            Self::Running { progress: None } => write!(f, "running"),
            Self::Completed { path: Some(path) } => write!(f, "completed ({})", path),
            Self::Completed { path: None } => write!(f, "completed"),
            Self::Errored { reason } => write!(f, "errored: {}", reason),
            Self::Missing => write!(f, "missing"),
        }
    }
}

/// Claim id part of a resolved `lbry://name#claim_id` URI
pub fn claim_id_of(resolved_id: &str) -> Option<&str> {
    let (_, id) = resolved_id.rsplit_once('#')?;
    (!id.is_empty() && !id.contains('/')).then_some(id)
}
