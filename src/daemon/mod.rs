//! Content daemon adapter
//!
//! The link resolver and the download orchestrator share one
//! `Arc<dyn ContentDaemon>`, opened by the pipeline controller at the start of
//! Stage2.

mod client;
mod types;

pub use client::{ContentDaemon, LbrynetClient};
pub use types::{claim_id_of, DaemonError, DaemonStatus, DownloadState, ResolvedClaim};
