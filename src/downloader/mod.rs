//! Download orchestration (second half of Stage2)
//!
//! Each Resolved identifier is handed to the daemon with `get`, then polled
//! through `file_list` until the daemon reports it complete or failed. The
//! per-identifier state machine lives in [`InFlight`].

mod inflight;
mod orchestrator;

pub use inflight::{DownloadOutcome, InFlight, Phase};
pub use orchestrator::{DownloadOrchestrator, DownloadSummary};
