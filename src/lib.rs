//! lbry-harvest: a two-stage index crawler and LBRY downloader
//!
//! Stage1 walks the index pages of a content-indexing site, follows every post
//! and records the Odysee link it embeds in a durable SQLite catalog. Stage2
//! resolves those links to LBRY claim URIs through a local `lbrynet` daemon and
//! asks the daemon to download them, polling until each file is complete.
//! Both stages persist their progress in the catalog so interrupted runs resume
//! where they stopped.

pub mod config;
pub mod crawler;
pub mod daemon;
pub mod downloader;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for lbry-harvest operations
///
/// Per-item failures (a single post, link or download) are recorded on the
/// catalog entry and never reach this type. What does reach it is run-level:
/// the controller aborts the current stage when it sees one.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("HTML parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Unresolvable link {url}: {reason}")]
    UnresolvableLink { url: String, reason: String },

    #[error("Transient resolve error for {url}: {reason}")]
    TransientResolve { url: String, reason: String },

    #[error("lbrynet daemon unreachable at {endpoint}: {reason} (is `lbrynet start` running?)")]
    DaemonUnreachable { endpoint: String, reason: String },

    #[error("Daemon download error for {id}: {reason}")]
    DaemonDownload { id: String, reason: String },

    #[error("Stale transition for {post_url}: {from} -> {to}")]
    StaleTransition {
        post_url: String,
        from: state::EntryStatus,
        to: state::EntryStatus,
    },

    #[error("Catalog store error: {0}")]
    StoreIo(storage::StoreError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report serialization error: {0}")]
    Report(#[from] serde_json::Error),
}

impl From<storage::StoreError> for HarvestError {
    fn from(err: storage::StoreError) -> Self {
        match err {
            storage::StoreError::StaleTransition { post_url, from, to } => {
                Self::StaleTransition { post_url, from, to }
            }
            other => Self::StoreIo(other),
        }
    }
}

impl From<daemon::DaemonError> for HarvestError {
    fn from(err: daemon::DaemonError) -> Self {
        match err {
            daemon::DaemonError::Unreachable { endpoint, reason } => {
                Self::DaemonUnreachable { endpoint, reason }
            }
            other => Self::DaemonDownload {
                id: other.subject().to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl HarvestError {
    /// Returns true for conditions that must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DaemonUnreachable { .. }
                | Self::StoreIo(_)
                | Self::StaleTransition { .. }
                | Self::Config(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid CSS selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for lbry-harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::{PipelineController, RunOptions, StageSelection};
pub use state::{CrawlCursor, EntryStatus};
pub use storage::{CatalogEntry, CatalogHandle, CatalogStore, SqliteCatalog};
