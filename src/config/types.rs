use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for lbry-harvest
///
/// Every section and field has a default, so an empty (or absent) file is a
/// valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub user_agent: UserAgentConfig,
    pub retry: RetryConfig,
    pub daemon: DaemonConfig,
    pub output: OutputConfig,
}

/// Which hosting link to keep when a post embeds several
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkSelection {
    #[default]
    First,
    Last,
}

/// Index walk configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Search page of the index site
    pub base_url: String,

    /// Query parameter carrying the page number
    pub page_param: String,

    pub start_page: u32,
    pub end_page: u32,

    /// Posts fetched concurrently within a page
    pub concurrency: usize,
    pub fast_concurrency: usize,

    /// Request spacing window (milliseconds)
    pub min_spacing_ms: u64,
    pub max_spacing_ms: u64,
    pub fast_min_spacing_ms: u64,
    pub fast_max_spacing_ms: u64,

    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,

    /// One element per post card on an index page
    pub post_container: String,

    /// Post link inside a card (the first match is used)
    pub post_link: String,

    /// Title element inside a card
    pub title_selector: String,

    /// Description text on a post page
    pub description_selector: String,

    /// Hosting-platform domain patterns (`*.` wildcards allowed)
    pub hosting_domains: Vec<String>,

    pub link_selection: LinkSelection,

    pub respect_robots: bool,

    /// Ignore the stored cursor and walk the whole range again
    pub rescan: bool,

    pub fast: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://guncadindex.com/search".to_string(),
            page_param: "page".to_string(),
            start_page: 1,
            end_page: 233,
            concurrency: 5,
            fast_concurrency: 10,
            min_spacing_ms: 1000,
            max_spacing_ms: 2000,
            fast_min_spacing_ms: 500,
            fast_max_spacing_ms: 1500,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            post_container: "div.grid-view-max".to_string(),
            post_link: "a[href]".to_string(),
            title_selector: r#"h2[class*="title"], h3[class*="title"], h4[class*="title"]"#
                .to_string(),
            description_selector: "div.description-container span.description-text".to_string(),
            hosting_domains: vec!["odysee.com".to_string(), "*.odysee.com".to_string()],
            link_selection: LinkSelection::First,
            respect_robots: true,
            rescan: false,
            fast: false,
        }
    }
}

impl CrawlerConfig {
    /// Post concurrency for the current mode
    pub fn effective_concurrency(&self) -> usize {
        if self.fast {
            self.fast_concurrency
        } else {
            self.concurrency
        }
    }

    /// Minimum and maximum request spacing for the current mode
    pub fn spacing(&self) -> (Duration, Duration) {
        let (min, max) = if self.fast {
            (self.fast_min_spacing_ms, self.fast_max_spacing_ms)
        } else {
            (self.min_spacing_ms, self.max_spacing_ms)
        };
        (Duration::from_millis(min), Duration::from_millis(max))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL or address with information about the operator
    pub contact: Option<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "lbry-harvest".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact: None,
        }
    }
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    pub fn header_value(&self) -> String {
        match &self.contact {
            Some(contact) => format!(
                "{}/{} (+{})",
                self.crawler_name, self.crawler_version, contact
            ),
            None => format!("{}/{}", self.crawler_name, self.crawler_version),
        }
    }
}

/// Backoff policy shared by every stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Total attempts per item, including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

/// `lbrynet` daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DaemonConfig {
    /// JSON-RPC endpoint
    pub endpoint: String,
    pub rpc_timeout_secs: u64,
    pub poll_interval_ms: u64,

    /// Longest a single download may stay in flight before it counts as failed
    pub download_timeout_secs: u64,

    pub download_dir: String,

    /// Downloads in flight at once
    pub concurrency: usize,

    /// Links resolved at once
    pub resolve_concurrency: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5279".to_string(),
            rpc_timeout_secs: 30,
            poll_interval_ms: 2000,
            download_timeout_secs: 3600,
            download_dir: "lbry_downloads".to_string(),
            concurrency: 3,
            resolve_concurrency: 4,
        }
    }
}

impl DaemonConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite catalog
    pub database_path: String,

    /// Where to write the JSON run report, if anywhere
    pub report_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "guncad.db".to_string(),
            report_path: None,
        }
    }
}
