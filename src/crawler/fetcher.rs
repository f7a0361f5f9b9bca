//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the page walker, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests returning the page body
//! - Error classification for the retry policy

use crate::config::{CrawlerConfig, UserAgentConfig};
use crate::retry::IsRetryable;
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, StatusCode};
use thiserror::Error;
use url::Url;

/// Errors from fetching a page
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to read body of {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } | Self::Body { .. } => true,
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            Self::Request { .. } => false,
        }
    }
}

impl FetchError {
    fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            Self::Timeout { url }
        } else if err.is_connect() {
            Self::Connect {
                url,
                reason: err.to_string(),
            }
        } else {
            Self::Request {
                url,
                reason: err.to_string(),
            }
        }
    }
}

/// Source of HTML documents
///
/// The walker only talks to the network through this trait, so tests can
/// serve canned pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetches `url` and returns the response body
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use lbry_harvest::config::{CrawlerConfig, UserAgentConfig};
/// use lbry_harvest::crawler::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default(), &CrawlerConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    crawler: &CrawlerConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(crawler.request_timeout())
        .connect_timeout(crawler.connect_timeout())
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`PageSource`] backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(
        user_agent: &UserAgentConfig,
        crawler: &CrawlerConfig,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(user_agent, crawler)?))
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url.as_str())
            .header(reqwest::header::ACCEPT, "text/html")
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}
