//! Robots.txt handling module
//!
//! The index site's robots.txt is fetched once per walk. Disallowed post URLs
//! are recorded as skipped, and `Crawl-delay` raises the minimum spacing
//! between requests.

mod policy;

pub use policy::RobotsPolicy;

use crate::crawler::PageSource;
use url::Url;

/// Fetches robots.txt for the site that serves `site_url`
///
/// Any failure (missing file, network error, non-2xx status) yields a policy
/// that allows everything.
pub async fn fetch_robots(source: &dyn PageSource, site_url: &Url, agent: &str) -> RobotsPolicy {
    let robots_url = match site_url.join("/robots.txt") {
        Ok(url) => url,
        Err(e) => {
            tracing::debug!("Cannot build robots.txt URL for {}: {}", site_url, e);
            return RobotsPolicy::allow_all(agent);
        }
    };

    match source.fetch(&robots_url).await {
        Ok(content) => {
            tracing::debug!("Loaded robots.txt from {}", robots_url);
            RobotsPolicy::from_content(&content, agent)
        }
        Err(e) => {
            tracing::debug!("No usable robots.txt at {} ({}), allowing all", robots_url, e);
            RobotsPolicy::allow_all(agent)
        }
    }
}
