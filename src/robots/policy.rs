//! Robots.txt policy for a single site
//!
//! Allow/deny matching is delegated to the robotstxt crate; `Crawl-delay`,
//! which that crate does not expose, is parsed here.

use robotstxt::DefaultMatcher;
use std::time::Duration;
use url::Url;

/// Upper bound applied to `Crawl-delay` values
pub const MAX_CRAWL_DELAY_SECS: f64 = 60.0;

/// Parsed robots.txt rules bound to our user agent token
#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    /// Raw robots.txt content (empty string means allow all)
    content: String,
    agent: String,
}

impl RobotsPolicy {
    /// Creates a policy from raw robots.txt content
    ///
    /// `agent` is the product token matched against `User-agent` lines
    /// (e.g. "lbry-harvest", not the full header value).
    pub fn from_content(content: &str, agent: &str) -> Self {
        Self {
            content: content.to_string(),
            agent: agent.to_string(),
        }
    }

    /// Creates a permissive policy that allows everything
    ///
    /// This is used when robots.txt cannot be fetched or checking is disabled.
    pub fn allow_all(agent: &str) -> Self {
        Self::from_content("", agent)
    }

    /// Checks if `url` may be fetched
    pub fn allows(&self, url: &Url) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, &self.agent, url.as_str())
    }

    /// Gets the crawl delay that applies to our agent
    ///
    /// A group naming our agent takes precedence over the `*` group.
    pub fn crawl_delay(&self) -> Option<Duration> {
        let agent = self.agent.to_lowercase();
        let mut group: Vec<String> = Vec::new();
        let mut in_rules = false;
        let mut for_agent: Option<f64> = None;
        let mut for_wildcard: Option<f64> = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group
                    if in_rules {
                        group.clear();
                        in_rules = false;
                    }
                    group.push(value.to_lowercase());
                }
                "crawl-delay" => {
                    in_rules = true;
                    let Ok(delay) = value.parse::<f64>() else {
                        continue;
                    };
                    if !delay.is_finite() || delay < 0.0 {
                        continue;
                    }
                    if group.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                        for_agent = Some(delay);
                    } else if group.iter().any(|ua| ua == "*") {
                        for_wildcard = Some(delay);
                    }
                }
                _ => in_rules = true,
            }
        }

        for_agent
            .or(for_wildcard)
            .map(|delay| Duration::from_secs_f64(delay.min(MAX_CRAWL_DELAY_SECS)))
    }
}
