use url::Url;

/// Scheme of native content-network URIs
pub const LBRY_SCHEME: &str = "lbry";

/// Checks if a host matches a domain pattern
///
/// This function supports two types of patterns:
/// 1. Exact match: "odysee.com" matches only "odysee.com"
/// 2. Wildcard match: "*.odysee.com" matches the bare domain and any
///    subdomain at any depth
///
/// # Examples
///
/// ```
/// use lbry_harvest::url::matches_wildcard;
///
/// assert!(matches_wildcard("odysee.com", "odysee.com"));
/// assert!(matches_wildcard("*.odysee.com", "player.odysee.com"));
/// assert!(!matches_wildcard("*.odysee.com", "notodysee.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || candidate
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => candidate == pattern,
    }
}

/// Decides whether a link points at the video-hosting platform
#[derive(Debug, Clone)]
pub struct HostingMatcher {
    patterns: Vec<String>,
}

impl HostingMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Returns true if `host` matches any configured pattern
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        self.patterns.iter().any(|p| matches_wildcard(p, host))
    }

    /// Returns true for `lbry:` URIs and HTTP(S) links on a hosting domain
    pub fn is_hosting_link(&self, url: &Url) -> bool {
        match url.scheme() {
            LBRY_SCHEME => true,
            "http" | "https" => url.host_str().is_some_and(|h| self.matches_host(h)),
            _ => false,
        }
    }
}
