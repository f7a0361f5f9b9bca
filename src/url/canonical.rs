//! Conversions between hosting-platform links and content-network URIs

use crate::url::hosting::{matches_wildcard, LBRY_SCHEME};
use url::Url;

/// Path fragment of the index site's outbound redirect links
const OUT_LINK_MARKER: &str = "/out/?u=";

/// Unwraps an outbound redirect (`/out/?u=<target>`) to its target
///
/// Returns None when `href` is not a redirect link or carries no target.
pub fn unwrap_out_link(base: &Url, href: &str) -> Option<String> {
    if !href.contains(OUT_LINK_MARKER) {
        return None;
    }

    let joined = base.join(href).ok()?;
    joined
        .query_pairs()
        .find(|(key, _)| key == "u")
        .map(|(_, value)| value.trim().to_string())
        .filter(|target| !target.is_empty())
}

/// Converts a hosting-platform URL to a canonical `lbry://` URI
///
/// `lbry://` URIs pass through with surrounding slashes trimmed. Odysee URLs
/// have each `name:id` path segment rewritten to `name#id`:
///
/// ```
/// use lbry_harvest::url::to_canonical_uri;
///
/// assert_eq!(
///     to_canonical_uri("https://odysee.com/@chan:1/name:2").as_deref(),
///     Some("lbry://@chan#1/name#2")
/// );
/// ```
///
/// Returns None for other hosts, Odysee's `/$/` application routes and
/// empty paths.
pub fn to_canonical_uri(external_url: &str) -> Option<String> {
    let external_url = external_url.trim();

    if let Some(rest) = strip_lbry_scheme(external_url) {
        let rest = rest.trim_matches('/');
        return (!rest.is_empty()).then(|| format!("lbry://{}", rest));
    }

    let url = Url::parse(external_url).ok()?;
    let host = url.host_str()?.to_lowercase();
    if !matches_wildcard("*.odysee.com", &host) {
        return None;
    }

    let mut segments = Vec::new();
    for raw in url.path().split('/').filter(|s| !s.is_empty()) {
        let segment = urlencoding::decode(raw).ok()?.into_owned();
        if segments.is_empty() && segment.starts_with('$') {
            return None;
        }
        segments.push(match segment.split_once(':') {
            Some((name, short_id)) if !segment.contains('#') => format!("{}#{}", name, short_id),
            _ => segment,
        });
    }

    if segments.is_empty() {
        return None;
    }

    Some(format!("lbry://{}", segments.join("/")))
}

fn strip_lbry_scheme(uri: &str) -> Option<&str> {
    let (scheme, rest) = uri.split_once("://")?;
    scheme.eq_ignore_ascii_case(LBRY_SCHEME).then_some(rest)
}
