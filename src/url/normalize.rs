use crate::UrlError;
use url::Url;

/// Query parameters that only carry tracking data
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "ref"];

/// Resolves an href found on `base` and normalizes it into a catalog key
///
/// Relative hrefs are joined against the page they were found on.
pub fn resolve_href(base: &Url, href: &str) -> Result<Url, UrlError> {
    let joined = base
        .join(href.trim())
        .map_err(|e| UrlError::Parse(format!("{}: {}", href, e)))?;
    normalize_url(joined.as_str())
}

/// Normalizes a post URL so the same post always maps to the same catalog key
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed or not HTTP(S)
/// 2. Lowercase the host and remove a `www.` prefix
/// 3. Remove dot segments, duplicate slashes and a trailing slash
/// 4. Remove the fragment
/// 5. Remove tracking query parameters and sort the rest
///
/// The scheme is kept as given: the index site is HTTPS in production but
/// local mock servers are plain HTTP.
///
/// # Examples
///
/// ```
/// use lbry_harvest::url::normalize_url;
///
/// let url = normalize_url("https://WWW.GUNCADINDEX.COM/detail/42/").unwrap();
/// assert_eq!(url.as_str(), "https://guncadindex.com/detail/42");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    if let Some(bare) = host.strip_prefix("www.") {
        let bare = bare.to_string();
        url.set_host(Some(&bare))
            .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
    }

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
