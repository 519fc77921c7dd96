use crate::UrlError;
use url::Url;

/// Tracking query parameters dropped during canonicalization
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid"];

/// Normalizes a URL into its canonical form
///
/// Two URLs that address the same page produce the same canonical string, which
/// is what the frontier uses for deduplication. The canonical URL is still the
/// URL that gets rendered, so nothing that changes the addressed resource
/// (scheme, `www.` prefix, path case) is rewritten.
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Accept only `http` and `https`
/// 3. Lowercase the host and drop a default port (done by the parser)
/// 4. Normalize path:
///    - Remove dot segments (. and ..)
///    - Collapse repeated slashes
///    - Remove trailing slash (except for root /)
///    - Empty path becomes /
/// 5. Remove fragment (everything after #)
/// 6. Remove tracking query parameters (`utm_*`, `fbclid`, `gclid`, `mc_eid`)
/// 7. Sort remaining query parameters by key
/// 8. Remove empty query string (trailing ?)
///
/// # Examples
///
/// ```
/// use sumi_survey::url::normalize_url;
///
/// let url = normalize_url("HTTPS://Example.COM:443/docs/#intro").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/docs");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingDomain);
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
        return "/".to_string();
    }

    format!("/{}", segments.join("/"))
}

/// Filters out tracking parameters and sorts the rest by key
///
/// The sort is stable, so repeated keys keep their relative order.
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
