/// Checks if a host matches an allow pattern
///
/// This function supports two types of patterns:
/// 1. Exact match: "example.com" matches only "example.com"
/// 2. Wildcard match: "*.example.com" matches:
///    - "example.com" (the bare domain)
///    - "blog.example.com" (single subdomain)
///    - "api.v2.example.com" (nested subdomains)
///
/// Hosts are expected to be lowercase already; patterns are compared as given.
///
/// # Examples
///
/// ```
/// use sumi_survey::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(!matches_wildcard("example.com", "blog.example.com"));
///
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "myexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || candidate
                    .strip_suffix(base)
                    .map_or(false, |prefix| prefix.ends_with('.'))
        }
        None => candidate == pattern,
    }
}
