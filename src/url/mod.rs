//! URL handling module for Sumi-Survey
//!
//! This module provides URL canonicalization, wildcard host matching, and the
//! per-job link policy that decides which discovered links are followed.

mod matcher;
mod normalize;

use serde::{Deserialize, Serialize};
use url::Url;

// Re-export main functions
pub use matcher::matches_wildcard;
pub use normalize::normalize_url;

/// Extracts the lowercase host from a URL
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Decides which outbound links of a page are eligible for the frontier
///
/// A link is followed when it shares the root URL's origin (scheme, host and
/// port) and `same_origin` is set, or when its host matches one of the `allow`
/// patterns. With `same_origin` off and no patterns, no link is followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkPolicy {
    /// Follow links on the root URL's origin
    pub same_origin: bool,

    /// Additional host patterns (`example.com` or `*.example.com`)
    pub allow: Vec<String>,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            same_origin: true,
            allow: Vec::new(),
        }
    }
}

impl LinkPolicy {
    /// Returns true if `candidate` may be crawled for a job rooted at `root`
    pub fn permits(&self, root: &Url, candidate: &Url) -> bool {
        if self.same_origin && root.origin() == candidate.origin() {
            return true;
        }

        match extract_domain(candidate) {
            Some(host) => self
                .allow
                .iter()
                .any(|pattern| matches_wildcard(&pattern.to_lowercase(), &host)),
            None => false,
        }
    }
}
