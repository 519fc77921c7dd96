use serde::Serialize;
use std::cmp::Ordering;
use url::Url;

/// A URL admitted to the frontier, waiting to be analyzed
#[derive(Debug, Clone, Serialize)]
pub struct FrontierEntry {
    /// Canonical URL of the page
    pub url: Url,

    /// Link distance from the root URL (root = 0)
    pub depth: u32,

    /// Page on which this URL was discovered
    pub parent: Option<Url>,

    /// Admission order within the job
    #[serde(skip)]
    pub(crate) seq: u64,
}

// BinaryHeap is a max-heap: shallower entries, then earlier admissions, sort
// as "greater" so they pop first.
impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .depth
            .cmp(&self.depth)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.depth == other.depth && self.seq == other.seq
    }
}

impl Eq for FrontierEntry {}
