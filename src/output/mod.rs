//! Output module for job reports
//!
//! This module handles:
//! - Generating markdown reports of finished jobs
//! - Rendering job snapshots as JSON

mod markdown;

pub use markdown::{format_job_report, write_job_report};

use crate::crawler::CrawlJob;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to format output: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Renders a job snapshot as pretty-printed JSON
pub fn job_json(job: &CrawlJob) -> OutputResult<String> {
    serde_json::to_string_pretty(job).map_err(|e| OutputError::Format(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::TargetConfig;
    use crate::url::LinkPolicy;
    use url::Url;

    #[test]
    fn test_job_json_uses_wire_names() {
        let job = CrawlJob::new(
            TargetConfig {
                root_url: Url::parse("https://example.com/").unwrap(),
                max_depth: 1,
                max_pages: 5,
                link_policy: LinkPolicy::default(),
            },
            None,
        );
        let value: serde_json::Value = serde_json::from_str(&job_json(&job).unwrap()).unwrap();

        assert_eq!(value["status"], "pending");
        assert_eq!(value["target"]["rootUrl"], "https://example.com/");
        assert_eq!(value["target"]["linkPolicy"]["sameOrigin"], true);
        assert!(value.get("startedAt").is_none());
        assert!(value.get("webhook").is_none());
    }
}
