//! Crawl trigger requests
//!
//! A trigger names a target domain and carries an optional JSON body:
//!
//! ```json
//! {"maxDepth": 1, "maxPages": 10, "sameOrigin": true, "allow": ["*.example.com"],
//!  "webhook": {"url": "https://hooks.example.com/", "headers": {}, "retries": 3, "on": ["completed"]}}
//! ```

use crate::config::{validate_domain_pattern, CrawlerConfig};
use crate::url::{normalize_url, LinkPolicy};
use crate::webhook::WebhookConfig;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use url::Url;

/// Optional per-job settings of a trigger body
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CrawlOptions {
    pub max_depth: Option<u32>,
    pub max_pages: Option<usize>,
    pub same_origin: Option<bool>,
    #[serde(default)]
    pub allow: Vec<String>,
    pub webhook: Option<WebhookConfig>,
}

/// A request to crawl one site
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlRequest {
    /// Target domain or URL as given by the caller
    pub target: String,
    pub options: CrawlOptions,
}

/// What and how far a job crawls
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    /// Canonical root URL
    pub root_url: Url,
    pub max_depth: u32,
    pub max_pages: usize,
    pub link_policy: LinkPolicy,
}

/// A validated request, ready to become a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub target: TargetConfig,
    pub webhook: Option<WebhookConfig>,
}

impl CrawlRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            options: CrawlOptions::default(),
        }
    }

    /// Builds a request from a target and a JSON body
    ///
    /// An empty or whitespace-only body means "all defaults".
    pub fn from_json(target: impl Into<String>, body: &str) -> ConfigResult<Self> {
        let options = if body.trim().is_empty() {
            CrawlOptions::default()
        } else {
            serde_json::from_str(body)?
        };

        Ok(Self {
            target: target.into(),
            options,
        })
    }

    /// Validates the request and fills in service defaults
    ///
    /// A bare domain such as `example.com` is crawled over HTTPS.
    pub fn resolve(&self, defaults: &CrawlerConfig) -> ConfigResult<JobSpec> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(ConfigError::InvalidUrl("target cannot be empty".to_string()));
        }

        let raw = if target.contains("://") {
            target.to_string()
        } else {
            format!("https://{}", target)
        };
        let root_url = normalize_url(&raw)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid target '{}': {}", target, e)))?;

        for pattern in &self.options.allow {
            validate_domain_pattern(pattern)?;
        }

        if let Some(webhook) = &self.options.webhook {
            webhook
                .validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
        }

        Ok(JobSpec {
            target: TargetConfig {
                root_url,
                max_depth: self.options.max_depth.unwrap_or(defaults.default_max_depth),
                max_pages: self.options.max_pages.unwrap_or(defaults.default_max_pages),
                link_policy: LinkPolicy {
                    same_origin: self.options.same_origin.unwrap_or(true),
                    allow: self.options.allow.clone(),
                },
            },
            webhook: self.options.webhook.clone(),
        })
    }
}
