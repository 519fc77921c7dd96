use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for Sumi-Survey
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

/// Crawl job defaults and worker pool sizing
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of concurrent page workers per job
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Navigation timeout handed to the renderer (milliseconds)
    #[serde(rename = "navigation-timeout-ms", default = "default_navigation_timeout")]
    pub navigation_timeout_ms: u64,

    /// Maximum depth used when a request does not set one
    #[serde(rename = "default-max-depth", default = "default_max_depth")]
    pub default_max_depth: u32,

    /// Maximum page count used when a request does not set one
    #[serde(rename = "default-max-pages", default = "default_max_pages")]
    pub default_max_pages: usize,

    /// Rule deciding between `completed` and `failed`
    #[serde(rename = "completion-policy", default)]
    pub completion_policy: CompletionPolicy,
}

impl CrawlerConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            navigation_timeout_ms: default_navigation_timeout(),
            default_max_depth: default_max_depth(),
            default_max_pages: default_max_pages(),
            completion_policy: CompletionPolicy::default(),
        }
    }
}

/// How a finished crawl is judged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionPolicy {
    /// `completed` if at least one page was analyzed
    #[default]
    AnySuccess,

    /// `completed` only if no page failed to render
    AllPages,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the `User-Agent` header value
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Service-wide webhook delivery settings
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    /// Timeout of a single delivery attempt (milliseconds)
    #[serde(rename = "request-timeout-ms", default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-backoff-ms", default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Upper bound on the delay between retries (milliseconds)
    #[serde(rename = "max-backoff-ms", default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl WebhookSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_workers() -> u32 {
    5
}

fn default_navigation_timeout() -> u64 {
    30_000
}

fn default_max_depth() -> u32 {
    2
}

fn default_max_pages() -> usize {
    50
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_base_backoff() -> u64 {
    1_000
}

fn default_max_backoff() -> u64 {
    30_000
}
