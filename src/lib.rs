//! Sumi-Survey: a site survey crawler
//!
//! This crate crawls a website breadth-first, runs a pipeline of page analyzer
//! plugins against every visited page, aggregates their output into a per-site
//! summary, and reports job progress to webhook receivers.
//!
//! The main pieces are:
//! - [`frontier::Frontier`]: the deduplicating breadth-first URL queue of a job
//! - [`plugin::PluginPipeline`]: the ordered analyzer hooks, each isolated from the others
//! - [`crawler::PageRunner`]: renders one page and runs the page hooks over it
//! - [`crawler::JobManager`]: the job state machine and bounded worker pool
//! - [`webhook::WebhookDispatcher`]: retried, filtered event delivery

pub mod config;
pub mod crawler;
pub mod frontier;
pub mod output;
pub mod plugin;
pub mod renderer;
pub mod url;
pub mod webhook;

use thiserror::Error;

/// Main error type for Sumi-Survey operations
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Render error: {0}")]
    Render(#[from] renderer::RenderError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] plugin::PluginError),

    #[error("Job error: {0}")]
    Job(#[from] crawler::JobError),

    #[error("Webhook delivery error: {0}")]
    Delivery(#[from] webhook::DeliveryError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to parse crawl request: {0}")]
    Request(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for Sumi-Survey operations
pub type Result<T> = std::result::Result<T, SurveyError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlJob, CrawlRequest, JobId, JobManager, JobStatus};
pub use plugin::{Plugin, PluginPipeline};
pub use url::{normalize_url, LinkPolicy};
