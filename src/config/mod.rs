//! Configuration module for Sumi-Survey
//!
//! This module handles loading, parsing, and validating the TOML service
//! configuration. Per-job settings arrive with each crawl request instead; see
//! [`crate::crawler::CrawlRequest`].
//!
//! # Example
//!
//! ```no_run
//! use sumi_survey::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Workers per job: {}", config.crawler.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{CompletionPolicy, Config, CrawlerConfig, UserAgentConfig, WebhookSettings};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

pub(crate) use validation::validate_domain_pattern;
