//! Webhook notifications
//!
//! Jobs emit a [`WebhookEvent`] at start, after every page, and once at the
//! end. The [`WebhookDispatcher`] delivers them off the crawl path: events of
//! one job are posted in the order they were emitted, failed posts are retried
//! with exponential backoff, and an event that exhausts its retries is dropped
//! and recorded without touching the job.

mod dispatcher;
mod event;

pub use dispatcher::{DeliveryFailure, DeliveryStats, WebhookDispatcher};
pub use event::{CrawlOutput, EventPayload, WebhookEvent};

use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

/// Errors raised while delivering or configuring webhooks
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("Receiver returned HTTP {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid webhook header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown event kind: {0}")]
    UnknownEvent(String),
}

/// Kind of job event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Started,
    Progress,
    Completed,
    Failed,
}

impl EventKind {
    pub fn all() -> [EventKind; 4] {
        [Self::Started, Self::Progress, Self::Completed, Self::Failed]
    }

    /// Returns true for the last event a job emits
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "started" => Ok(Self::Started),
            "progress" => Ok(Self::Progress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DeliveryError::UnknownEvent(other.to_string())),
        }
    }
}

/// Where and how a job's events are delivered
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Receiver URL
    pub url: Url,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Retries after the first failed attempt
    #[serde(default = "default_retries", alias = "maxRetries")]
    pub retries: u32,

    /// Subscribed event kinds; empty means all
    #[serde(default)]
    pub on: BTreeSet<EventKind>,
}

fn default_retries() -> u32 {
    3
}

impl WebhookConfig {
    /// A config subscribed to every event with the default retry count
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: BTreeMap::new(),
            retries: default_retries(),
            on: BTreeSet::new(),
        }
    }

    /// Returns true if events of `kind` should be delivered
    pub fn subscribes_to(&self, kind: EventKind) -> bool {
        self.on.is_empty() || self.on.contains(&kind)
    }

    /// Total delivery attempts per event
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Checks the URL scheme and that every header is sendable
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.url.scheme() != "http" && self.url.scheme() != "https" {
            return Err(DeliveryError::InvalidUrl(format!(
                "{} (expected http or https)",
                self.url
            )));
        }

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| DeliveryError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            HeaderValue::from_str(value).map_err(|e| DeliveryError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}
