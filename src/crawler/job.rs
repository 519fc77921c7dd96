//! Crawl job records and the job state machine

use crate::crawler::TargetConfig;
use crate::plugin::{CrawlSummary, PageMetrics, PluginFailure};
use crate::renderer::RenderError;
use crate::webhook::WebhookConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Opaque unique identifier of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a crawl job
///
/// Transitions only move forward: `Pending -> Running -> {Completed, Failed}`,
/// plus `Pending -> Failed` for a job cancelled before it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet started
    Pending,

    /// Workers are crawling
    Running,

    /// Finished according to the completion policy
    Completed,

    /// Finished without meeting the completion policy, or cancelled
    Failed,
}

impl JobStatus {
    /// Returns true for `Completed` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis output for one successfully rendered page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    /// Canonical URL of the page
    pub url: String,

    /// Link distance from the root
    pub depth: u32,

    /// Page the URL was discovered on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Time the renderer took to load the page
    #[serde(rename = "loadTime")]
    pub load_time_ms: u64,

    /// Metric record per plugin
    pub metrics: PageMetrics,

    /// Plugin failures on this page
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PluginFailure>,
}

/// An error accumulated by a job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ErrorRecord {
    /// A page could not be rendered
    #[serde(rename_all = "camelCase")]
    Render {
        url: String,
        depth: u32,
        message: String,
    },

    /// A job-level plugin hook failed
    Plugin(PluginFailure),

    /// The job was cancelled
    Cancelled { message: String },

    /// No page was analyzed successfully
    NoSuccessfulPages { attempted: usize },

    /// Some pages failed under the all-pages completion policy
    IncompleteCrawl { failed: usize },
}

impl ErrorRecord {
    pub(crate) fn render(error: &RenderError, depth: u32) -> Self {
        Self::Render {
            url: error.url().to_string(),
            depth,
            message: error.to_string(),
        }
    }

    /// Returns true for the marker a cancelled job carries
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render { message, .. } => f.write_str(message),
            Self::Plugin(failure) => failure.fmt(f),
            Self::Cancelled { message } => write!(f, "cancelled: {}", message),
            Self::NoSuccessfulPages { attempted } => {
                write!(f, "no page analyzed successfully ({} attempted)", attempted)
            }
            Self::IncompleteCrawl { failed } => write!(f, "{} page(s) failed", failed),
        }
    }
}

/// Errors returned by job management operations
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {id} cannot be started: it is {status}")]
    AlreadyStarted { id: JobId, status: JobStatus },

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job {id} is still {status}")]
    NotFinished { id: JobId, status: JobStatus },

    #[error("Job manager is shutting down")]
    ShuttingDown,

    #[error("Job {0} task aborted")]
    Aborted(JobId),
}

/// A crawl job and everything it has accumulated
///
/// Snapshots handed out by the manager are clones; the live record sits
/// behind the manager's lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlJob {
    pub id: JobId,

    pub target: TargetConfig,

    #[serde(skip)]
    pub webhook: Option<Arc<WebhookConfig>>,

    pub status: JobStatus,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Successfully analyzed pages, in completion order
    pub pages: Vec<PageResult>,

    /// Page failures and job-level errors, in the order they happened
    pub errors: Vec<ErrorRecord>,

    /// Site summary, set once the job finishes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<CrawlSummary>,
}

impl CrawlJob {
    pub fn new(target: TargetConfig, webhook: Option<WebhookConfig>) -> Self {
        Self {
            id: JobId::new(),
            target,
            webhook: webhook.map(Arc::new),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            pages: Vec::new(),
            errors: Vec::new(),
            summary: None,
        }
    }

    /// Moves the job to `next`, stamping start and finish times
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == JobStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Number of pages processed so far, successful or not
    pub fn pages_analyzed(&self) -> usize {
        self.pages.len() + self.failed_pages()
    }

    /// Number of pages that failed to render
    pub fn failed_pages(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| matches!(e, ErrorRecord::Render { .. }))
            .count()
    }

    /// Returns true if the job was cancelled
    pub fn was_cancelled(&self) -> bool {
        self.errors.iter().any(ErrorRecord::is_cancellation)
    }

    /// Wall-clock run time, once the job has started
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - started)
    }
}
