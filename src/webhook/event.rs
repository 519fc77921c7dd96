use crate::crawler::{CrawlJob, ErrorRecord, JobId, PageResult};
use crate::plugin::CrawlSummary;
use crate::webhook::EventKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result block of a `completed` event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlOutput {
    pub pages: Vec<PageResult>,
    pub summary: CrawlSummary,
}

/// Kind-specific part of an event, tagged by `status` on the wire
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    Started {
        url: String,
        max_depth: u32,
        max_pages: usize,
    },

    #[serde(rename_all = "camelCase")]
    Progress {
        pages_analyzed: usize,
        total_pages: usize,
        current_url: String,
    },

    Completed { result: CrawlOutput },

    Failed {
        error: String,
        errors: Vec<ErrorRecord>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Started { .. } => EventKind::Started,
            Self::Progress { .. } => EventKind::Progress,
            Self::Completed { .. } => EventKind::Completed,
            Self::Failed { .. } => EventKind::Failed,
        }
    }
}

/// An immutable job notification
///
/// Serializes to the delivered body:
///
/// ```json
/// {"status": "progress", "jobId": "…", "timestamp": "2024-05-01T12:00:00Z",
///  "pagesAnalyzed": 3, "totalPages": 7, "currentUrl": "https://example.com/a"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    job_id: JobId,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    payload: EventPayload,
}

impl WebhookEvent {
    pub fn new(job_id: JobId, payload: EventPayload) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn started(job: &CrawlJob) -> Self {
        Self::new(
            job.id,
            EventPayload::Started {
                url: job.target.root_url.to_string(),
                max_depth: job.target.max_depth,
                max_pages: job.target.max_pages,
            },
        )
    }

    pub fn progress(job_id: JobId, pages_analyzed: usize, total_pages: usize, current_url: &str) -> Self {
        Self::new(
            job_id,
            EventPayload::Progress {
                pages_analyzed,
                total_pages,
                current_url: current_url.to_string(),
            },
        )
    }

    /// Builds the terminal event matching the job's final status
    pub fn finished(job: &CrawlJob) -> Self {
        if job.status == crate::crawler::JobStatus::Completed {
            Self::completed(job)
        } else {
            Self::failed(job)
        }
    }

    pub fn completed(job: &CrawlJob) -> Self {
        Self::new(
            job.id,
            EventPayload::Completed {
                result: CrawlOutput {
                    pages: job.pages.clone(),
                    summary: job.summary.clone().unwrap_or_default(),
                },
            },
        )
    }

    pub fn failed(job: &CrawlJob) -> Self {
        let error = job
            .errors
            .iter()
            .find(|e| e.is_cancellation())
            .or_else(|| job.errors.last())
            .map(ToString::to_string)
            .unwrap_or_else(|| "crawl failed".to_string());

        Self::new(
            job.id,
            EventPayload::Failed {
                error,
                errors: job.errors.clone(),
            },
        )
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}
