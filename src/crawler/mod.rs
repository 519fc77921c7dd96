//! Crawl jobs
//!
//! This module contains the job side of the crawler:
//! - job records, statuses and the errors a job accumulates
//! - trigger requests and their validation into a job target
//! - the page runner that renders and analyzes one page
//! - the job manager that schedules workers over a job's frontier

mod job;
mod manager;
mod page_runner;
mod request;

pub use job::{CrawlJob, ErrorRecord, JobError, JobId, JobStatus, PageResult};
pub use manager::JobManager;
pub use page_runner::{PageOutcome, PageRunner, RunError};
pub use request::{CrawlOptions, CrawlRequest, JobSpec, TargetConfig};
