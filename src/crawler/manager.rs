//! Job registry and crawl orchestration
//!
//! The manager owns every job of the service. Starting a job spawns a driver
//! task that:
//!
//! 1. runs the plugins' `before_crawl` hooks and emits `started`
//! 2. seeds the job's frontier with the root URL
//! 3. runs a pool of workers that pull entries, render and analyze pages, and
//!    feed discovered links back into the frontier
//! 4. once the frontier is drained, runs `after_crawl` and `summarize`, applies
//!    the completion policy and emits `completed` or `failed`
//!
//! Page and plugin errors are recorded on the job and never abort it.

use crate::config::{CompletionPolicy, Config, CrawlerConfig};
use crate::crawler::{
    CrawlJob, CrawlRequest, ErrorRecord, JobError, JobId, JobSpec, JobStatus, PageOutcome,
    PageRunner, RunError, TargetConfig,
};
use crate::frontier::{Frontier, FrontierEntry, InFlight};
use crate::plugin::{JobContext, PluginFailure, PluginPipeline};
use crate::renderer::Renderer;
use crate::webhook::{WebhookDispatcher, WebhookEvent};
use crate::SurveyError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};

const CANCEL_MESSAGE: &str = "crawl cancelled by request";

/// Live state of one job
#[derive(Debug)]
struct JobEntry {
    record: Mutex<CrawlJob>,
    frontier: Arc<Frontier>,
    cancelled: AtomicBool,
}

impl JobEntry {
    fn record(&self) -> MutexGuard<'_, CrawlJob> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inner {
    config: CrawlerConfig,
    pipeline: Arc<PluginPipeline>,
    runner: PageRunner,
    dispatcher: WebhookDispatcher,
    jobs: Mutex<HashMap<JobId, Arc<JobEntry>>>,
    active: AtomicUsize,
    idle: Notify,
    shutting_down: AtomicBool,
}

/// Owns the crawl jobs of a service
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    /// Starts the service: builds the webhook dispatcher and initializes the
    /// plugins
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        config: &Config,
        pipeline: PluginPipeline,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self, SurveyError> {
        let dispatcher = WebhookDispatcher::new(&config.webhook)?;

        for failure in pipeline.initialize_all() {
            tracing::error!("Plugin initialization failed: {}", failure);
        }

        let pipeline = Arc::new(pipeline);
        let runner = PageRunner::new(
            renderer,
            Arc::clone(&pipeline),
            config.crawler.navigation_timeout(),
        );

        tracing::info!(
            "Job manager started: {} worker(s) per job, plugins: [{}]",
            config.crawler.workers,
            pipeline.names().join(", ")
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config: config.crawler.clone(),
                pipeline,
                runner,
                dispatcher,
                jobs: Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
                idle: Notify::new(),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    /// Registers a pending job
    pub fn create_job(&self, spec: JobSpec) -> Result<JobId, JobError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(JobError::ShuttingDown);
        }

        let frontier = Frontier::new(spec.target.max_depth, spec.target.max_pages);
        let job = CrawlJob::new(spec.target, spec.webhook);
        let id = job.id;

        tracing::info!(
            "Created job {} for {} (max depth {}, max pages {})",
            id,
            job.target.root_url,
            job.target.max_depth,
            job.target.max_pages
        );

        self.inner.jobs().insert(
            id,
            Arc::new(JobEntry {
                record: Mutex::new(job),
                frontier: Arc::new(frontier),
                cancelled: AtomicBool::new(false),
            }),
        );
        Ok(id)
    }

    /// Starts a pending job on a background task
    ///
    /// The returned handle resolves to the final job snapshot. A job can be
    /// started once; later calls fail with [`JobError::AlreadyStarted`].
    pub fn start_job(&self, id: JobId) -> Result<JoinHandle<CrawlJob>, JobError> {
        // Counted before the flag is read so shutdown either sees this job or
        // this call sees the flag.
        let guard = ActiveJob::enter(Arc::clone(&self.inner));
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(JobError::ShuttingDown);
        }

        let entry = self.inner.entry(id)?;
        {
            let mut job = entry.record();
            if job.status != JobStatus::Pending {
                return Err(JobError::AlreadyStarted {
                    id,
                    status: job.status,
                });
            }
            job.transition(JobStatus::Running)?;
        }

        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move {
            let _guard = guard;
            inner.drive(entry).await
        }))
    }

    /// Validates a trigger request, creates the job and starts it
    ///
    /// Returns as soon as the job is running; progress is observable through
    /// [`status`](Self::status) and the job's webhook.
    pub fn submit(&self, request: &CrawlRequest) -> Result<JobId, SurveyError> {
        let spec = request.resolve(&self.inner.config)?;
        let id = self.create_job(spec)?;
        self.start_job(id)?;
        Ok(id)
    }

    /// Starts a job and waits for it to finish
    pub async fn run_job(&self, id: JobId) -> Result<CrawlJob, JobError> {
        self.start_job(id)?.await.map_err(|e| {
            tracing::error!("Driver task of job {} failed: {}", id, e);
            JobError::Aborted(id)
        })
    }

    /// Snapshot of a job
    pub fn status(&self, id: JobId) -> Result<CrawlJob, JobError> {
        Ok(self.inner.entry(id)?.record().clone())
    }

    /// Snapshots of all jobs, oldest first
    pub fn list(&self) -> Vec<CrawlJob> {
        let entries: Vec<Arc<JobEntry>> = self.inner.jobs().values().cloned().collect();
        let mut jobs: Vec<CrawlJob> = entries.iter().map(|e| e.record().clone()).collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Drops a finished job from the registry and returns its final snapshot
    ///
    /// Pending and running jobs stay registered and fail with
    /// [`JobError::NotFinished`].
    pub fn remove(&self, id: JobId) -> Result<CrawlJob, JobError> {
        let mut jobs = self.inner.jobs();
        let entry = jobs.get(&id).ok_or(JobError::NotFound(id))?;

        let job = entry.record().clone();
        if !job.status.is_terminal() {
            return Err(JobError::NotFinished {
                id,
                status: job.status,
            });
        }

        jobs.remove(&id);
        tracing::debug!("Removed job {} ({})", id, job.status);
        Ok(job)
    }

    /// Cancels a job
    ///
    /// A pending job fails immediately. A running job stops dequeueing: pages
    /// already being analyzed finish, then the job fails with a cancellation
    /// record. Cancelling a finished job is an error.
    pub fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let entry = self.inner.entry(id)?;
        let mut job = entry.record();

        match job.status {
            JobStatus::Pending => {
                job.errors.push(ErrorRecord::Cancelled {
                    message: CANCEL_MESSAGE.to_string(),
                });
                job.transition(JobStatus::Failed)?;
                entry.frontier.close();
                tracing::info!("Cancelled pending job {}", id);
                self.inner.emit(&job, WebhookEvent::failed);
                Ok(())
            }
            JobStatus::Running => {
                if !entry.cancelled.swap(true, Ordering::SeqCst) {
                    entry.frontier.close();
                    tracing::info!(
                        "Cancelling job {}: waiting for {} in-flight page(s)",
                        id,
                        entry.frontier.in_flight()
                    );
                }
                Ok(())
            }
            status => Err(JobError::InvalidTransition {
                from: status,
                to: JobStatus::Failed,
            }),
        }
    }

    /// Stops accepting jobs, waits for running jobs, tears the plugins down and
    /// drains pending webhook deliveries
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        loop {
            let notified = self.inner.idle.notified();
            let active = self.inner.active.load(Ordering::SeqCst);
            if active == 0 {
                break;
            }
            tracing::info!("Waiting for {} running job(s) to finish", active);
            notified.await;
        }

        let pipeline = Arc::clone(&self.inner.pipeline);
        let failures = blocking(move || pipeline.destroy_all()).await;
        for failure in failures {
            tracing::error!("Plugin teardown failed: {}", failure);
        }

        self.inner.dispatcher.shutdown().await;
        tracing::info!("Job manager stopped");
    }

    /// The service's webhook dispatcher, for delivery statistics
    pub fn dispatcher(&self) -> &WebhookDispatcher {
        &self.inner.dispatcher
    }

    pub fn pipeline(&self) -> &PluginPipeline {
        &self.inner.pipeline
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("jobs", &self.inner.jobs().len())
            .field("active", &self.inner.active.load(Ordering::SeqCst))
            .finish()
    }
}

impl Inner {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Arc<JobEntry>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, id: JobId) -> Result<Arc<JobEntry>, JobError> {
        self.jobs().get(&id).cloned().ok_or(JobError::NotFound(id))
    }

    /// Queues an event for the job's webhook, if it has one
    ///
    /// Called with the job locked so events leave in state order.
    fn emit(&self, job: &CrawlJob, event: impl FnOnce(&CrawlJob) -> WebhookEvent) {
        if let Some(webhook) = &job.webhook {
            self.dispatcher.dispatch(webhook, event(job));
        }
    }

    async fn drive(self: Arc<Self>, entry: Arc<JobEntry>) -> CrawlJob {
        let (context, target) = {
            let job = entry.record();
            let context = JobContext {
                job_id: job.id,
                root_url: job.target.root_url.clone(),
                max_depth: job.target.max_depth,
                max_pages: job.target.max_pages,
            };
            (context, job.target.clone())
        };
        let started = std::time::Instant::now();
        tracing::info!("Starting crawl job {} for {}", context.job_id, target.root_url);

        let pipeline = Arc::clone(&self.pipeline);
        let hook_context = context.clone();
        let failures = blocking(move || pipeline.run_before_crawl(&hook_context)).await;
        {
            let mut job = entry.record();
            record_plugin_failures(&mut job, failures);
            self.emit(&job, WebhookEvent::started);
        }

        let admission = entry.frontier.enqueue(target.root_url.as_str(), 0, None);
        if !admission.is_accepted() {
            tracing::warn!(
                "Root URL {} of job {} not admitted: {:?}",
                target.root_url,
                context.job_id,
                admission
            );
        }

        let pool = pool_size(self.config.workers, &entry.frontier);
        tracing::debug!("Job {} runs {} worker(s)", context.job_id, pool);

        let mut workers = JoinSet::new();
        for worker_id in 0..pool {
            workers.spawn(worker(
                worker_id,
                Arc::clone(&self),
                Arc::clone(&entry),
                target.clone(),
            ));
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!("Worker of job {} failed: {}", context.job_id, e);
            }
        }

        let job = self.finish(&entry, &context).await;
        tracing::info!(
            "Job {} {} in {:.2}s: {} page(s) analyzed, {} error(s)",
            job.id,
            job.status,
            started.elapsed().as_secs_f64(),
            job.pages.len(),
            job.errors.len()
        );
        job
    }

    async fn finish(&self, entry: &JobEntry, context: &JobContext) -> CrawlJob {
        let pipeline = Arc::clone(&self.pipeline);
        let hook_context = context.clone();
        let failures = blocking(move || pipeline.run_after_crawl(&hook_context)).await;

        let pages = {
            let mut job = entry.record();
            record_plugin_failures(&mut job, failures);
            job.pages.clone()
        };

        let pipeline = Arc::clone(&self.pipeline);
        let summary = blocking(move || pipeline.run_summarize(&pages)).await;

        let mut job = entry.record();
        job.summary = Some(summary);

        let outcome = if entry.cancelled.load(Ordering::SeqCst) {
            Some(ErrorRecord::Cancelled {
                message: CANCEL_MESSAGE.to_string(),
            })
        } else if job.pages.is_empty() {
            Some(ErrorRecord::NoSuccessfulPages {
                attempted: job.failed_pages(),
            })
        } else if self.config.completion_policy == CompletionPolicy::AllPages
            && job.failed_pages() > 0
        {
            Some(ErrorRecord::IncompleteCrawl {
                failed: job.failed_pages(),
            })
        } else {
            None
        };

        let next = match outcome {
            Some(record) => {
                tracing::warn!("Job {} failed: {}", job.id, record);
                job.errors.push(record);
                JobStatus::Failed
            }
            None => JobStatus::Completed,
        };

        if let Err(e) = job.transition(next) {
            tracing::error!("Job {} could not finish: {}", job.id, e);
        } else {
            self.emit(&job, WebhookEvent::finished);
        }

        job.clone()
    }
}

/// Number of workers for a freshly seeded job
///
/// A job never runs more pages than its cap, so workers beyond the queued
/// entries plus the remaining capacity would only sit idle.
fn pool_size(configured: u32, frontier: &Frontier) -> u32 {
    let reachable = frontier.len().saturating_add(frontier.remaining_capacity());
    let reachable = u32::try_from(reachable).unwrap_or(u32::MAX);
    configured.min(reachable).max(1)
}

/// Pulls entries until the frontier is drained or closed
async fn worker(worker_id: u32, inner: Arc<Inner>, entry: Arc<JobEntry>, target: TargetConfig) {
    let frontier = Arc::clone(&entry.frontier);

    while let Some(next) = frontier.next().await {
        let _in_flight = InFlight::new(&frontier);
        tracing::trace!("Worker {} took {}", worker_id, next.url);
        let outcome = inner.runner.run(&next, &target).await;
        record_outcome(&inner, &entry, &next, outcome);
    }

    tracing::trace!("Worker {} finished", worker_id);
}

/// Feeds discovered links to the frontier and records the page
///
/// Runs before the entry is completed so the frontier never looks drained
/// while this page's links are still pending.
fn record_outcome(
    inner: &Inner,
    entry: &JobEntry,
    page: &FrontierEntry,
    outcome: Result<PageOutcome, RunError>,
) {
    let record = match outcome {
        Ok(outcome) => {
            for link in &outcome.links {
                entry
                    .frontier
                    .enqueue(link.as_str(), page.depth + 1, Some(&page.url));
            }
            Ok(outcome.result)
        }
        Err(e) => {
            tracing::warn!("Page {} failed: {}", page.url, e);
            Err(ErrorRecord::render(&e.into_render_error(), page.depth))
        }
    };

    let mut job = entry.record();
    match record {
        Ok(result) => job.pages.push(result),
        Err(error) => job.errors.push(error),
    }

    let analyzed = job.pages_analyzed();
    let total = entry.frontier.accepted();
    inner.emit(&job, |job| {
        WebhookEvent::progress(job.id, analyzed, total, page.url.as_str())
    });
}

fn record_plugin_failures(job: &mut CrawlJob, failures: Vec<PluginFailure>) {
    job.errors
        .extend(failures.into_iter().map(ErrorRecord::Plugin));
}

/// Runs synchronous plugin work off the async workers
async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Default + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(e) => {
            tracing::error!("Plugin task did not finish: {}", e);
            T::default()
        }
    }
}

/// Counts a running job for [`JobManager::shutdown`]
struct ActiveJob {
    inner: Arc<Inner>,
}

impl ActiveJob {
    fn enter(inner: Arc<Inner>) -> Self {
        inner.active.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.idle.notify_waiters();
    }
}
