use crate::crawler::{PageResult, TargetConfig};
use crate::frontier::FrontierEntry;
use crate::plugin::PluginPipeline;
use crate::renderer::{RenderError, Renderer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Extra time a renderer gets past its navigation timeout before the runner
/// gives up on it
const RENDER_GRACE: Duration = Duration::from_millis(500);

/// Why a page produced no result
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Page run for {url} aborted: {message}")]
    Aborted { url: String, message: String },
}

impl RunError {
    pub fn url(&self) -> &str {
        match self {
            Self::Render(e) => e.url(),
            Self::Aborted { url, .. } => url,
        }
    }

    /// Converts to a render error for the job's error list
    pub fn into_render_error(self) -> RenderError {
        match self {
            Self::Render(e) => e,
            Self::Aborted { url, message } => RenderError::Crashed { url, message },
        }
    }
}

/// A successfully analyzed page and the links to offer the frontier
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub result: PageResult,

    /// Outbound links permitted by the job's link policy; empty at max depth
    pub links: Vec<Url>,
}

/// Drives one page through rendering and the plugin hooks
///
/// A page gets exactly one render attempt.
#[derive(Clone)]
pub struct PageRunner {
    renderer: Arc<dyn Renderer>,
    pipeline: Arc<PluginPipeline>,
    navigation_timeout: Duration,
}

impl PageRunner {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        pipeline: Arc<PluginPipeline>,
        navigation_timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            pipeline,
            navigation_timeout,
        }
    }

    pub async fn run(
        &self,
        entry: &FrontierEntry,
        target: &TargetConfig,
    ) -> Result<PageOutcome, RunError> {
        let url = entry.url.clone();
        tracing::debug!("Rendering {} (depth {})", url, entry.depth);

        let started = Instant::now();
        let page = self.render(&url).await?;
        let load_time = started.elapsed();

        let links = if entry.depth >= target.max_depth {
            Vec::new()
        } else {
            page.links
                .iter()
                .filter(|link| target.link_policy.permits(&target.root_url, link))
                .cloned()
                .collect()
        };

        // Plugin hooks are synchronous and may be CPU-heavy
        let pipeline = Arc::clone(&self.pipeline);
        let evaluation = tokio::task::spawn_blocking(move || pipeline.run_page_hooks(&page, load_time))
            .await
            .map_err(|e| RunError::Aborted {
                url: url.to_string(),
                message: format!("plugin hooks did not finish: {}", e),
            })?;

        tracing::debug!(
            "Analyzed {} in {}ms: {} metric(s), {} plugin error(s), {} link(s)",
            url,
            load_time.as_millis(),
            evaluation.metrics.len(),
            evaluation.errors.len(),
            links.len()
        );

        Ok(PageOutcome {
            result: PageResult {
                url: url.to_string(),
                depth: entry.depth,
                parent: entry.parent.as_ref().map(Url::to_string),
                load_time_ms: load_time.as_millis() as u64,
                metrics: evaluation.metrics,
                errors: evaluation.errors,
            },
            links,
        })
    }

    /// Renders on a separate task so a panicking renderer is reported as a
    /// crash instead of tearing down the worker
    async fn render(&self, url: &Url) -> Result<crate::renderer::Page, RenderError> {
        let renderer = Arc::clone(&self.renderer);
        let timeout = self.navigation_timeout;
        let target = url.clone();
        let task = tokio::spawn(async move { renderer.render(&target, timeout).await });

        match tokio::time::timeout(timeout + RENDER_GRACE, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RenderError::Crashed {
                url: url.to_string(),
                message: if e.is_panic() {
                    "renderer panicked".to_string()
                } else {
                    e.to_string()
                },
            }),
            Err(_) => Err(RenderError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for PageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRunner")
            .field("pipeline", &self.pipeline)
            .field("navigation_timeout", &self.navigation_timeout)
            .finish()
    }
}
