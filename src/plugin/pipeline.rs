use crate::crawler::PageResult;
use crate::plugin::{
    CrawlSummary, HookKind, JobContext, MetricSample, PageMetrics, Plugin, PluginError,
    PluginFailure,
};
use crate::renderer::Page;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Summary error of a plugin whose `evaluate` never succeeded
const NO_EVALUATIONS: &str = "no successful evaluations";

/// Service-level lifecycle of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Registered,
    Initialized,
    Destroyed,
}

/// Output of the page-level hooks for one page
#[derive(Debug, Clone, Default)]
pub struct PageEvaluation {
    /// Metric record per plugin whose `evaluate` succeeded
    pub metrics: PageMetrics,

    /// Failures from `before_each`, `evaluate` and `after_each`
    pub errors: Vec<PluginFailure>,
}

/// Ordered set of enabled plugins
///
/// The pipeline is built once per service and shared by reference with every
/// job. `initialize_all` and `destroy_all` bracket the service lifetime and run
/// at most once each.
pub struct PluginPipeline {
    plugins: Vec<Plugin>,
    lifecycle: Mutex<Lifecycle>,
}

impl PluginPipeline {
    /// Builds a pipeline from plugins in registration order
    ///
    /// Disabled plugins are dropped. Names must be non-empty and unique across
    /// all registered plugins, enabled or not.
    pub fn new(plugins: impl IntoIterator<Item = Plugin>) -> Result<Self, PluginError> {
        let mut seen = HashSet::new();
        let mut enabled = Vec::new();

        for plugin in plugins {
            if plugin.name().trim().is_empty() {
                return Err(PluginError::EmptyName);
            }
            if !seen.insert(plugin.name().to_string()) {
                return Err(PluginError::DuplicateName(plugin.name().to_string()));
            }
            if plugin.is_enabled() {
                enabled.push(plugin);
            } else {
                tracing::debug!("Plugin '{}' is disabled, skipping", plugin.name());
            }
        }

        Ok(Self {
            plugins: enabled,
            lifecycle: Mutex::new(Lifecycle::Registered),
        })
    }

    /// Names of the enabled plugins, in run order
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(Plugin::name).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Runs every plugin's `initialize` hook
    ///
    /// Only the first call does anything; later calls log a warning.
    pub fn initialize_all(&self) -> Vec<PluginFailure> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if *lifecycle != Lifecycle::Registered {
                tracing::warn!("Plugin pipeline already initialized, ignoring");
                return Vec::new();
            }
            *lifecycle = Lifecycle::Initialized;
        }

        let failures = self.run_each(HookKind::Initialize, None, |plugin| {
            plugin.initialize.as_ref().map(|hook| hook())
        });
        tracing::info!(
            "Initialized {} plugin(s), {} failure(s)",
            self.plugins.len(),
            failures.len()
        );
        failures
    }

    /// Runs every plugin's `destroy` hook
    ///
    /// Only the first call does anything; later calls log a warning.
    pub fn destroy_all(&self) -> Vec<PluginFailure> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if *lifecycle == Lifecycle::Destroyed {
                tracing::warn!("Plugin pipeline already destroyed, ignoring");
                return Vec::new();
            }
            *lifecycle = Lifecycle::Destroyed;
        }

        self.run_each(HookKind::Destroy, None, |plugin| {
            plugin.destroy.as_ref().map(|hook| hook())
        })
    }

    /// Runs every plugin's `before_crawl` hook for a job
    pub fn run_before_crawl(&self, job: &JobContext) -> Vec<PluginFailure> {
        self.run_each(HookKind::BeforeCrawl, None, |plugin| {
            plugin.before_crawl.as_ref().map(|hook| hook(job))
        })
    }

    /// Runs every plugin's `after_crawl` hook for a job
    pub fn run_after_crawl(&self, job: &JobContext) -> Vec<PluginFailure> {
        self.run_each(HookKind::AfterCrawl, None, |plugin| {
            plugin.after_crawl.as_ref().map(|hook| hook(job))
        })
    }

    /// Runs the page-level hooks for one page
    ///
    /// All `before_each` hooks run first, then every `evaluate`, then all
    /// `after_each` hooks. A plugin whose `evaluate` fails contributes no metric
    /// record; the other plugins' records are unaffected.
    pub fn run_page_hooks(&self, page: &Page, load_time: Duration) -> PageEvaluation {
        let url = page.url.as_str();
        let mut evaluation = PageEvaluation::default();

        evaluation
            .errors
            .extend(self.run_each(HookKind::BeforeEach, Some(url), |plugin| {
                plugin.before_each.as_ref().map(|hook| hook(page))
            }));

        for plugin in &self.plugins {
            let outcome = guard(plugin.name(), HookKind::Evaluate, Some(url), || {
                (plugin.evaluate)(page, load_time)
            });
            match outcome {
                Ok(metrics) => {
                    evaluation.metrics.insert(plugin.name().to_string(), metrics);
                }
                Err(failure) => evaluation.errors.push(failure),
            }
        }

        let metrics = &evaluation.metrics;
        let after = self.run_each(HookKind::AfterEach, Some(url), |plugin| {
            plugin.after_each.as_ref().map(|hook| hook(page, metrics))
        });
        evaluation.errors.extend(after);

        evaluation
    }

    /// Folds every plugin's page records into the site summary
    ///
    /// Each plugin sees only the pages on which its own `evaluate` succeeded.
    /// A plugin that produced no record on any analyzed page gets no summary
    /// entry; it is listed under the summary errors instead. A failing
    /// `summarize` is recorded the same way and the rest continue.
    pub fn run_summarize(&self, pages: &[PageResult]) -> CrawlSummary {
        let mut summary = CrawlSummary::default();

        for plugin in &self.plugins {
            let samples: Vec<MetricSample<'_>> = pages
                .iter()
                .filter_map(|page| {
                    page.metrics.get(plugin.name()).map(|metrics| MetricSample {
                        url: &page.url,
                        metrics,
                    })
                })
                .collect();

            if samples.is_empty() && !pages.is_empty() {
                tracing::warn!(
                    "Plugin '{}' evaluated none of {} page(s), skipping summarize",
                    plugin.name(),
                    pages.len()
                );
                summary.errors.push(PluginFailure {
                    plugin: plugin.name().to_string(),
                    hook: HookKind::Summarize,
                    url: None,
                    message: NO_EVALUATIONS.to_string(),
                });
                continue;
            }

            match guard(plugin.name(), HookKind::Summarize, None, || {
                (plugin.summarize)(&samples)
            }) {
                Ok(value) => {
                    summary.plugins.insert(plugin.name().to_string(), value);
                }
                Err(failure) => summary.errors.push(failure),
            }
        }

        summary
    }

    /// Runs an optional hook on every plugin, collecting failures
    ///
    /// `call` returns `None` when the plugin does not implement the hook.
    fn run_each<F>(&self, hook: HookKind, url: Option<&str>, call: F) -> Vec<PluginFailure>
    where
        F: Fn(&Plugin) -> Option<anyhow::Result<()>>,
    {
        let mut failures = Vec::new();

        for plugin in &self.plugins {
            let result = guard(plugin.name(), hook, url, || call(plugin).unwrap_or(Ok(())));
            if let Err(failure) = result {
                failures.push(failure);
            }
        }

        failures
    }
}

impl std::fmt::Debug for PluginPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginPipeline")
            .field("plugins", &self.names())
            .finish()
    }
}

/// Runs one hook, turning errors and panics into a logged [`PluginFailure`]
fn guard<T>(
    plugin: &str,
    hook: HookKind,
    url: Option<&str>,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, PluginFailure> {
    let message = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(error)) => format!("{:#}", error),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };

    match url {
        Some(url) => tracing::warn!("Plugin '{}' {} failed on {}: {}", plugin, hook, url, message),
        None => tracing::warn!("Plugin '{}' {} failed: {}", plugin, hook, message),
    }

    Err(PluginFailure {
        plugin: plugin.to_string(),
        hook,
        url: url.map(str::to_string),
        message,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
