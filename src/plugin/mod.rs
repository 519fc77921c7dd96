//! Page analyzer plugins
//!
//! A [`Plugin`] is a record of function handles: two required hooks
//! (`evaluate` and `summarize`) and six optional lifecycle hooks. The
//! [`PluginPipeline`] holds the registered plugins in order and runs each hook
//! as its own failure domain: an error or panic in one plugin is recorded
//! against that plugin and never stops the others.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use sumi_survey::plugin::{Plugin, PluginPipeline};
//!
//! let images = Plugin::new(
//!     "images",
//!     |page, _load_time| Ok(json!({ "count": page.count("img")? })),
//!     |samples| {
//!         let total: u64 = samples
//!             .iter()
//!             .filter_map(|s| s.metrics["count"].as_u64())
//!             .sum();
//!         Ok(json!({ "total": total }))
//!     },
//! );
//!
//! let pipeline = PluginPipeline::new(vec![images]).unwrap();
//! assert_eq!(pipeline.names(), vec!["images"]);
//! ```

pub mod builtin;
mod pipeline;

pub use pipeline::{PageEvaluation, PluginPipeline};

use crate::crawler::JobId;
use crate::renderer::Page;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Per-plugin metric records of one page, keyed by plugin name
pub type PageMetrics = BTreeMap<String, Value>;

/// Service lifecycle hook (`initialize`, `destroy`)
pub type LifecycleHook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Job lifecycle hook (`before_crawl`, `after_crawl`)
pub type CrawlHook = Arc<dyn Fn(&JobContext) -> anyhow::Result<()> + Send + Sync>;

/// Hook run before page evaluation
pub type BeforeEachHook = Arc<dyn Fn(&Page) -> anyhow::Result<()> + Send + Sync>;

/// Hook run after page evaluation, with every plugin's metrics for the page
pub type AfterEachHook = Arc<dyn Fn(&Page, &PageMetrics) -> anyhow::Result<()> + Send + Sync>;

/// Required hook producing a plugin's metric record for one page
pub type EvaluateHook = Arc<dyn Fn(&Page, Duration) -> anyhow::Result<Value> + Send + Sync>;

/// Required hook folding a plugin's metric records into its site summary
pub type SummarizeHook = Arc<dyn Fn(&[MetricSample<'_>]) -> anyhow::Result<Value> + Send + Sync>;

/// Errors raised while assembling a pipeline
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Plugin name cannot be empty")]
    EmptyName,

    #[error("Duplicate plugin name: {0}")]
    DuplicateName(String),
}

/// The hook a failure was raised from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    Initialize,
    Destroy,
    BeforeCrawl,
    AfterCrawl,
    BeforeEach,
    Evaluate,
    AfterEach,
    Summarize,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Destroy => "destroy",
            Self::BeforeCrawl => "beforeCrawl",
            Self::AfterCrawl => "afterCrawl",
            Self::BeforeEach => "beforeEach",
            Self::Evaluate => "evaluate",
            Self::AfterEach => "afterEach",
            Self::Summarize => "summarize",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded hook failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginFailure {
    /// Name of the failing plugin
    pub plugin: String,

    /// Hook that failed
    pub hook: HookKind,

    /// Page being processed, for page-level hooks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Error message or panic payload
    pub message: String,
}

impl fmt::Display for PluginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin '{}' failed in {}", self.plugin, self.hook)?;
        if let Some(url) = &self.url {
            write!(f, " on {}", url)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// What job-level hooks learn about the job they run for
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub root_url: Url,
    pub max_depth: u32,
    pub max_pages: usize,
}

/// One page's metric record, as handed to `summarize`
#[derive(Debug, Clone, Copy)]
pub struct MetricSample<'a> {
    /// URL of the page the record belongs to
    pub url: &'a str,

    /// The record produced by the plugin's `evaluate`
    pub metrics: &'a Value,
}

/// Site-wide aggregate of all plugins
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlSummary {
    /// Summary record per plugin whose `summarize` succeeded
    pub plugins: BTreeMap<String, Value>,

    /// Plugins whose `summarize` failed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PluginFailure>,
}

/// A page analyzer
#[derive(Clone)]
pub struct Plugin {
    name: String,
    enabled: bool,
    pub(crate) initialize: Option<LifecycleHook>,
    pub(crate) destroy: Option<LifecycleHook>,
    pub(crate) before_crawl: Option<CrawlHook>,
    pub(crate) after_crawl: Option<CrawlHook>,
    pub(crate) before_each: Option<BeforeEachHook>,
    pub(crate) after_each: Option<AfterEachHook>,
    pub(crate) evaluate: EvaluateHook,
    pub(crate) summarize: SummarizeHook,
}

impl Plugin {
    /// Creates an enabled plugin from its two required hooks
    pub fn new<E, S>(name: impl Into<String>, evaluate: E, summarize: S) -> Self
    where
        E: Fn(&Page, Duration) -> anyhow::Result<Value> + Send + Sync + 'static,
        S: Fn(&[MetricSample<'_>]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            enabled: true,
            initialize: None,
            destroy: None,
            before_crawl: None,
            after_crawl: None,
            before_each: None,
            after_each: None,
            evaluate: Arc::new(evaluate),
            summarize: Arc::new(summarize),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sets whether the pipeline runs this plugin
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn on_initialize<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.initialize = Some(Arc::new(hook));
        self
    }

    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(hook));
        self
    }

    pub fn before_crawl<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_crawl = Some(Arc::new(hook));
        self
    }

    pub fn after_crawl<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_crawl = Some(Arc::new(hook));
        self
    }

    pub fn before_each<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Page) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_each = Some(Arc::new(hook));
        self
    }

    pub fn after_each<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Page, &PageMetrics) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_each = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("initialize", &self.initialize.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("before_crawl", &self.before_crawl.is_some())
            .field("after_crawl", &self.after_crawl.is_some())
            .field("before_each", &self.before_each.is_some())
            .field("after_each", &self.after_each.is_some())
            .finish()
    }
}
