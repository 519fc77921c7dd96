//! Integration tests for crawl jobs
//!
//! Most tests drive the job manager with an in-memory site so page counts and
//! timing are deterministic; the last ones crawl a wiremock server through the
//! HTTP renderer end-to-end.

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_survey::config::{CompletionPolicy, Config, CrawlerConfig, UserAgentConfig, WebhookSettings};
use sumi_survey::crawler::{CrawlRequest, ErrorRecord, JobSpec, TargetConfig};
use sumi_survey::plugin::{builtin, HookKind, Plugin};
use sumi_survey::renderer::{HttpRenderer, Page, RenderError, Renderer};
use sumi_survey::url::LinkPolicy;
use sumi_survey::{JobManager, JobStatus, PluginPipeline};
use tokio::sync::Semaphore;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with the given worker count
fn create_test_config(workers: u32) -> Config {
    Config {
        crawler: CrawlerConfig {
            workers,
            navigation_timeout_ms: 2_000,
            default_max_depth: 2,
            default_max_pages: 50,
            completion_policy: CompletionPolicy::AnySuccess,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        webhook: WebhookSettings {
            request_timeout_ms: 2_000,
            base_backoff_ms: 10,
            max_backoff_ms: 50,
        },
    }
}

fn spec(root: &str, max_depth: u32, max_pages: usize) -> JobSpec {
    JobSpec {
        target: TargetConfig {
            root_url: Url::parse(root).unwrap(),
            max_depth,
            max_pages,
            link_policy: LinkPolicy::default(),
        },
        webhook: None,
    }
}

/// An in-memory site
///
/// `/` links to `/p0` .. `/p{fanout-1}` and to an external host; every other
/// page links to two children of its own. Paths listed in `broken` fail.
struct FakeSite {
    fanout: usize,
    broken: Vec<&'static str>,
    calls: AtomicUsize,
    /// When set, every page except `/` waits for a permit before loading
    gate: Option<Arc<Semaphore>>,
    entered: AtomicUsize,
}

impl FakeSite {
    fn new(fanout: usize) -> Self {
        Self {
            fanout,
            broken: Vec::new(),
            calls: AtomicUsize::new(0),
            gate: None,
            entered: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Renderer for FakeSite {
    async fn render(&self, url: &Url, _timeout: Duration) -> Result<Page, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if url.path() != "/" {
            if let Some(gate) = &self.gate {
                self.entered.fetch_add(1, Ordering::SeqCst);
                let permit = gate.acquire().await.map_err(|e| RenderError::Crashed {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
                permit.forget();
            }
        }

        if self.broken.contains(&url.path()) {
            return Err(RenderError::Http {
                url: url.to_string(),
                status: 500,
            });
        }

        let html = if url.path() == "/" {
            let mut html: String = (0..self.fanout)
                .map(|i| format!("<a href='/p{}'>page {}</a>", i, i))
                .collect();
            html.push_str("<a href='https://elsewhere.org/'>elsewhere</a>");
            html
        } else {
            format!(
                "<a href='{0}/a'>a</a><a href='{0}/b'>b</a><a href='/'>home</a>",
                url.path()
            )
        };

        Ok(Page::from_html(url.clone(), url.clone(), 200, html))
    }
}

fn anchor_plugin() -> Plugin {
    Plugin::new(
        "anchors",
        |page, _| Ok(json!({ "count": page.count("a")? })),
        |samples| {
            let total: u64 = samples
                .iter()
                .filter_map(|s| s.metrics["count"].as_u64())
                .sum();
            Ok(json!({ "pages": samples.len(), "total": total }))
        },
    )
}

fn failing_plugin() -> Plugin {
    Plugin::new(
        "broken",
        |_, _| bail!("this analyzer always fails"),
        |samples| Ok(json!({ "pages": samples.len() })),
    )
}

#[tokio::test]
async fn test_failing_plugin_does_not_fail_job() {
    let site = Arc::new(FakeSite::new(15));
    let pipeline = PluginPipeline::new(vec![anchor_plugin(), failing_plugin()]).unwrap();
    let manager = JobManager::start(&create_test_config(5), pipeline, site.clone()).unwrap();

    let id = manager
        .create_job(spec("https://example.com", 1, 10))
        .unwrap();
    let job = manager.run_job(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.pages.len() + job.failed_pages() <= 10);
    assert_eq!(job.pages.len(), 10);
    assert!(job.pages.iter().all(|p| p.depth <= 1));

    let urls: HashSet<&str> = job.pages.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(urls.len(), job.pages.len(), "a page was analyzed twice");
    assert!(urls.iter().all(|u| u.starts_with("https://example.com/")));

    // Every page keeps the healthy plugin's metrics and records the failure
    for page in &job.pages {
        assert!(page.metrics.contains_key("anchors"));
        assert!(!page.metrics.contains_key("broken"));
        assert_eq!(page.errors.len(), 1);
        assert_eq!(page.errors[0].plugin, "broken");
        assert_eq!(page.errors[0].hook, HookKind::Evaluate);
    }

    let summary = job.summary.unwrap();
    assert_eq!(summary.plugins["anchors"]["pages"], 10);
    assert!(!summary.plugins.contains_key("broken"));
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].plugin, "broken");
    assert_eq!(summary.errors[0].hook, HookKind::Summarize);
    assert_eq!(site.calls.load(Ordering::SeqCst), 10);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_breadth_first_respects_depth() {
    let site = Arc::new(FakeSite::new(3));
    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager = JobManager::start(&create_test_config(1), pipeline, site).unwrap();

    let id = manager
        .create_job(spec("https://example.com/", 2, 100))
        .unwrap();
    let job = manager.run_job(id).await.unwrap();

    // 1 root + 3 children + 6 grandchildren
    assert_eq!(job.pages.len(), 10);
    assert!(job.pages.iter().all(|p| p.depth <= 2));

    // A single worker visits pages in breadth-first order
    let depths: Vec<u32> = job.pages.iter().map(|p| p.depth).collect();
    let mut sorted = depths.clone();
    sorted.sort();
    assert_eq!(depths, sorted);

    let child = job
        .pages
        .iter()
        .find(|p| p.url == "https://example.com/p0/a")
        .unwrap();
    assert_eq!(child.parent.as_deref(), Some("https://example.com/p0"));
}

#[tokio::test]
async fn test_zero_max_pages_fails_immediately() {
    let site = Arc::new(FakeSite::new(3));
    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager = JobManager::start(&create_test_config(3), pipeline, site.clone()).unwrap();

    let id = manager
        .create_job(spec("https://example.com/", 1, 0))
        .unwrap();
    let job = manager.run_job(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.pages.is_empty());
    assert!(matches!(
        job.errors.as_slice(),
        [ErrorRecord::NoSuccessfulPages { attempted: 0 }]
    ));
    assert_eq!(site.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_all_pages_failing_fails_job() {
    let mut site = FakeSite::new(0);
    site.broken = vec!["/"];
    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager = JobManager::start(&create_test_config(2), pipeline, Arc::new(site)).unwrap();

    let id = manager
        .create_job(spec("https://example.com/", 1, 10))
        .unwrap();
    let job = manager.run_job(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_pages(), 1);
    assert!(matches!(
        job.errors.last(),
        Some(ErrorRecord::NoSuccessfulPages { attempted: 1 })
    ));
}

#[tokio::test]
async fn test_cancel_waits_for_in_flight_pages() {
    let gate = Arc::new(Semaphore::new(0));
    let mut site = FakeSite::new(10);
    site.gate = Some(gate.clone());
    let site = Arc::new(site);

    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager = JobManager::start(&create_test_config(3), pipeline, site.clone()).unwrap();
    let id = manager
        .create_job(spec("https://example.com/", 1, 50))
        .unwrap();
    let handle = manager.start_job(id).unwrap();

    // Wait until all three workers are blocked inside the renderer
    tokio::time::timeout(Duration::from_secs(5), async {
        while site.entered.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workers never reached the renderer");

    manager.cancel(id).unwrap();
    // Still running: the three in-flight pages have not finished
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.status(id).unwrap().status, JobStatus::Running);

    gate.add_permits(100);
    let job = handle.await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.was_cancelled());
    assert!(matches!(job.errors.last(), Some(ErrorRecord::Cancelled { .. })));
    // Root plus the three pages that were in flight; nothing dequeued later
    assert_eq!(job.pages.len(), 4);
    assert_eq!(site.calls.load(Ordering::SeqCst), 4);
    assert!(job.summary.is_some());
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let site = Arc::new(FakeSite::new(2));
    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager = JobManager::start(&create_test_config(2), pipeline, site).unwrap();

    let id = manager
        .create_job(spec("https://example.com/", 1, 10))
        .unwrap();
    let handle = manager.start_job(id).unwrap();
    let second = manager.start_job(id);
    assert!(second.is_err());

    let job = handle.await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pages.len(), 3);
}

#[tokio::test]
async fn test_lifecycle_hooks_run_around_jobs() {
    let events = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let log = |name: &'static str| {
        let events = events.clone();
        move || {
            events.lock().unwrap().push(name.to_string());
            Ok::<(), anyhow::Error>(())
        }
    };
    let before = events.clone();
    let after = events.clone();

    let plugin = anchor_plugin()
        .on_initialize(log("initialize"))
        .on_destroy(log("destroy"))
        .before_crawl(move |ctx| {
            before
                .lock()
                .unwrap()
                .push(format!("before:{}", ctx.root_url));
            Ok(())
        })
        .after_crawl(move |_| {
            after.lock().unwrap().push("after".to_string());
            Ok(())
        });

    let pipeline = PluginPipeline::new(vec![plugin]).unwrap();
    let manager =
        JobManager::start(&create_test_config(2), pipeline, Arc::new(FakeSite::new(1))).unwrap();

    for _ in 0..2 {
        let id = manager
            .create_job(spec("https://example.com/", 0, 1))
            .unwrap();
        manager.run_job(id).await.unwrap();
    }
    manager.shutdown().await;
    manager.shutdown().await;

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "initialize",
            "before:https://example.com/",
            "after",
            "before:https://example.com/",
            "after",
            "destroy"
        ]
    );
}

#[tokio::test]
async fn test_before_crawl_failure_is_recorded() {
    let plugin = anchor_plugin().before_crawl(|_| bail!("warm-up failed"));
    let pipeline = PluginPipeline::new(vec![plugin]).unwrap();
    let manager =
        JobManager::start(&create_test_config(2), pipeline, Arc::new(FakeSite::new(1))).unwrap();

    let id = manager
        .create_job(spec("https://example.com/", 1, 10))
        .unwrap();
    let job = manager.run_job(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!(matches!(
        job.errors.first(),
        Some(ErrorRecord::Plugin(failure)) if failure.hook == HookKind::BeforeCrawl
    ));
}

#[tokio::test]
async fn test_submit_runs_job_in_background() {
    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager =
        JobManager::start(&create_test_config(2), pipeline, Arc::new(FakeSite::new(4))).unwrap();

    let request = CrawlRequest::from_json("example.com", r#"{"maxDepth": 1, "maxPages": 3}"#).unwrap();
    let id = manager.submit(&request).unwrap();

    let job = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = manager.status(id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pages.len(), 3);
    assert_eq!(job.target.root_url.as_str(), "https://example.com/");

    // Waits for the job before tearing down
    manager.shutdown().await;
    assert_eq!(manager.list().len(), 1);
}

#[tokio::test]
async fn test_http_crawl_end_to_end() {
    // Start a mock server
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // Mock index page with links
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(
                    r#"<html><head><title>Home</title></head><body>
                    <a href="{}/page1">Page 1</a>
                    <a href="/page2#top">Page 2</a>
                    <a href="/missing">Missing</a>
                    <a href="/data.json">Data</a>
                    <a href="https://external.example.org/">External</a>
                    </body></html>"#,
                    base_url
                ))
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    for page in ["/page1", "/page2"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(
                        r#"<html><head><title>Page</title></head><body><a href="/">Home</a></body></html>"#,
                    )
                    .insert_header("content-type", "text/html"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{}")
                .insert_header("content-type", "application/json"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(3);
    let renderer = HttpRenderer::new(&config.user_agent).unwrap();
    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager = JobManager::start(&config, pipeline, Arc::new(renderer)).unwrap();

    let id = manager.create_job(spec(&base_url, 1, 20)).unwrap();
    let job = manager.run_job(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.pages.len(), 3);
    assert_eq!(job.failed_pages(), 2);

    let root = job.pages.iter().find(|p| p.depth == 0).unwrap();
    assert_eq!(root.metrics[builtin::ANCHOR_COUNT], json!({ "anchors": 5 }));

    let messages: Vec<String> = job
        .errors
        .iter()
        .filter_map(|e| match e {
            ErrorRecord::Render { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect();
    assert!(messages.iter().any(|m| m.contains("HTTP 404")));
    assert!(messages.iter().any(|m| m.contains("application/json")));

    let summary: Value = serde_json::to_value(job.summary.unwrap()).unwrap();
    assert_eq!(summary["plugins"][builtin::ANCHOR_COUNT]["pages"], 3);
    assert_eq!(summary["plugins"][builtin::ANCHOR_COUNT]["total"], 7);

    manager.shutdown().await;
    // Wiremock verifies the expectations when mock_server drops
}
