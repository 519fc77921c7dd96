//! Integration tests for webhook delivery
//!
//! These tests use wiremock as the webhook receiver. Each test shuts the
//! dispatcher down before asserting, which waits for every queued event to be
//! delivered or dropped.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use sumi_survey::config::{CompletionPolicy, Config, CrawlerConfig, UserAgentConfig, WebhookSettings};
use sumi_survey::crawler::{JobId, JobSpec, TargetConfig};
use sumi_survey::plugin::builtin;
use sumi_survey::renderer::{Page, RenderError, Renderer};
use sumi_survey::webhook::{EventKind, WebhookConfig, WebhookDispatcher, WebhookEvent};
use sumi_survey::{JobManager, JobStatus, LinkPolicy, PluginPipeline};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn fast_settings() -> WebhookSettings {
    WebhookSettings {
        request_timeout_ms: 2_000,
        base_backoff_ms: 10,
        max_backoff_ms: 50,
    }
}

fn receiver_config(server: &MockServer, retries: u32) -> Arc<WebhookConfig> {
    let mut config = WebhookConfig::new(Url::parse(&format!("{}/hook", server.uri())).unwrap());
    config.retries = retries;
    Arc::new(config)
}

fn progress(job_id: JobId, analyzed: usize) -> WebhookEvent {
    WebhookEvent::progress(job_id, analyzed, 10, "https://example.com/")
}

fn bodies(requests: &[Request]) -> Vec<Value> {
    requests
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn test_retries_until_receiver_accepts() {
    let mock_server = MockServer::start().await;

    // First two attempts fail, the third succeeds
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let dispatcher = WebhookDispatcher::new(&fast_settings()).unwrap();
    let config = receiver_config(&mock_server, 3);
    assert!(dispatcher.dispatch(&config, progress(JobId::new(), 1)));
    dispatcher.shutdown().await;

    let stats = dispatcher.stats();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.attempts, 3);
    assert!(dispatcher.failures().is_empty());

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn test_exhausted_event_is_dropped_and_recorded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&mock_server)
        .await;

    let dispatcher = WebhookDispatcher::new(&fast_settings()).unwrap();
    let job_id = JobId::new();
    dispatcher.dispatch(&receiver_config(&mock_server, 1), progress(job_id, 1));
    dispatcher.shutdown().await;

    let stats = dispatcher.stats();
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.attempts, 2);

    let failures = dispatcher.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].job_id, job_id);
    assert_eq!(failures[0].kind, EventKind::Progress);
    assert_eq!(failures[0].attempts, 2);
    assert!(failures[0].error.contains("503"));
}

#[tokio::test]
async fn test_unreachable_receiver_is_dropped() {
    // Bind a socket to learn a free port, then close it
    let url = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}/hook", listener.local_addr().unwrap())
    };

    let dispatcher = WebhookDispatcher::new(&fast_settings()).unwrap();
    let mut config = WebhookConfig::new(Url::parse(&url).unwrap());
    config.retries = 0;
    dispatcher.dispatch(&Arc::new(config), progress(JobId::new(), 1));
    dispatcher.shutdown().await;

    assert_eq!(dispatcher.stats().dropped, 1);
    assert!(dispatcher.failures()[0].error.starts_with("Transport error"));
}

#[tokio::test]
async fn test_headers_and_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("authorization", "Bearer secret"))
        .and(header("x-survey", "nightly"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = WebhookConfig::new(
        Url::parse(&format!("{}/hook", mock_server.uri())).unwrap(),
    );
    config
        .headers
        .insert("Authorization".to_string(), "Bearer secret".to_string());
    config
        .headers
        .insert("X-Survey".to_string(), "nightly".to_string());

    let dispatcher = WebhookDispatcher::new(&fast_settings()).unwrap();
    let job_id = JobId::new();
    dispatcher.dispatch(&Arc::new(config), progress(job_id, 4));
    dispatcher.shutdown().await;

    assert_eq!(dispatcher.stats().delivered, 1);

    let requests = mock_server.received_requests().await.unwrap();
    let body = &bodies(&requests)[0];
    assert_eq!(body["status"], "progress");
    assert_eq!(body["jobId"], job_id.to_string());
    assert_eq!(body["pagesAnalyzed"], 4);
    assert_eq!(body["totalPages"], 10);
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_unsubscribed_events_are_not_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = WebhookConfig::new(
        Url::parse(&format!("{}/hook", mock_server.uri())).unwrap(),
    );
    config.on.insert(EventKind::Completed);

    let dispatcher = WebhookDispatcher::new(&fast_settings()).unwrap();
    assert!(!dispatcher.dispatch(&Arc::new(config), progress(JobId::new(), 1)));
    dispatcher.shutdown().await;

    assert_eq!(dispatcher.stats().queued, 0);
}

#[tokio::test]
async fn test_dispatch_after_shutdown_is_refused() {
    let mock_server = MockServer::start().await;
    let dispatcher = WebhookDispatcher::new(&fast_settings()).unwrap();
    dispatcher.shutdown().await;

    assert!(!dispatcher.dispatch(&receiver_config(&mock_server, 0), progress(JobId::new(), 1)));
    assert_eq!(dispatcher.stats(), Default::default());
}

/// Serves `/` linking to `pages` children, each without links
struct SmallSite {
    pages: usize,
}

#[async_trait]
impl Renderer for SmallSite {
    async fn render(&self, url: &Url, _timeout: Duration) -> Result<Page, RenderError> {
        let html = if url.path() == "/" {
            (0..self.pages)
                .map(|i| format!("<a href='/p{}'>{}</a>", i, i))
                .collect()
        } else {
            "<p>leaf</p>".to_string()
        };
        Ok(Page::from_html(url.clone(), url.clone(), 200, html))
    }
}

fn test_config() -> Config {
    Config {
        crawler: CrawlerConfig {
            workers: 2,
            navigation_timeout_ms: 2_000,
            default_max_depth: 1,
            default_max_pages: 10,
            completion_policy: CompletionPolicy::AnySuccess,
        },
        user_agent: UserAgentConfig {
            crawler_name: "TestBot".to_string(),
            crawler_version: "1.0.0".to_string(),
            contact_url: "https://example.com/contact".to_string(),
            contact_email: "test@example.com".to_string(),
        },
        webhook: fast_settings(),
    }
}

fn job_spec(max_pages: usize, webhook: WebhookConfig) -> JobSpec {
    JobSpec {
        target: TargetConfig {
            root_url: Url::parse("https://example.com/").unwrap(),
            max_depth: 1,
            max_pages,
            link_policy: LinkPolicy::default(),
        },
        webhook: Some(webhook),
    }
}

#[tokio::test]
async fn test_job_events_arrive_in_order() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager =
        JobManager::start(&test_config(), pipeline, Arc::new(SmallSite { pages: 3 })).unwrap();

    let webhook = WebhookConfig::new(Url::parse(&format!("{}/hook", mock_server.uri())).unwrap());
    let id = manager.create_job(job_spec(10, webhook)).unwrap();
    let job = manager.run_job(id).await.unwrap();
    manager.shutdown().await;

    assert_eq!(job.status, JobStatus::Completed);

    let requests = mock_server.received_requests().await.unwrap();
    let events = bodies(&requests);
    let statuses: Vec<&str> = events.iter().map(|e| e["status"].as_str().unwrap()).collect();
    assert_eq!(
        statuses,
        vec!["started", "progress", "progress", "progress", "progress", "completed"]
    );
    assert!(events.iter().all(|e| e["jobId"] == id.to_string()));

    // Progress counts never go backwards
    let analyzed: Vec<u64> = events
        .iter()
        .filter_map(|e| e["pagesAnalyzed"].as_u64())
        .collect();
    assert_eq!(analyzed, vec![1, 2, 3, 4]);

    let completed = events.last().unwrap();
    assert_eq!(completed["result"]["pages"].as_array().unwrap().len(), 4);
    assert!(completed["result"]["summary"]["plugins"][builtin::LOAD_TIME].is_object());
}

#[tokio::test]
async fn test_job_webhook_filter_only_completed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager =
        JobManager::start(&test_config(), pipeline, Arc::new(SmallSite { pages: 3 })).unwrap();

    let mut webhook = WebhookConfig::new(Url::parse(&format!("{}/hook", mock_server.uri())).unwrap());
    webhook.on.insert(EventKind::Completed);
    let id = manager.create_job(job_spec(10, webhook)).unwrap();
    manager.run_job(id).await.unwrap();
    manager.shutdown().await;

    let requests = mock_server.received_requests().await.unwrap();
    let events = bodies(&requests);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["status"], "completed");
    assert_eq!(manager.dispatcher().stats().delivered, 1);
}

#[tokio::test]
async fn test_failed_job_reports_failure_event() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager =
        JobManager::start(&test_config(), pipeline, Arc::new(SmallSite { pages: 3 })).unwrap();

    let mut webhook = WebhookConfig::new(Url::parse(&format!("{}/hook", mock_server.uri())).unwrap());
    webhook.on.insert(EventKind::Failed);
    let id = manager.create_job(job_spec(0, webhook)).unwrap();
    let job = manager.run_job(id).await.unwrap();
    manager.shutdown().await;

    assert_eq!(job.status, JobStatus::Failed);

    let requests = mock_server.received_requests().await.unwrap();
    let events = bodies(&requests);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["status"], "failed");
    assert!(events[0]["error"].as_str().unwrap().contains("no page analyzed"));
    assert_eq!(events[0]["errors"][0]["kind"], "noSuccessfulPages");
}

#[tokio::test]
async fn test_slow_receiver_does_not_hold_up_crawl() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&mock_server)
        .await;

    let pipeline = PluginPipeline::new(builtin::defaults()).unwrap();
    let manager =
        JobManager::start(&test_config(), pipeline, Arc::new(SmallSite { pages: 5 })).unwrap();

    let webhook = WebhookConfig::new(Url::parse(&format!("{}/hook", mock_server.uri())).unwrap());
    let id = manager.create_job(job_spec(10, webhook)).unwrap();
    let job = manager.run_job(id).await.unwrap();

    // Eight events are queued; at 300ms each most are still pending
    assert_eq!(job.status, JobStatus::Completed);
    let stats = manager.dispatcher().stats();
    assert_eq!(stats.queued, 8);
    assert!(stats.delivered < stats.queued);

    manager.shutdown().await;
    assert_eq!(manager.dispatcher().stats().delivered, 8);
}
