//! Sumi-Survey main entry point
//!
//! This is the command-line interface for the Sumi-Survey site crawler.

use anyhow::{bail, Context};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use sumi_survey::config::{load_config_with_hash, Config};
use sumi_survey::crawler::{CrawlRequest, JobSpec};
use sumi_survey::output::{job_json, write_job_report};
use sumi_survey::plugin::builtin;
use sumi_survey::renderer::HttpRenderer;
use sumi_survey::webhook::{EventKind, WebhookConfig};
use sumi_survey::{CrawlJob, JobId, JobManager, JobStatus, PluginPipeline};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Sumi-Survey: a site survey crawler
///
/// Sumi-Survey crawls one site breadth-first, runs page analyzers against
/// every visited page, and reports progress to an optional webhook.
#[derive(Parser, Debug)]
#[command(name = "sumi-survey")]
#[command(version)]
#[command(about = "A site survey crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Site to crawl (domain or URL)
    #[arg(value_name = "URL")]
    target: String,

    /// Maximum link depth from the root page
    #[arg(long)]
    max_depth: Option<u32>,

    /// Maximum number of pages to analyze
    #[arg(long)]
    max_pages: Option<usize>,

    /// Also follow links to hosts matching this pattern (repeatable)
    #[arg(long = "allow", value_name = "PATTERN")]
    allow: Vec<String>,

    /// Webhook receiving job events
    #[arg(long, value_name = "URL")]
    webhook: Option<Url>,

    /// Event kinds to deliver (comma separated; default all)
    #[arg(long, value_delimiter = ',', requires = "webhook")]
    on: Vec<EventKind>,

    /// Extra webhook header as NAME:VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE", requires = "webhook")]
    headers: Vec<String>,

    /// Webhook retries after the first failed attempt
    #[arg(long, requires = "webhook")]
    retries: Option<u32>,

    /// Write a markdown report of the finished job
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Print the finished job as JSON
    #[arg(long)]
    json: bool,

    /// Validate config and show the resolved job without crawling
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let request = build_request(&cli)?;
    let spec = request.resolve(&config.crawler)?;

    if cli.dry_run {
        print_dry_run(&config, &spec);
        return Ok(());
    }

    handle_crawl(&cli, &config, spec).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_survey=info,warn"),
            1 => EnvFilter::new("sumi_survey=debug,info"),
            2 => EnvFilter::new("sumi_survey=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Turns command-line options into a crawl request
fn build_request(cli: &Cli) -> anyhow::Result<CrawlRequest> {
    let mut request = CrawlRequest::new(cli.target.clone());
    request.options.max_depth = cli.max_depth;
    request.options.max_pages = cli.max_pages;
    request.options.allow = cli.allow.clone();

    if let Some(url) = &cli.webhook {
        let mut webhook = WebhookConfig::new(url.clone());
        webhook.on = cli.on.iter().copied().collect();
        if let Some(retries) = cli.retries {
            webhook.retries = retries;
        }
        for header in &cli.headers {
            let Some((name, value)) = header.split_once(':') else {
                bail!("Invalid header '{}': expected NAME:VALUE", header);
            };
            webhook
                .headers
                .insert(name.trim().to_string(), value.trim().to_string());
        }
        request.options.webhook = Some(webhook);
    }

    Ok(request)
}

/// Handles the --dry-run mode: shows the resolved job
fn print_dry_run(config: &Config, spec: &JobSpec) {
    println!("=== Sumi-Survey Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Workers: {}", config.crawler.workers);
    println!(
        "  Navigation timeout: {}ms",
        config.crawler.navigation_timeout_ms
    );
    println!("  Completion policy: {:?}", config.crawler.completion_policy);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nTarget:");
    println!("  Root URL: {}", spec.target.root_url);
    println!("  Max depth: {}", spec.target.max_depth);
    println!("  Max pages: {}", spec.target.max_pages);
    println!("  Same origin: {}", spec.target.link_policy.same_origin);
    for pattern in &spec.target.link_policy.allow {
        println!("  Allow: {}", pattern);
    }

    match &spec.webhook {
        Some(webhook) => {
            println!("\nWebhook:");
            println!("  URL: {}", webhook.url);
            println!("  Retries: {}", webhook.retries);
            let kinds: Vec<&str> = EventKind::all()
                .into_iter()
                .filter(|kind| webhook.subscribes_to(*kind))
                .map(|kind| kind.as_str())
                .collect();
            println!("  Events: {}", kinds.join(", "));
            for name in webhook.headers.keys() {
                println!("  Header: {}", name);
            }
        }
        None => println!("\nWebhook: none"),
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(cli: &Cli, config: &Config, spec: JobSpec) -> anyhow::Result<()> {
    let renderer = HttpRenderer::new(&config.user_agent).context("Failed to build HTTP client")?;
    let pipeline = PluginPipeline::new(builtin::defaults())?;
    let manager = JobManager::start(config, pipeline, Arc::new(renderer))?;

    let id = manager.create_job(spec)?;
    let job = run_until_interrupted(&manager, id, interrupted()).await?;

    manager.shutdown().await;

    let stats = manager.dispatcher().stats();
    if stats.queued > 0 {
        tracing::info!(
            "Webhook deliveries: {} delivered, {} dropped",
            stats.delivered,
            stats.dropped
        );
    }

    if let Some(path) = &cli.report {
        write_job_report(&job, path)?;
        tracing::info!("Report written to {}", path.display());
    }

    if cli.json {
        println!("{}", job_json(&job)?);
    } else {
        println!(
            "Job {} {}: {} page(s) analyzed, {} failed",
            job.id,
            job.status,
            job.pages.len(),
            job.failed_pages()
        );
    }

    if job.status != JobStatus::Completed {
        bail!("Crawl of {} failed", job.target.root_url);
    }
    Ok(())
}

/// Resolves on ctrl-c; never resolves if the signal handler cannot be installed
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Starts a job and waits for it, cancelling it if `interrupt` resolves first
async fn run_until_interrupted(
    manager: &JobManager,
    id: JobId,
    interrupt: impl Future<Output = ()>,
) -> anyhow::Result<CrawlJob> {
    let handle = manager.start_job(id)?;
    tokio::pin!(handle);

    let job = tokio::select! {
        result = &mut handle => result.context("Crawl task failed")?,
        _ = interrupt => {
            tracing::warn!("Interrupted, cancelling job {}", id);
            if let Err(e) = manager.cancel(id) {
                tracing::warn!("Could not cancel job {}: {}", id, e);
            }
            // In-flight pages finish before the job does
            handle.await.context("Crawl task failed")?
        }
    };
    Ok(job)
}
