//! Markdown report generation
//!
//! This module generates human-readable markdown reports of a finished job,
//! including page statistics, plugin summaries and the error list.

use crate::crawler::{CrawlJob, ErrorRecord};
use crate::output::OutputResult;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Number of slowest pages listed in the report
const SLOWEST_PAGES: usize = 10;

/// Writes a markdown report of a job to `output_path`
pub fn write_job_report(job: &CrawlJob, output_path: &Path) -> OutputResult<()> {
    let markdown = format_job_report(job);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a job as markdown
pub fn format_job_report(job: &CrawlJob) -> String {
    let mut md = String::new();

    // Title
    md.push_str(&format!("# Site Survey: {}\n\n", job.target.root_url));

    // Job metadata
    md.push_str("## Job Information\n\n");
    md.push_str(&format!("- **Job ID**: {}\n", job.id));
    md.push_str(&format!("- **Status**: {}\n", job.status));
    md.push_str(&format!("- **Created**: {}\n", job.created_at.to_rfc3339()));
    if let Some(started) = job.started_at {
        md.push_str(&format!("- **Started**: {}\n", started.to_rfc3339()));
    }
    if let Some(finished) = job.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished.to_rfc3339()));
    }
    if let Some(duration) = job.duration() {
        md.push_str(&format!(
            "- **Duration**: {:.2} seconds\n",
            duration.num_milliseconds() as f64 / 1000.0
        ));
    }
    md.push_str(&format!(
        "- **Limits**: depth {}, {} pages\n\n",
        job.target.max_depth, job.target.max_pages
    ));

    // Overall statistics
    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Pages Analyzed**: {}\n", job.pages.len()));
    md.push_str(&format!("- **Pages Failed**: {}\n", job.failed_pages()));
    let plugin_errors: usize = job.pages.iter().map(|p| p.errors.len()).sum();
    md.push_str(&format!("- **Plugin Errors**: {}\n", plugin_errors));
    if !job.pages.is_empty() {
        let total: u64 = job.pages.iter().map(|p| p.load_time_ms).sum();
        md.push_str(&format!(
            "- **Average Load Time**: {:.0} ms\n",
            total as f64 / job.pages.len() as f64
        ));
    }
    md.push('\n');

    // Depth breakdown
    if !job.pages.is_empty() {
        let mut depths: BTreeMap<u32, usize> = BTreeMap::new();
        for page in &job.pages {
            *depths.entry(page.depth).or_default() += 1;
        }

        md.push_str("## Depth Breakdown\n\n");
        md.push_str("| Depth | Pages |\n");
        md.push_str("|-------|-------|\n");
        for (depth, count) in depths {
            md.push_str(&format!("| {} | {} |\n", depth, count));
        }
        md.push('\n');
    }

    // Plugin summaries
    if let Some(summary) = &job.summary {
        if !summary.plugins.is_empty() {
            md.push_str("## Plugin Summaries\n\n");
            for (name, value) in &summary.plugins {
                md.push_str(&format!("### {}\n\n", name));
                md.push_str("```json\n");
                md.push_str(
                    &serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
                );
                md.push_str("\n```\n\n");
            }
        }

        if !summary.errors.is_empty() {
            md.push_str("## Failed Summaries\n\n");
            for failure in &summary.errors {
                md.push_str(&format!("- {}\n", failure));
            }
            md.push('\n');
        }
    }

    // Slowest pages
    if !job.pages.is_empty() {
        let mut pages: Vec<_> = job.pages.iter().collect();
        pages.sort_by(|a, b| b.load_time_ms.cmp(&a.load_time_ms));

        md.push_str(&format!("## Slowest {} Pages\n\n", SLOWEST_PAGES));
        md.push_str("| URL | Depth | Load Time (ms) |\n");
        md.push_str("|-----|-------|----------------|\n");
        for page in pages.into_iter().take(SLOWEST_PAGES) {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                page.url, page.depth, page.load_time_ms
            ));
        }
        md.push('\n');
    }

    // Errors
    if !job.errors.is_empty() {
        md.push_str("## Errors\n\n");
        md.push_str("| Kind | Detail |\n");
        md.push_str("|------|--------|\n");
        for error in &job.errors {
            md.push_str(&format!("| {} | {} |\n", error_kind(error), error));
        }
        md.push('\n');
    }

    md
}

fn error_kind(error: &ErrorRecord) -> &'static str {
    match error {
        ErrorRecord::Render { .. } => "render",
        ErrorRecord::Plugin(_) => "plugin",
        ErrorRecord::Cancelled { .. } => "cancelled",
        ErrorRecord::NoSuccessfulPages { .. } => "no successful pages",
        ErrorRecord::IncompleteCrawl { .. } => "incomplete crawl",
    }
}
