//! Page rendering collaborator
//!
//! The orchestrator never loads pages itself. It asks a [`Renderer`] for a
//! [`Page`] handle and hands that handle to the plugins. [`HttpRenderer`] is
//! the built-in renderer for static HTML; a headless browser can be plugged in
//! by implementing the trait.

mod http;
mod links;

pub use http::{build_http_client, HttpRenderer};
pub use links::{parse_html, ParsedPage};

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors a renderer reports for a single page
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Navigation timeout after {timeout_ms}ms for {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("Expected HTML from {url}, got {content_type}")]
    ContentMismatch { url: String, content_type: String },

    #[error("Renderer crashed on {url}: {message}")]
    Crashed { url: String, message: String },
}

impl RenderError {
    /// The URL the renderer was asked to load
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. }
            | Self::Network { url, .. }
            | Self::Http { url, .. }
            | Self::ContentMismatch { url, .. }
            | Self::Crashed { url, .. } => url,
        }
    }
}

/// A loaded page as seen by plugins
#[derive(Debug, Clone)]
pub struct Page {
    /// URL that was requested
    pub url: Url,

    /// URL after redirects
    pub final_url: Url,

    /// HTTP status of the final response
    pub status: u16,

    /// Document title, if present
    pub title: Option<String>,

    /// Rendered document markup
    pub html: String,

    /// Absolute outbound links found on the page
    pub links: Vec<Url>,
}

impl Page {
    /// Builds a page handle from markup, extracting title and links
    pub fn from_html(url: Url, final_url: Url, status: u16, html: String) -> Self {
        let parsed = parse_html(&html, &final_url);
        Self {
            url,
            final_url,
            status,
            title: parsed.title,
            html,
            links: parsed.links,
        }
    }

    /// Parses the markup into a queryable document
    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }

    /// Counts elements matching a CSS selector
    pub fn count(&self, selector: &str) -> anyhow::Result<usize> {
        let selector = Selector::parse(selector)
            .map_err(|e| anyhow::anyhow!("invalid selector {:?}: {:?}", selector, e))?;
        Ok(self.document().select(&selector).count())
    }
}

/// Loads pages for analysis
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Loads `url`, giving up after `timeout`
    async fn render(&self, url: &Url, timeout: Duration) -> Result<Page, RenderError>;
}
