//! HTTP renderer for static HTML
//!
//! This renderer fetches a page with a plain GET request and parses the markup.
//! It does not execute scripts; pages that need a browser should be served by
//! a different [`Renderer`] implementation.

use crate::config::UserAgentConfig;
use crate::renderer::{Page, RenderError, Renderer};
use async_trait::async_trait;
use reqwest::{header, redirect::Policy, Client};
use std::time::Duration;
use url::Url;

/// Maximum redirect hops followed for a single page
const MAX_REDIRECTS: usize = 10;

/// Builds an HTTP client with the configured user agent
///
/// The user agent has the form `CrawlerName/Version (+ContactURL; ContactEmail)`.
///
/// # Example
///
/// ```no_run
/// use sumi_survey::config::UserAgentConfig;
/// use sumi_survey::renderer::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiSurvey".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Renders pages by fetching their HTML over HTTP
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: Client,
}

impl HttpRenderer {
    /// Creates a renderer identifying itself with the configured user agent
    pub fn new(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    /// Fetches and parses a page
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | 2xx with HTML body | `Ok(Page)` |
    /// | Non-2xx status | `RenderError::Http` |
    /// | Non-HTML Content-Type | `RenderError::ContentMismatch` |
    /// | Timeout | `RenderError::Timeout` |
    /// | Connection or body error | `RenderError::Network` |
    async fn render(&self, url: &Url, timeout: Duration) -> Result<Page, RenderError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_error(url, timeout, e))?;

        let status = response.status();
        let final_url = response.url().clone();

        if !status.is_success() {
            return Err(RenderError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        // A missing Content-Type is given the benefit of the doubt.
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(RenderError::ContentMismatch {
                url: url.to_string(),
                content_type,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_error(url, timeout, e))?;

        tracing::trace!("Rendered {} ({} bytes)", final_url, body.len());

        Ok(Page::from_html(
            url.clone(),
            final_url,
            status.as_u16(),
            body,
        ))
    }
}

fn classify_error(url: &Url, timeout: Duration, error: reqwest::Error) -> RenderError {
    if error.is_timeout() {
        RenderError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if error.is_connect() {
        RenderError::Network {
            url: url.to_string(),
            message: "Connection refused".to_string(),
        }
    } else {
        RenderError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
