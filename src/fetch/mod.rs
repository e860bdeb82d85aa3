//! Web page fetching
//!
//! Downloads a single page and stores its HTML as a document of a project.

#[cfg(test)]
mod tests;

use anyhow::{Context, Result, anyhow, bail};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::database::sqlite::Database;
use crate::database::sqlite::models::{Document, Project};
use crate::http::{RetryPolicy, build_agent, request_with_retry};

/// Configuration for page fetching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// User agent string to use for requests
    pub user_agent: String,
    /// Timeout for HTTP requests in seconds
    pub timeout_seconds: u64,
    /// Retries after the first attempt for transport and 5xx errors
    pub max_retries: u32,
}

impl Default for FetchConfig {
    #[inline]
    fn default() -> Self {
        Self {
            user_agent: "docvault/0.1.0 (Document Indexer)".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
        }
    }
}

/// A downloaded page ready to be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: Url,
    /// Document name derived from the URL path, always ending in `.html`
    pub file_name: String,
    pub body: String,
}

/// Blocking HTTP client for single pages
#[derive(Debug)]
pub struct PageFetcher {
    agent: ureq::Agent,
    retry: RetryPolicy,
}

impl PageFetcher {
    #[inline]
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            agent: build_agent(
                Duration::from_secs(config.timeout_seconds),
                Some(&config.user_agent),
            ),
            retry: RetryPolicy {
                attempts: config.max_retries.saturating_add(1),
                ..RetryPolicy::default()
            },
        }
    }

    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Download `url`, rejecting responses that are not text
    #[inline]
    pub fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let url = validate_url(url)?;
        debug!("Fetching {}", url);

        let (content_type, body) = request_with_retry(&self.retry, url.as_str(), || {
            self.agent.get(url.as_str()).call().and_then(|mut resp| {
                let content_type = resp
                    .headers()
                    .get("content-type")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_ascii_lowercase);
                if content_type.as_deref().is_some_and(|ct| !is_textual(ct)) {
                    return Ok((content_type, String::new()));
                }
                resp.body_mut()
                    .read_to_string()
                    .map(|body| (content_type, body))
            })
        })
        .with_context(|| format!("Failed to fetch {url}"))?;

        if let Some(content_type) = content_type.as_deref().filter(|ct| !is_textual(ct)) {
            bail!("Unsupported content type '{}' at {}", content_type, url);
        }

        info!("Fetched {} ({} bytes)", url, body.len());
        Ok(FetchedPage {
            file_name: file_name_for_url(&url),
            url,
            body,
        })
    }
}

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/") || content_type.contains("html") || content_type.contains("xml")
}

/// Parse and validate a URL for fetching
#[inline]
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {url}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => bail!("Unsupported URL scheme: {}", scheme),
    }

    if parsed.host_str().is_none() {
        bail!("URL must have a host: {}", url);
    }

    Ok(parsed)
}

/// Document name for a page: its last path segment, else its host
///
/// Characters outside `[A-Za-z0-9._-]` become `_` and an alphabetic
/// extension is replaced by `.html`.
#[inline]
pub fn file_name_for_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
        .map(str::to_string);

    let base = segment
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "page".to_string());
    let stem = match base.rsplit_once('.') {
        Some((stem, extension))
            if !stem.is_empty()
                && url.path() != "/"
                && extension.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            stem.to_string()
        }
        _ => base,
    };

    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!("{sanitized}.html")
}

/// Fetch `url` and store it as a new document of `project`
pub async fn fetch_into_project(
    database: &Database,
    project: &Project,
    url: &str,
    config: &FetchConfig,
) -> Result<Document> {
    let fetcher = PageFetcher::new(config);
    fetch_with(database, project, url, fetcher).await
}

pub(crate) async fn fetch_with(
    database: &Database,
    project: &Project,
    url: &str,
    fetcher: PageFetcher,
) -> Result<Document> {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} Fetching {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(url.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));

    let target = url.to_string();
    let result = tokio::task::spawn_blocking(move || fetcher.fetch(&target))
        .await
        .map_err(|e| anyhow!("Fetch task panicked: {e}"));
    bar.finish_and_clear();

    let page = result??;
    database
        .store_document(project, &page.file_name, page.body.as_bytes())
        .await
}
