use backoff::{future::retry, ExponentialBackoff};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::error::CiteError;
use crate::latex::Bibliography;

/// Overrides the scheme and host of every fetched URL. Used by tests.
pub const FETCH_BASE_URL_VAR: &str = "CITECHECK_FETCH_BASE_URL";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new())
});

const SKIPPED_ELEMENTS: [&str; 6] = ["script", "style", "noscript", "head", "template", "svg"];
const BLOCK_ELEMENTS: [&str; 22] = [
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "tr", "table", "section",
    "article", "header", "footer", "blockquote", "pre", "hr", "main",
];

/// A `@misc` entry that points at a web page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSource {
    pub key: String,
    pub url: String,
    pub title: Option<String>,
}

/// `@misc` entries with a `url` and no `doi`, sorted by key.
pub fn misc_url_sources(bibliography: &Bibliography) -> Vec<UrlSource> {
    let mut sources: Vec<UrlSource> = bibliography
        .iter()
        .filter(|entry| entry.entry_type == "misc" && entry.doi().is_none())
        .filter_map(|entry| {
            let url = entry.get("url")?.trim();
            if url.is_empty() {
                return None;
            }
            Some(UrlSource {
                key: entry.key.clone(),
                url: url.to_string(),
                title: entry.get("title").cloned(),
            })
        })
        .collect();
    sources.sort_by(|a, b| a.key.cmp(&b.key));
    sources
}

fn walk_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    let block = BLOCK_ELEMENTS.contains(&name);
    if block {
        out.push('\n');
    }
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if collapsed.is_empty() {
                continue;
            }
            if text.starts_with(char::is_whitespace) && !out.ends_with([' ', '\n']) {
                out.push(' ');
            }
            out.push_str(&collapsed);
            if text.ends_with(char::is_whitespace) {
                out.push(' ');
            }
        } else if let Some(child_element) = ElementRef::wrap(child) {
            walk_text(child_element, out);
        }
    }
    if block {
        out.push('\n');
    }
}

/// Readable text of an HTML page, without scripts or styles.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();
    walk_text(document.root_element(), &mut text);
    collapse_blank_lines(&text)
}

/// Trim trailing whitespace per line and squeeze runs of blank lines into one.
pub fn collapse_blank_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut previous_blank = false;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            if !previous_blank {
                lines.push("");
            }
            previous_blank = true;
        } else {
            lines.push(line.trim_start_matches(' '));
            previous_blank = false;
        }
    }
    lines.join("\n").trim().to_string()
}

/// Contents of `papers/<key>.txt`.
pub fn format_source_file(source: &UrlSource, fetched: &str, text: &str) -> String {
    format!(
        "Citation Key: {}\nURL: {}\nFetched: {}\n{}\n\n{}",
        source.key,
        source.url,
        fetched,
        "-".repeat(80),
        text
    )
}

/// Replace the scheme and host of `url` with `base`.
fn rebase_url(url: &str, base: &str) -> String {
    let path = url
        .find("://")
        .map(|i| i + 3)
        .and_then(|host_start| url[host_start..].find('/').map(|p| &url[host_start + p..]))
        .unwrap_or("/");
    format!("{}{}", base.trim_end_matches('/'), path)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Downloads web sources into the papers directory.
pub struct UrlFetcher {
    timeout: Duration,
    retry_window: Duration,
    delay: Duration,
}

impl UrlFetcher {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.fetch_timeout,
            retry_window: config.fetch_timeout,
            delay: config.fetch_delay,
        }
    }

    /// Fetch a page and return its text. Server errors and network failures
    /// are retried; client errors are not.
    pub async fn fetch_text(&self, url: &str) -> Result<String, CiteError> {
        let url = match std::env::var(FETCH_BASE_URL_VAR) {
            Ok(base) => rebase_url(url, &base),
            Err(_) => url.to_string(),
        };

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(self.retry_window),
            ..Default::default()
        };

        let operation = || async {
            debug!("GET {}", url);
            let response = HTTP_CLIENT
                .get(&url)
                .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
                .header("Accept-Language", "en-US,en;q=0.5")
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(CiteError::NetworkError(e)))?;

            let status = response.status();
            if status.is_success() {
                return response
                    .text()
                    .await
                    .map_err(|e| backoff::Error::transient(CiteError::NetworkError(e)));
            }
            let err = CiteError::HttpError(format!("{} returned status {}", url, status));
            if status.is_client_error() {
                Err(backoff::Error::permanent(err))
            } else {
                warn!("{} returned status {}, retrying", url, status);
                Err(backoff::Error::transient(err))
            }
        };

        let html = retry(backoff, operation).await?;
        Ok(html_to_text(&html))
    }

    /// Fetch each source into `<papers_dir>/<key>.txt`, skipping files that exist.
    pub async fn fetch_all(&self, sources: &[UrlSource], papers_dir: &Path) -> Result<FetchSummary, CiteError> {
        if !papers_dir.exists() {
            info!("Creating papers directory: {}", papers_dir.display());
            fs::create_dir_all(papers_dir).map_err(|e| CiteError::io(papers_dir, e))?;
        }

        let mut summary = FetchSummary::default();
        for (i, source) in sources.iter().enumerate() {
            let output_path: PathBuf = papers_dir.join(format!("{}.txt", source.key));
            info!("Processing {}/{}: {}", i + 1, sources.len(), source.key);
            if let Some(title) = &source.title {
                info!("  Title: {}", title);
            }
            if output_path.exists() {
                info!("  File already exists, skipping: {}", output_path.display());
                summary.skipped += 1;
                continue;
            }

            match self.fetch_text(&source.url).await {
                Ok(text) => {
                    let fetched = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
                    let content = format_source_file(source, &fetched, &text);
                    match fs::write(&output_path, content) {
                        Ok(()) => {
                            info!("Saved: {}", output_path.display());
                            summary.successful += 1;
                        }
                        Err(e) => {
                            error!("Error writing {}: {}", output_path.display(), e);
                            summary.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    error!("Error fetching {}: {}", source.url, e);
                    summary.failed += 1;
                }
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        info!(
            "Completed: {} successful, {} failed, {} skipped",
            summary.successful, summary.failed, summary.skipped
        );
        Ok(summary)
    }
}
