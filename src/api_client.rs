//! Component A: paginated retrieval of Paper records from a remote
//! OParl-like list endpoint.
//!
//! Grounded on this codebase's `scrapers/http_client` (reqwest client
//! wrapper, request timeout, status-driven retry signal) and
//! `discovery/sources/wayback` (parsing a JSON envelope into domain
//! records page by page). The pagination loop is hand-rolled instead of
//! collected into a `Vec` up front — the contract requires a lazy
//! sequence, since the number of Papers can exceed memory.

use std::collections::VecDeque;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::{PipelineError, Result};
use crate::models::{FileDescriptor, Paper};
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    data: Vec<OParlPaper>,
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OParlPaper {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(rename = "paperType", default)]
    paper_type: Option<String>,
    #[serde(rename = "mainFile", default)]
    main_file: Option<OParlFile>,
    #[serde(rename = "auxiliaryFile", default)]
    auxiliary_file: Vec<OParlFile>,
}

#[derive(Debug, Deserialize)]
struct OParlFile {
    #[serde(rename = "accessUrl")]
    access_url: String,
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "fileName", default)]
    file_name: Option<String>,
}

impl From<OParlFile> for FileDescriptor {
    fn from(f: OParlFile) -> Self {
        FileDescriptor {
            access_url: f.access_url,
            mime_type: f.mime_type.unwrap_or_else(|| "application/pdf".into()),
            size_bytes: f.size,
            filename: f.file_name,
        }
    }
}

impl From<OParlPaper> for Paper {
    fn from(p: OParlPaper) -> Self {
        let mut files = Vec::new();
        let main_file_index = p.main_file.map(|f| {
            files.push(FileDescriptor::from(f));
            0usize
        });
        files.extend(p.auxiliary_file.into_iter().map(FileDescriptor::from));

        Paper {
            id: p.id,
            title: p.name.unwrap_or_default(),
            reference: p.reference,
            date: p
                .date
                .as_deref()
                .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&chrono::Utc)),
            document_type: p.paper_type,
            files,
            main_file_index,
        }
    }
}

pub struct ApiClient {
    http: Client,
    config: ApiConfig,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<ApiClient> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_sec))
            .build()?;
        let retry = RetryPolicy::new(
            config.retry_attempts,
            config.retry_backoff_base_sec,
            Duration::from_secs(60),
        );
        Ok(ApiClient { http, config, retry })
    }

    /// Returns a lazy sequence over Paper records. Never materializes more
    /// than one page at a time.
    pub fn iterate_papers(&self, page_limit: Option<u32>) -> PaperIterator<'_> {
        let start_url = self.first_page_url();
        PaperIterator {
            client: self,
            next_url: Some(start_url),
            buffer: VecDeque::new(),
            pages_delivered: 0,
            page_limit: page_limit.or(self.config.page_limit),
            exhausted: false,
        }
    }

    fn first_page_url(&self) -> String {
        format!(
            "{}?modified_since={}&modified_until={}",
            self.config.base_url, self.config.window_start, self.config.window_end
        )
    }

    async fn fetch_page(&self, url: &str) -> Result<ListEnvelope> {
        let url = url.to_string();
        let http = self.http.clone();
        self.retry
            .run(
                || {
                    let url = url.clone();
                    let http = http.clone();
                    async move {
                        let response = http.get(&url).send().await.map_err(PageError::Http)?;
                        let status = response.status();
                        if !status.is_success() {
                            return Err(PageError::Status(status));
                        }
                        response.json::<ListEnvelope>().await.map_err(PageError::Http)
                    }
                },
                |e| e.is_retryable(),
            )
            .await
            .map_err(|e| PipelineError::Fetch(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
enum PageError {
    #[error("http error: {0}")]
    Http(reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

impl PageError {
    fn is_retryable(&self) -> bool {
        match self {
            PageError::Http(e) => e.is_timeout() || e.is_connect(),
            PageError::Status(s) => s.is_server_error() || *s == StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

/// Lazy, page-at-a-time iterator over Paper records. Consumers call
/// [`next`](PaperIterator::next) in a loop; pages are fetched on demand.
pub struct PaperIterator<'a> {
    client: &'a ApiClient,
    next_url: Option<String>,
    buffer: VecDeque<Paper>,
    pages_delivered: u32,
    page_limit: Option<u32>,
    exhausted: bool,
}

impl<'a> PaperIterator<'a> {
    pub async fn next(&mut self) -> Result<Option<Paper>> {
        loop {
            if let Some(paper) = self.buffer.pop_front() {
                return Ok(Some(paper));
            }
            if self.exhausted {
                return Ok(None);
            }
            let Some(url) = self.next_url.take() else {
                self.exhausted = true;
                return Ok(None);
            };
            if let Some(limit) = self.page_limit {
                if self.pages_delivered >= limit {
                    self.exhausted = true;
                    return Ok(None);
                }
            }

            debug!(url = %url, "fetching paper list page");
            let envelope = match self.client.fetch_page(&url).await {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "terminal fetch failure mid-iteration");
                    self.exhausted = true;
                    return Err(e);
                }
            };

            self.pages_delivered += 1;
            self.next_url = envelope.links.and_then(|l| l.next);
            self.buffer.extend(envelope.data.into_iter().map(Paper::from));

            if self.next_url.is_none() && self.buffer.is_empty() {
                self.exhausted = true;
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_paper_with_files() {
        let json = r#"{
            "data": [{
                "id": "https://oparl.example/paper/1",
                "name": "Sanierung der Ludwigstraße",
                "date": "2024-05-01T00:00:00Z",
                "mainFile": {"accessUrl": "https://oparl.example/file/1.pdf", "mimeType": "application/pdf"},
                "auxiliaryFile": []
            }],
            "links": {"next": "https://oparl.example/papers?page=2"}
        }"#;
        let envelope: ListEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.data.len(), 1);
        let paper = Paper::from(envelope.data.into_iter().next().unwrap());
        assert_eq!(paper.id, "https://oparl.example/paper/1");
        assert_eq!(paper.main_file().unwrap().access_url, "https://oparl.example/file/1.pdf");
        assert_eq!(envelope.links.unwrap().next.unwrap(), "https://oparl.example/papers?page=2");
    }

    #[test]
    fn paper_with_no_files_has_no_main_file() {
        let paper = Paper::from(OParlPaper {
            id: "x".into(),
            name: None,
            reference: None,
            date: None,
            paper_type: None,
            main_file: None,
            auxiliary_file: vec![],
        });
        assert!(paper.main_file().is_none());
    }
}
