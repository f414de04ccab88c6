//! Component B: download a PDF and extract plain text via an ordered
//! fallback chain.
//!
//! Grounded on this codebase's `ocr/extractor.rs`: the same shell-out
//! tool discovery (`which`), the same `TempDir`-scoped cleanup, and the
//! same `ExtractionMethod`/`ExtractionError` shape. This component runs a
//! strict ordered fallback (primary in-process parser, then layout
//! parser, then OCR), only advancing a stage when the prior stage
//! produced empty or whitespace-only text.

use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use reqwest::Client;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::models::{ExtractionMethod, ExtractionResult};
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
enum ExtractError {
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("response exceeded max_response_bytes")]
    TooLarge,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct PdfExtractor {
    http: Client,
    config: ExtractionConfig,
    retry: RetryPolicy,
}

impl PdfExtractor {
    pub fn new(http: Client, config: ExtractionConfig) -> PdfExtractor {
        let retry = RetryPolicy::new(3, 1.0, Duration::from_secs(30));
        PdfExtractor { http, config, retry }
    }

    /// Always returns a result; document-level failures are carried in
    /// `ExtractionResult.method == Failed`, never raised.
    pub async fn extract(&self, paper_id: &str, url: &str) -> ExtractionResult {
        match self.try_extract(url).await {
            Ok((text, page_count, method, spilled)) => ExtractionResult {
                paper_id: paper_id.to_string(),
                pdf_url: url.to_string(),
                text,
                page_count,
                method,
                spilled_to_disk: spilled,
                error: None,
            },
            Err(e) => {
                warn!(paper_id, url, error = %e, "extraction failed");
                ExtractionResult {
                    paper_id: paper_id.to_string(),
                    pdf_url: url.to_string(),
                    text: String::new(),
                    page_count: 0,
                    method: ExtractionMethod::Failed,
                    spilled_to_disk: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_extract(&self, url: &str) -> Result<(String, u32, ExtractionMethod, bool), ExtractError> {
        let (bytes, spilled_path) = self.download(url).await?;

        if let Some((text, page_count)) = extract_primary_text_layer(&bytes) {
            if !text.trim().is_empty() {
                return Ok((clean(&text), page_count, ExtractionMethod::PrimaryTextLayer, spilled_path.is_some()));
            }
        }

        if let Some(path) = spilled_path.as_ref().map(|f| f.path()) {
            if let Some((text, page_count)) = extract_secondary_layout(path) {
                if !text.trim().is_empty() {
                    return Ok((clean(&text), page_count, ExtractionMethod::SecondaryLayoutParser, true));
                }
            }

            if self.config.enable_ocr {
                if let Some((text, page_count)) = extract_ocr(path) {
                    if !text.trim().is_empty() {
                        return Ok((clean(&text), page_count, ExtractionMethod::OpticalRecognition, true));
                    }
                }
            }
        } else {
            // In-memory path still needs a file on disk for the
            // shell-out stages; materialize one lazily only if needed.
            let tmp = write_temp_pdf(&bytes)?;
            if let Some((text, page_count)) = extract_secondary_layout(tmp.path()) {
                if !text.trim().is_empty() {
                    return Ok((clean(&text), page_count, ExtractionMethod::SecondaryLayoutParser, false));
                }
            }
            if self.config.enable_ocr {
                if let Some((text, page_count)) = extract_ocr(tmp.path()) {
                    if !text.trim().is_empty() {
                        return Ok((clean(&text), page_count, ExtractionMethod::OpticalRecognition, false));
                    }
                }
            }
        }

        Err(ExtractError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no extraction stage produced non-empty text",
        )))
    }

    /// Download with a bounded timeout and max size; spill to a scoped
    /// temp file above `memory_threshold_bytes`, buffer in memory
    /// otherwise. The temp file (if any) is deleted when its `NamedTempFile`
    /// drops, on every exit path including errors.
    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<NamedTempFile>), ExtractError> {
        let http = self.http.clone();
        let url = url.to_string();
        let max_bytes = self.config.max_response_bytes;
        let threshold = self.config.memory_threshold_bytes;

        self.retry
            .run(
                || {
                    let http = http.clone();
                    let url = url.clone();
                    async move { download_once(&http, &url, max_bytes, threshold).await }
                },
                |e| matches!(e, ExtractError::Download(inner) if inner.is_timeout() || inner.is_connect()),
            )
            .await
    }
}

async fn download_once(
    http: &Client,
    url: &str,
    max_bytes: u64,
    threshold: u64,
) -> Result<(Vec<u8>, Option<NamedTempFile>), ExtractError> {
    let response = http.get(url).send().await?;
    if let Some(len) = response.content_length() {
        if len > max_bytes {
            return Err(ExtractError::TooLarge);
        }
    }

    if response.content_length().unwrap_or(0) > threshold {
        let mut file = NamedTempFile::new()?;
        let bytes = response.bytes().await?;
        if bytes.len() as u64 > max_bytes {
            return Err(ExtractError::TooLarge);
        }
        file.write_all(&bytes)?;
        file.flush()?;
        return Ok((bytes.to_vec(), Some(file)));
    }

    let bytes = response.bytes().await?;
    if bytes.len() as u64 > max_bytes {
        return Err(ExtractError::TooLarge);
    }
    if bytes.len() as u64 > threshold {
        let mut file = NamedTempFile::new()?;
        file.write_all(&bytes)?;
        file.flush()?;
        return Ok((bytes.to_vec(), Some(file)));
    }
    Ok((bytes.to_vec(), None))
}

fn write_temp_pdf(bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

/// Primary stage: the in-process text-layer parser. Never shells out.
fn extract_primary_text_layer(bytes: &[u8]) -> Option<(String, u32)> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => {
            let page_count = text.matches('\u{c}').count().max(1) as u32;
            Some((text.replace('\u{c}', "\n"), page_count))
        }
        Err(e) => {
            debug!(error = %e, "primary text-layer parser failed");
            None
        }
    }
}

/// Secondary stage: `pdftotext -layout`, which preserves column layout
/// better than the primary parser for tabular council documents.
fn extract_secondary_layout(path: &Path) -> Option<(String, u32)> {
    if which::which("pdftotext").is_err() {
        debug!("pdftotext not found in PATH, skipping secondary layout parser");
        return None;
    }
    let output = Command::new("pdftotext")
        .args(["-layout", "-enc", "UTF-8"])
        .arg(path)
        .arg("-")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).into_owned();
    let page_count = page_count_via_pdfinfo(path).unwrap_or(1);
    Some((text, page_count))
}

/// Tertiary stage: rasterize with `pdftoppm`, OCR each page with
/// `tesseract`.
fn extract_ocr(path: &Path) -> Option<(String, u32)> {
    if which::which("pdftoppm").is_err() || which::which("tesseract").is_err() {
        debug!("pdftoppm/tesseract not found in PATH, skipping OCR stage");
        return None;
    }
    let workdir = tempfile::tempdir().ok()?;
    let prefix = workdir.path().join("page");
    let status = Command::new("pdftoppm")
        .args(["-png", "-r", "200"])
        .arg(path)
        .arg(&prefix)
        .status()
        .ok()?;
    if !status.success() {
        return None;
    }

    let mut pages: Vec<_> = std::fs::read_dir(workdir.path())
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "png").unwrap_or(false))
        .collect();
    pages.sort();

    let mut page_texts = Vec::new();
    for page in &pages {
        let output = Command::new("tesseract")
            .arg(page)
            .arg("stdout")
            .output()
            .ok()?;
        if output.status.success() {
            page_texts.push(String::from_utf8_lossy(&output.stdout).into_owned());
        }
    }

    if page_texts.is_empty() {
        return None;
    }
    let page_count = page_texts.len() as u32;
    Some((page_texts.join("\n"), page_count))
}

fn page_count_via_pdfinfo(path: &Path) -> Option<u32> {
    if which::which("pdfinfo").is_err() {
        return None;
    }
    let output = Command::new("pdfinfo").arg(path).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// Join pages with a single newline and trim the whole document, per the
/// numerics-and-policy note.
fn clean(text: &str) -> String {
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_trims_whitespace() {
        assert_eq!(clean("  hello world  \n\n"), "hello world");
    }

    #[test]
    fn extract_primary_text_layer_handles_non_pdf_gracefully() {
        assert!(extract_primary_text_layer(b"not a pdf").is_none());
    }
}
