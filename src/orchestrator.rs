//! Component G: the batch-oriented run loop tying every component
//! together.
//!
//! Grounded on this codebase's `services/download/mod.rs` worker-pool
//! idiom (bounded `tokio::task` fan-out over a channel, joined per batch)
//! and `scrapers/pipeline.rs`'s "fetch, process, checkpoint" loop shape.
//! This loop terminates once the source is exhausted or
//! `orchestrator.paper_limit` is reached, rather than crawling
//! indefinitely.

use std::collections::HashSet;

use reqwest::Client;
use tracing::{error, info, warn};

use crate::api_client::ApiClient;
use crate::config::Config;
use crate::error::Result;
use crate::gazetteer::Gazetteer;
use crate::geocoder::Geocoder;
use crate::location_extractor::{LocationExtractor, RegexNerBackend};
use crate::models::{Paper, PaperRecord, ProcessingStatus, RunSummary};
use crate::pdf_extractor::PdfExtractor;
use crate::state_store::StateStore;
use crate::writers::Writers;

pub struct Orchestrator {
    config: Config,
    api_client: ApiClient,
    pdf_extractor: PdfExtractor,
    geocoder: Geocoder,
    gazetteer: Gazetteer,
    state: StateStore,
    writers: Writers,
    blocklist: HashSet<String>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Orchestrator> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.api.http_timeout_sec))
            .build()?;
        let geocoding_http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.geocoding.timeout_sec))
            .danger_accept_invalid_certs(!config.geocoding.verify_tls)
            .build()?;

        let api_client = ApiClient::new(config.api.clone())?;
        let pdf_extractor = PdfExtractor::new(http, config.extraction());
        let geocoder = Geocoder::new(geocoding_http, config.geocoding.clone(), &config.city);
        let gazetteer = Gazetteer::load(&config.spatial.gazetteer_path)?;
        let state = StateStore::open(&config.state.db_path)?;
        let writers = Writers::new(
            &config.storage.base_path,
            config.storage.parquet_config(),
            &config.storage.graph_base_uri,
            &config.city,
        );
        let blocklist = load_blocklist(config.spatial.blocklist_path.as_deref())?;

        Ok(Orchestrator {
            config,
            api_client,
            pdf_extractor,
            geocoder,
            gazetteer,
            state,
            writers,
            blocklist,
        })
    }

    /// Runs to completion (source exhausted or `paper_limit` reached), or
    /// returns the first unexpected error encountered between batches. A
    /// batch that fails partway through marks its in-flight Paper `failed`
    /// and does not advance the checkpoint, so a rerun revisits it.
    pub async fn run(&self) -> Result<RunSummary> {
        let orchestrator_config = self.config.orchestrator();
        let run_id = self.state.begin_run(&self.config.city)?;
        info!(run_id, city = %self.config.city, "run started");

        let ner = RegexNerBackend;
        let mut summary = RunSummary::default();
        let mut batch_seq: u64 = 0;
        let mut iterator = self.api_client.iterate_papers(self.config.api.page_limit);

        'outer: loop {
            let mut batch: Vec<Paper> = Vec::with_capacity(orchestrator_config.batch_size);
            while batch.len() < orchestrator_config.batch_size {
                if let Some(limit) = orchestrator_config.paper_limit {
                    if summary.fetched >= limit {
                        break;
                    }
                }
                match iterator.next().await {
                    Ok(Some(paper)) => {
                        summary.fetched += 1;
                        batch.push(paper);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "terminal fetch error, ending run");
                        self.state.end_run(&run_id, "failed", &summary)?;
                        return Err(e);
                    }
                }
            }

            if batch.is_empty() {
                break 'outer;
            }

            match self
                .process_batch(&run_id, &ner, &self.blocklist, batch, &mut summary)
                .await
            {
                Ok(Some(last_paper_id)) => {
                    batch_seq += 1;
                    self.state.write_checkpoint(&run_id, batch_seq, &last_paper_id)?;
                }
                Ok(None) => {
                    // Every paper in the batch was skipped; nothing to checkpoint.
                }
                Err(e) => {
                    warn!(error = %e, "batch aborted, checkpoint not advanced");
                }
            }

            if let Some(limit) = orchestrator_config.paper_limit {
                if summary.fetched >= limit {
                    break 'outer;
                }
            }
        }

        self.writers.finalize()?;
        self.state.end_run(&run_id, "completed", &summary)?;
        info!(run_id, ?summary, "run finished");
        Ok(summary)
    }

    /// Processes one batch: download, extract, geocode, write, mark. A
    /// Paper already marked completed in any prior run is skipped unless
    /// `orchestrator.skip_existing` is disabled. Returns the id of the last
    /// Paper the batch completed, or `None` if every Paper was skipped.
    async fn process_batch(
        &self,
        run_id: &str,
        ner: &RegexNerBackend,
        blocklist: &HashSet<String>,
        batch: Vec<Paper>,
        summary: &mut RunSummary,
    ) -> Result<Option<String>> {
        let orchestrator_config = self.config.orchestrator();
        let extractor = LocationExtractor::new(&self.gazetteer, Some(ner), self.config.spatial.fuzzy_threshold, blocklist.clone());

        let mut to_process = Vec::with_capacity(batch.len());
        for paper in batch {
            if orchestrator_config.skip_existing && self.state.is_completed(&paper.id)? {
                self.state.mark(run_id, &paper.id, ProcessingStatus::Skipped, None)?;
                summary.skipped += 1;
                continue;
            }
            if paper.main_file().is_none() {
                self.state.mark(run_id, &paper.id, ProcessingStatus::Skipped, Some("paper has no files to download"))?;
                summary.skipped += 1;
                continue;
            }
            self.state.mark(run_id, &paper.id, ProcessingStatus::InProgress, None)?;
            to_process.push(paper);
        }

        if to_process.is_empty() {
            return Ok(None);
        }

        let extracted = self.download_and_extract(to_process).await;

        let mut records = Vec::with_capacity(extracted.len());
        let mut last_completed: Option<String> = None;
        for (paper, extraction) in extracted {
            if !extraction.is_success() {
                self.state.mark(run_id, &paper.id, ProcessingStatus::Failed, extraction.error.as_deref())?;
                summary.failed += 1;
                continue;
            }

            let mut locations = extractor.extract(&extraction.text, &paper.id, &extraction.pdf_url);
            summary.locations_extracted += locations.len() as u64;
            for location in &mut locations {
                self.geocoder.resolve(location).await;
                if location.has_coordinates() {
                    summary.locations_geocoded += 1;
                }
            }

            self.state.mark(run_id, &paper.id, ProcessingStatus::Completed, None)?;
            summary.processed += 1;
            last_completed = Some(paper.id.clone());
            records.push(PaperRecord {
                paper,
                full_text: extraction.text,
                locations,
            });
        }

        if !records.is_empty() {
            self.writers.write_batch(&self.config.city, &records)?;
        }

        Ok(last_completed)
    }

    /// Downloads and extracts up to `extraction.max_workers` Papers
    /// concurrently. Per-Paper failures are carried in the returned
    /// `ExtractionResult`, never surfaced as a batch-level error. Callers
    /// only pass Papers that already have a main file; `process_batch`
    /// routes fileless Papers to `Skipped` before reaching here.
    async fn download_and_extract(&self, papers: Vec<Paper>) -> Vec<(Paper, crate::models::ExtractionResult)> {
        let extraction_config = self.config.extraction();
        let max_workers = extraction_config.max_workers.max(1);
        let delay = std::time::Duration::from_secs_f64(extraction_config.per_download_delay_sec);

        let mut results = Vec::with_capacity(papers.len());
        for chunk in papers.chunks(max_workers) {
            let mut handles = Vec::with_capacity(chunk.len());
            for paper in chunk {
                let paper = paper.clone();
                let Some(main_file) = paper.main_file().cloned() else {
                    continue;
                };
                let extractor = self.pdf_extractor.clone();
                handles.push(tokio::spawn(async move {
                    let result = extractor.extract(&paper.id, &main_file.access_url).await;
                    (paper, result)
                }));
            }
            for handle in handles {
                if let Ok((paper, extraction)) = handle.await {
                    results.push((paper, extraction));
                }
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        results
    }
}

/// Reads and normalizes blocklist entries from `spatial.blocklist_path`, one
/// per line. Returns an empty set when no path is configured.
fn load_blocklist(path: Option<&std::path::Path>) -> Result<HashSet<String>> {
    let Some(path) = path else {
        return Ok(HashSet::new());
    };
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(crate::gazetteer::normalize)
        .collect())
}
