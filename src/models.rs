//! Core data types shared across every component.
//!
//! Grounded on this codebase's `models/document.rs`: plain structs with
//! `serde` derives and small enums for status/tag fields rather than
//! stringly-typed attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file attached to a [`Paper`]. Transient: consumed during extraction,
/// never persisted as its own entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub access_url: String,
    pub mime_type: String,
    pub size_bytes: Option<u64>,
    pub filename: Option<String>,
}

/// The central entity: a council document record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    /// Globally unique URL, stable across runs.
    pub id: String,
    pub title: String,
    pub reference: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub document_type: Option<String>,
    pub files: Vec<FileDescriptor>,
    pub main_file_index: Option<usize>,
}

impl Paper {
    /// The file to download: the pre-selected main file if present,
    /// otherwise the first descriptor. `None` if there are no files at all
    /// (the caller records the Paper as skipped, not failed).
    pub fn main_file(&self) -> Option<&FileDescriptor> {
        self.main_file_index
            .and_then(|i| self.files.get(i))
            .or_else(|| self.files.first())
    }
}

/// The extraction method a `PDF Extractor` run actually used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PrimaryTextLayer,
    SecondaryLayoutParser,
    OpticalRecognition,
    Failed,
}

/// Product of component B. Always produced, never raised as an error for
/// document-level failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub paper_id: String,
    pub pdf_url: String,
    pub text: String,
    pub page_count: u32,
    pub method: ExtractionMethod,
    pub spilled_to_disk: bool,
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        self.method != ExtractionMethod::Failed && !self.text.trim().is_empty()
    }
}

/// Category tag shared by candidate toponyms and resolved locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationCategory {
    Street,
    District,
    PlanReference,
    ParcelNumber,
    OtherPlace,
}

/// How a candidate toponym (or resolved location) was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethodTag {
    GazetteerDirect,
    NerValidated,
    NerRaw,
    Regex,
}

/// Intermediate product of component C: a toponym observed in text, not yet
/// geocoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateToponym {
    pub surface: String,
    pub category: LocationCategory,
    pub method: ExtractionMethodTag,
    /// Present only when the gazetteer pass already knows the coordinates.
    pub canonical_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Where a resolved [`Location`]'s coordinates (if any) came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Gazetteer,
    RemoteGeocoder,
    Unresolved,
}

/// Product of component D: a toponym with coordinates attached (or marked
/// unresolved). Every instance must carry `paper_id` and `pdf_url` — no
/// orphan locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub paper_id: String,
    pub pdf_url: String,
    pub category: LocationCategory,
    pub canonical_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub display_name: Option<String>,
    pub provenance: Provenance,
}

impl Location {
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Coordinate validity per the invariant: lat in [-90, 90], lon in
    /// [-180, 180]. A location outside this range is treated as having no
    /// coordinates at all.
    pub fn validate_coordinates(&mut self) {
        let valid = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon),
            _ => true,
        };
        if !valid {
            self.latitude = None;
            self.longitude = None;
            self.display_name = None;
            self.provenance = Provenance::Unresolved;
        }
    }
}

/// A static, read-only reference-data entry loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazetteerEntry {
    pub canonical: String,
    pub normalized: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub category: LocationCategory,
}

/// Processing status for a (run_id, paper_id) pair. Transitions form a DAG:
/// `Pending -> InProgress -> {Completed, Failed, Skipped}`; `Failed` may
/// re-enter `Pending` only via an explicit retry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::InProgress => "in_progress",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => ProcessingStatus::Pending,
            "in_progress" => ProcessingStatus::InProgress,
            "completed" => ProcessingStatus::Completed,
            "failed" => ProcessingStatus::Failed,
            "skipped" => ProcessingStatus::Skipped,
            _ => return None,
        })
    }
}

/// Aggregate counters recorded for a run, surfaced by `summarize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub fetched: u64,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub locations_extracted: u64,
    pub locations_geocoded: u64,
}

/// An enriched Paper ready for the writers: the record plus the full
/// extracted text and its resolved (or unresolved) locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    pub paper: Paper,
    pub full_text: String,
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub batch_seq: u64,
    pub last_completed_paper_id: String,
}
