//! Component C: hybrid toponym extraction (gazetteer + regex + NER).
//!
//! The regex/NER pass is grounded on this codebase's
//! `foia-annotate::services::ner` module: `LazyLock` regex/set statics, a
//! `seen` dedup key, and plausibility filtering, retuned here from FOIA
//! entity types (organizations, persons, file numbers) to German
//! municipal toponym patterns (street addresses, Bebauungsplan codes,
//! parcel numbers). The NER stage sits behind a trait so a model-backed
//! backend can be swapped in later without touching the rest of this
//! module — consistent with "the core contract never requires them."

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::gazetteer::{normalize, Gazetteer};
use crate::models::{CandidateToponym, ExtractionMethodTag, Location, LocationCategory, Provenance};

static PLAN_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Bebauungsplan(?:\s+Nr\.?)?|B-Plan)\s*[A-Za-z0-9./-]+").unwrap()
});

static PARCEL_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:Flurstück(?:e)?(?:\s+Nr\.?)?)\s*[0-9]+(?:/[0-9]+)?").unwrap()
});

static STREET_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-ZÄÖÜ][a-zäöüß]+(?:straße|strasse|weg|gasse|platz|allee|ring)\s+\d{1,4}[a-z]?\b")
        .unwrap()
});

static CAPITALIZED_PLACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-ZÄÖÜ][a-zäöüß]{3,}(?:\s[A-ZÄÖÜ][a-zäöüß]{3,})?\b").unwrap()
});

static DEFAULT_BLOCKLIST: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "Der", "Die", "Das", "Stadt", "Rat", "Ausschuss", "Sitzung", "Beschluss", "Antrag",
        "Tagesordnung", "Verwaltung", "Abteilung",
    ]
    .into_iter()
    .collect()
});

/// Pluggable text-analysis backend for named-entity recognition over
/// location mentions. The only built-in implementation is regex-driven and
/// always available; a model-backed backend can implement this trait
/// without requiring any change to [`LocationExtractor`].
pub trait NerBackend: Send + Sync {
    fn extract_location_candidates(&self, text: &str) -> Vec<String>;
}

/// Zero-dependency backend: capitalized multi-word sequences, filtered by
/// a blocklist, handed to the caller for gazetteer/fuzzy validation.
pub struct RegexNerBackend;

impl NerBackend for RegexNerBackend {
    fn extract_location_candidates(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for m in CAPITALIZED_PLACE.find_iter(text) {
            let candidate = m.as_str().to_string();
            if DEFAULT_BLOCKLIST.contains(candidate.as_str()) {
                continue;
            }
            let key = normalize(&candidate);
            if seen.insert(key) {
                out.push(candidate);
            }
        }
        out
    }
}

pub struct LocationExtractor<'a> {
    gazetteer: &'a Gazetteer,
    ner: Option<&'a dyn NerBackend>,
    fuzzy_threshold: f64,
    blocklist: HashSet<String>,
}

impl<'a> LocationExtractor<'a> {
    pub fn new(gazetteer: &'a Gazetteer, ner: Option<&'a dyn NerBackend>, fuzzy_threshold: f64, blocklist: HashSet<String>) -> Self {
        LocationExtractor {
            gazetteer,
            ner,
            fuzzy_threshold,
            blocklist,
        }
    }

    /// Total: empty text yields an empty list, never an error.
    pub fn extract(&self, text: &str, paper_id: &str, pdf_url: &str) -> Vec<Location> {
        let mut candidates: Vec<CandidateToponym> = Vec::new();

        self.scan_gazetteer(text, &mut candidates);
        self.scan_regex(text, &mut candidates);
        self.scan_ner(text, &mut candidates);

        dedup(candidates)
            .into_iter()
            .map(|c| CandidateToponym::into_location(c, paper_id, pdf_url))
            .collect()
    }

    fn scan_gazetteer(&self, text: &str, out: &mut Vec<CandidateToponym>) {
        for entry in self.gazetteer.entries() {
            let mut forms = vec![entry.canonical.as_str()];
            forms.extend(entry.aliases.iter().map(String::as_str));
            if forms.iter().any(|f| contains_whole_word(text, f)) {
                out.push(CandidateToponym {
                    surface: entry.canonical.clone(),
                    category: LocationCategory::Street,
                    method: ExtractionMethodTag::GazetteerDirect,
                    canonical_name: entry.canonical.clone(),
                    latitude: Some(entry.latitude),
                    longitude: Some(entry.longitude),
                });
            }
        }
    }

    fn scan_regex(&self, text: &str, out: &mut Vec<CandidateToponym>) {
        for m in PLAN_REFERENCE.find_iter(text) {
            out.push(candidate_from_regex(m.as_str(), LocationCategory::PlanReference));
        }
        for m in PARCEL_NUMBER.find_iter(text) {
            out.push(candidate_from_regex(m.as_str(), LocationCategory::ParcelNumber));
        }
        for m in STREET_ADDRESS.find_iter(text) {
            out.push(candidate_from_regex(m.as_str(), LocationCategory::Street));
        }
    }

    fn scan_ner(&self, text: &str, out: &mut Vec<CandidateToponym>) {
        let Some(ner) = self.ner else { return };
        for candidate in ner.extract_location_candidates(text) {
            if let Some(entry) = self.gazetteer.fuzzy_lookup(&candidate, self.fuzzy_threshold) {
                out.push(CandidateToponym {
                    surface: candidate,
                    category: LocationCategory::Street,
                    method: ExtractionMethodTag::NerValidated,
                    canonical_name: entry.canonical.clone(),
                    latitude: Some(entry.latitude),
                    longitude: Some(entry.longitude),
                });
            } else if !self.blocklist.contains(&normalize(&candidate)) {
                out.push(CandidateToponym {
                    surface: candidate.clone(),
                    category: LocationCategory::OtherPlace,
                    method: ExtractionMethodTag::NerRaw,
                    canonical_name: candidate,
                    latitude: None,
                    longitude: None,
                });
            }
        }
    }
}

fn candidate_from_regex(surface: &str, category: LocationCategory) -> CandidateToponym {
    CandidateToponym {
        surface: surface.to_string(),
        category,
        method: ExtractionMethodTag::Regex,
        canonical_name: surface.trim().to_string(),
        latitude: None,
        longitude: None,
    }
}

fn contains_whole_word(text: &str, word: &str) -> bool {
    let pattern = regex::escape(word);
    Regex::new(&format!(r"(?i)\b{pattern}\b"))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Collapse entries sharing (canonical_name, category), keeping the first
/// provenance seen (passes run in gazetteer, regex, NER order already).
fn dedup(candidates: Vec<CandidateToponym>) -> Vec<CandidateToponym> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for c in candidates {
        let key = (normalize(&c.canonical_name), c.category);
        if seen.insert(key) {
            out.push(c);
        }
    }
    out
}

impl CandidateToponym {
    fn into_location(self, paper_id: &str, pdf_url: &str) -> Location {
        Location {
            paper_id: paper_id.to_string(),
            pdf_url: pdf_url.to_string(),
            category: self.category,
            canonical_name: self.canonical_name,
            latitude: self.latitude,
            longitude: self.longitude,
            display_name: None,
            provenance: if self.latitude.is_some() {
                Provenance::Gazetteer
            } else {
                Provenance::Unresolved
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn gazetteer_with(entries: &str) -> Gazetteer {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"entries": [{entries}]}}"#).unwrap();
        Gazetteer::load(f.path()).unwrap()
    }

    #[test]
    fn gazetteer_scan_prefills_coordinates() {
        let gaz = gazetteer_with(r#"{"canonical": "Ludwigstraße", "latitude": 48.3456, "longitude": 10.8901}"#);
        let extractor = LocationExtractor::new(&gaz, None, 0.85, HashSet::new());
        let locs = extractor.extract("Sanierung der Ludwigstraße 12", "p1", "https://x/1.pdf");
        let gaz_hit = locs.iter().find(|l| l.canonical_name == "Ludwigstraße").unwrap();
        assert_eq!(gaz_hit.provenance, Provenance::Gazetteer);
        assert_eq!(gaz_hit.latitude, Some(48.3456));
    }

    #[test]
    fn regex_scan_finds_plan_reference() {
        let gaz = gazetteer_with("");
        let extractor = LocationExtractor::new(&gaz, None, 0.85, HashSet::new());
        let locs = extractor.extract("Beschluss zu Bebauungsplan Nr. 1234 vorgelegt", "p1", "u");
        assert!(locs.iter().any(|l| l.category == LocationCategory::PlanReference));
    }

    #[test]
    fn empty_text_yields_empty_list() {
        let gaz = gazetteer_with("");
        let extractor = LocationExtractor::new(&gaz, None, 0.85, HashSet::new());
        assert!(extractor.extract("", "p1", "u").is_empty());
    }

    #[test]
    fn every_location_carries_paper_id_and_pdf_url() {
        let gaz = gazetteer_with(r#"{"canonical": "Marienplatz", "latitude": 48.1, "longitude": 11.5}"#);
        let extractor = LocationExtractor::new(&gaz, None, 0.85, HashSet::new());
        for loc in extractor.extract("Am Marienplatz wurde getagt", "paper-7", "https://x/7.pdf") {
            assert_eq!(loc.paper_id, "paper-7");
            assert_eq!(loc.pdf_url, "https://x/7.pdf");
        }
    }
}
