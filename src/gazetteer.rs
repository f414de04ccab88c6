//! Static, read-only gazetteer of known toponyms.
//!
//! Grounded on this codebase's `geolookup` module: a `HashMap` built once
//! and shared read-only across workers. That module compiles its data in
//! via `include_str!`; the gazetteer here is loaded at startup from
//! `spatial.gazetteer_path` instead, since the path is only known once the
//! configuration record exists, so it is built once in `Orchestrator::run`
//! and handed around as an `Arc` rather than a `LazyLock`.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::models::{GazetteerEntry, LocationCategory};

/// On-disk representation: a JSON array of entries.
#[derive(Debug, Deserialize)]
struct GazetteerFile {
    entries: Vec<GazetteerFileEntry>,
}

#[derive(Debug, Deserialize)]
struct GazetteerFileEntry {
    canonical: String,
    #[serde(default)]
    aliases: Vec<String>,
    latitude: f64,
    longitude: f64,
    #[serde(default = "default_category")]
    category: LocationCategory,
}

fn default_category() -> LocationCategory {
    LocationCategory::Street
}

pub struct Gazetteer {
    /// Keyed by every normalized spelling (canonical and aliases) that maps
    /// back to the owning entry's canonical form.
    by_normalized: HashMap<String, GazetteerEntry>,
    entries: Vec<GazetteerEntry>,
}

impl Gazetteer {
    pub fn load(path: &Path) -> Result<Gazetteer> {
        let raw = std::fs::read_to_string(path)?;
        let file: GazetteerFile = serde_json::from_str(&raw)?;
        let mut by_normalized = HashMap::new();
        let mut entries = Vec::with_capacity(file.entries.len());

        for e in file.entries {
            let normalized = normalize(&e.canonical);
            let entry = GazetteerEntry {
                canonical: e.canonical.clone(),
                normalized: normalized.clone(),
                aliases: e.aliases.clone(),
                latitude: e.latitude,
                longitude: e.longitude,
                category: e.category,
            };
            by_normalized.insert(normalized, entry.clone());
            for alias in &e.aliases {
                by_normalized.insert(normalize(alias), entry.clone());
            }
            entries.push(entry);
        }

        Ok(Gazetteer { by_normalized, entries })
    }

    pub fn entries(&self) -> &[GazetteerEntry] {
        &self.entries
    }

    pub fn lookup_exact(&self, name: &str) -> Option<&GazetteerEntry> {
        self.by_normalized.get(&normalize(name))
    }

    /// Find the closest entry to `candidate` by normalized edit distance,
    /// accepting a match only within `threshold` similarity (0.0-1.0).
    pub fn fuzzy_lookup(&self, candidate: &str, threshold: f64) -> Option<&GazetteerEntry> {
        let normalized = normalize(candidate);
        if let Some(entry) = self.by_normalized.get(&normalized) {
            return Some(entry);
        }
        self.by_normalized
            .iter()
            .map(|(key, entry)| (strsim::normalized_levenshtein(&normalized, key), entry))
            .filter(|(score, _)| *score >= threshold)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, entry)| entry)
    }
}

pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_gazetteer(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_and_matches_exact() {
        let f = write_gazetteer(
            r#"{"entries": [{"canonical": "Ludwigstraße", "aliases": ["Ludwigstrasse"], "latitude": 48.3456, "longitude": 10.8901}]}"#,
        );
        let g = Gazetteer::load(f.path()).unwrap();
        let entry = g.lookup_exact("ludwigstraße").unwrap();
        assert_eq!(entry.canonical, "Ludwigstraße");
        assert_eq!(entry.latitude, 48.3456);
        let alias = g.lookup_exact("Ludwigstrasse").unwrap();
        assert_eq!(alias.canonical, "Ludwigstraße");
    }

    #[test]
    fn fuzzy_lookup_tolerates_small_edits() {
        let f = write_gazetteer(
            r#"{"entries": [{"canonical": "Marienplatz", "aliases": [], "latitude": 48.1, "longitude": 11.5}]}"#,
        );
        let g = Gazetteer::load(f.path()).unwrap();
        assert!(g.fuzzy_lookup("Marienplaz", 0.85).is_some());
        assert!(g.fuzzy_lookup("Something Else Entirely", 0.85).is_none());
    }
}
