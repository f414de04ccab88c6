//! Graph writer: append-only N-Triples log during the run, finalized to a
//! prefixed Turtle document.
//!
//! No RDF crate appears anywhere in this codebase's dependency stack, so
//! both serializations are hand-rolled string formatting in the same
//! spirit as this codebase's other line-oriented writers (e.g. the
//! WARC/CSV-adjacent export paths) rather than pulled in from an
//! unfamiliar crate. N-Triples has no prefix mechanism, so the `.nt` log
//! below uses only absolute IRIs; prefixed CURIEs are introduced only when
//! compacting to Turtle at `finalize`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{Location, PaperRecord};

const NS_RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const NS_DC: &str = "http://purl.org/dc/elements/1.1/";
const NS_RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
const NS_GEO: &str = "http://www.opengis.net/ont/geosparql#";
const NS_OPARL: &str = "https://schema.oparl.org/1.1/";

const NS_MAPPINGS: &[(&str, &str)] = &[
    ("rdf", NS_RDF),
    ("dc", NS_DC),
    ("rdfs", NS_RDFS),
    ("geo", NS_GEO),
    ("oparl", NS_OPARL),
];

const PREFIXES: &str = r#"@prefix oparl: <https://schema.oparl.org/1.1/> .
@prefix dc: <http://purl.org/dc/elements/1.1/> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix geo: <http://www.opengis.net/ont/geosparql#> .
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
"#;

fn iri(ns: &str, local: &str) -> String {
    format!("{ns}{local}")
}

pub struct GraphWriter {
    triples_path: PathBuf,
    turtle_path: PathBuf,
    base_uri: String,
}

impl GraphWriter {
    pub fn new(base_path: &Path, base_uri: &str) -> GraphWriter {
        GraphWriter {
            triples_path: base_path.join("metadata.nt"),
            turtle_path: base_path.join("metadata.ttl"),
            base_uri: base_uri.trim_end_matches('/').to_string(),
        }
    }

    /// Appends this batch's triples to the N-Triples stream. A Paper's
    /// triples are written contiguously.
    pub fn append_batch(&self, records: &[PaperRecord]) -> Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.triples_path)?;
        let mut out = BufWriter::new(file);
        for record in records {
            self.write_paper_triples(&mut out, record)?;
        }
        out.flush()?;
        Ok(())
    }

    fn write_paper_triples(&self, out: &mut impl Write, record: &PaperRecord) -> Result<()> {
        let paper_uri = self.paper_uri(&record.paper.id);

        writeln!(out, "<{paper_uri}> <{}> <{}> .", iri(NS_RDF, "type"), iri(NS_OPARL, "Paper"))?;
        writeln!(out, "<{paper_uri}> <{}> {} .", iri(NS_DC, "title"), literal(&record.paper.title))?;
        if let Some(date) = record.paper.date {
            writeln!(out, "<{paper_uri}> <{}> {} .", iri(NS_DC, "date"), literal(&date.to_rfc3339()))?;
        }
        if let Some(main_file) = record.paper.main_file() {
            writeln!(out, "<{paper_uri}> <{}> <{}> .", iri(NS_OPARL, "mainFile"), main_file.access_url)?;
        }

        for location in &record.locations {
            let location_uri = self.location_uri(&record.paper.id, location);
            writeln!(out, "<{paper_uri}> <{}> <{location_uri}> .", iri(NS_OPARL, "relatesToLocation"))?;
            self.write_location_triples(out, &location_uri, location)?;
        }
        Ok(())
    }

    fn write_location_triples(&self, out: &mut impl Write, location_uri: &str, location: &Location) -> Result<()> {
        writeln!(out, "<{location_uri}> <{}> {} .", iri(NS_RDFS, "label"), literal(&location.canonical_name))?;
        writeln!(
            out,
            "<{location_uri}> <{}> {} .",
            iri(NS_OPARL, "category"),
            literal(category_str(location.category))
        )?;
        writeln!(out, "<{location_uri}> <{}> <{}> .", iri(NS_RDFS, "seeAlso"), location.pdf_url)?;
        if let (Some(lat), Some(lon)) = (location.latitude, location.longitude) {
            writeln!(
                out,
                "<{location_uri}> <{}> \"POINT({lon} {lat})\"^^<{}> .",
                iri(NS_GEO, "hasGeometry"),
                iri(NS_GEO, "wktLiteral")
            )?;
            writeln!(out, "<{location_uri}> <{}> {} .", iri(NS_GEO, "lat"), literal_double(lat))?;
            writeln!(out, "<{location_uri}> <{}> {} .", iri(NS_GEO, "long"), literal_double(lon))?;
        }
        Ok(())
    }

    pub fn paper_uri(&self, paper_id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(paper_id.as_bytes()).collect();
        format!("{}/paper/{}", self.base_uri, encoded)
    }

    pub fn location_uri(&self, paper_id: &str, location: &Location) -> String {
        let mut hasher = Sha256::new();
        hasher.update(paper_id.as_bytes());
        hasher.update(category_str(location.category).as_bytes());
        hasher.update(location.canonical_name.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}/location/{}", self.base_uri, &digest[..16])
    }

    /// Converts the accumulated N-Triples log into a compact, prefixed
    /// Turtle document. Reparsing N-Triples lines back into subject blocks
    /// instead of re-deriving the graph from `records`, so finalization
    /// reflects exactly what was appended across the whole run. Known
    /// vocabulary IRIs are compacted to `prefix:local`; data IRIs (Paper
    /// and Location nodes, the source PDF URL) are left as absolute IRIs.
    pub fn finalize(&self) -> Result<()> {
        if !self.triples_path.exists() {
            let mut out = File::create(&self.turtle_path)?;
            out.write_all(PREFIXES.as_bytes())?;
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.triples_path)?;
        let mut out = BufWriter::new(File::create(&self.turtle_path)?);
        out.write_all(PREFIXES.as_bytes())?;
        out.write_all(b"\n")?;

        let mut current_subject: Option<String> = None;
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let compacted = compact_known_iris(line);
            let Some((subject, rest)) = split_subject(&compacted) else { continue };
            if current_subject.as_deref() != Some(subject) {
                if current_subject.is_some() {
                    writeln!(out, " .")?;
                }
                write!(out, "<{subject}> {rest}")?;
                current_subject = Some(subject.to_string());
            } else {
                let predicate_object = rest.trim_end_matches(" .");
                write!(out, " ;\n    {predicate_object}")?;
            }
        }
        if current_subject.is_some() {
            writeln!(out, " .")?;
        }
        Ok(())
    }
}

/// Replaces `<namespace#local>` / `<namespace/local>` occurrences for every
/// namespace in [`NS_MAPPINGS`] with `prefix:local`. Data IRIs built from
/// `base_uri` never match one of these namespaces, so they pass through
/// untouched.
fn compact_known_iris(line: &str) -> String {
    let mut result = line.to_string();
    for (prefix, ns) in NS_MAPPINGS {
        let pattern = format!("<{}([A-Za-z0-9_]+)>", regex::escape(ns));
        let re = Regex::new(&pattern).expect("static namespace pattern is valid regex");
        let template = format!("{prefix}:$1");
        result = re.replace_all(&result, template.as_str()).into_owned();
    }
    result
}

fn split_subject(line: &str) -> Option<(&str, &str)> {
    let line = line.trim_end_matches(" .").trim_end_matches('.').trim();
    let subject_end = line.find('>')?;
    let subject = &line[1..subject_end];
    let rest = line[subject_end + 1..].trim();
    Some((subject, rest))
}

fn category_str(category: crate::models::LocationCategory) -> &'static str {
    use crate::models::LocationCategory::*;
    match category {
        Street => "street",
        District => "district",
        PlanReference => "plan_reference",
        ParcelNumber => "parcel_number",
        OtherPlace => "other_place",
    }
}

fn literal(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn literal_double(v: f64) -> String {
    format!("\"{v}\"^^<http://www.w3.org/2001/XMLSchema#double>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileDescriptor, Location, LocationCategory, Paper, Provenance};

    fn sample_record() -> PaperRecord {
        PaperRecord {
            paper: Paper {
                id: "https://oparl.example/paper/1".into(),
                title: "Sanierung der Ludwigstraße".into(),
                reference: None,
                date: None,
                document_type: None,
                files: vec![FileDescriptor {
                    access_url: "https://oparl.example/file/1.pdf".into(),
                    mime_type: "application/pdf".into(),
                    size_bytes: None,
                    filename: None,
                }],
                main_file_index: Some(0),
            },
            full_text: "text".into(),
            locations: vec![Location {
                paper_id: "https://oparl.example/paper/1".into(),
                pdf_url: "https://oparl.example/file/1.pdf".into(),
                category: LocationCategory::Street,
                canonical_name: "Ludwigstraße".into(),
                latitude: Some(48.3456),
                longitude: Some(10.8901),
                display_name: None,
                provenance: Provenance::Gazetteer,
            }],
        }
    }

    #[test]
    fn append_and_finalize_produces_turtle() {
        let dir = tempfile::tempdir().unwrap();
        let writer = GraphWriter::new(dir.path(), "https://example.org/council");
        writer.append_batch(&[sample_record()]).unwrap();
        writer.finalize().unwrap();

        let ttl = std::fs::read_to_string(dir.path().join("metadata.ttl")).unwrap();
        assert!(ttl.contains("@prefix oparl:"));
        assert!(ttl.contains("rdf:type oparl:Paper"));

        let nt = std::fs::read_to_string(dir.path().join("metadata.nt")).unwrap();
        assert!(nt.contains("<https://schema.oparl.org/1.1/relatesToLocation>"));
        assert!(nt.contains("<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>"));
        assert!(!nt.contains("oparl:"));
        assert!(!nt.contains("rdf:type"));
    }

    #[test]
    fn location_uri_is_stable_for_same_inputs() {
        let writer = GraphWriter::new(Path::new("/tmp"), "https://example.org/council");
        let loc = sample_record().locations.remove(0);
        let uri_a = writer.location_uri("p1", &loc);
        let uri_b = writer.location_uri("p1", &loc);
        assert_eq!(uri_a, uri_b);
    }
}
