//! GeoJSON location layer writer.
//!
//! Uses the `geojson` crate's `Feature`/`FeatureCollection`/`Geometry`
//! types directly, the way this codebase reaches for a purpose-built crate
//! at its other serialization boundaries rather than hand-building JSON.

use std::path::{Path, PathBuf};

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value as GeoValue};

use crate::error::{PipelineError, Result};
use crate::models::{Location, LocationCategory, PaperRecord};

pub struct GeoJsonWriter {
    path: PathBuf,
}

impl GeoJsonWriter {
    pub fn new(base_path: &Path, city: &str) -> GeoJsonWriter {
        GeoJsonWriter {
            path: base_path.join(format!("{city}_map.geojson")),
        }
    }

    /// Rewrites the full FeatureCollection from `all_records` accumulated
    /// so far. GeoJSON has no append-friendly format, so the whole layer is
    /// regenerated at finalization; callers accumulate records across
    /// batches and call this once at the end of a run.
    pub fn write(&self, all_records: &[PaperRecord]) -> Result<()> {
        let features: Vec<Feature> = all_records
            .iter()
            .flat_map(|record| record.locations.iter().map(move |loc| (record, loc)))
            .filter(|(_, loc)| loc.has_coordinates())
            .map(|(record, loc)| to_feature(record, loc))
            .collect();

        let collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        };

        let json = serde_json::to_string_pretty(&collection).map_err(PipelineError::from)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

fn to_feature(record: &PaperRecord, location: &Location) -> Feature {
    let lon = location.longitude.unwrap();
    let lat = location.latitude.unwrap();
    let geometry = Geometry::new(GeoValue::Point(vec![lon, lat]));

    let mut properties = JsonObject::new();
    properties.insert("canonical_name".into(), JsonValue::from(location.canonical_name.clone()));
    properties.insert("category".into(), JsonValue::from(category_str(location.category)));
    properties.insert("paper_id".into(), JsonValue::from(record.paper.id.clone()));
    properties.insert("paper_name".into(), JsonValue::from(record.paper.title.clone()));
    properties.insert(
        "paper_date".into(),
        match record.paper.date {
            Some(d) => JsonValue::from(d.to_rfc3339()),
            None => JsonValue::Null,
        },
    );
    properties.insert("pdf_url".into(), JsonValue::from(location.pdf_url.clone()));
    properties.insert(
        "display_name".into(),
        match &location.display_name {
            Some(name) => JsonValue::from(name.clone()),
            None => JsonValue::Null,
        },
    );
    properties.insert("provenance".into(), JsonValue::from(format!("{:?}", location.provenance)));

    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn category_str(category: LocationCategory) -> &'static str {
    match category {
        LocationCategory::Street => "street",
        LocationCategory::District => "district",
        LocationCategory::PlanReference => "plan_reference",
        LocationCategory::ParcelNumber => "parcel_number",
        LocationCategory::OtherPlace => "other_place",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileDescriptor, Paper, Provenance};

    fn sample_record(with_coords: bool) -> PaperRecord {
        PaperRecord {
            paper: Paper {
                id: "p1".into(),
                title: "Bauantrag".into(),
                reference: None,
                date: None,
                document_type: None,
                files: vec![FileDescriptor {
                    access_url: "https://x/1.pdf".into(),
                    mime_type: "application/pdf".into(),
                    size_bytes: None,
                    filename: None,
                }],
                main_file_index: Some(0),
            },
            full_text: "text".into(),
            locations: vec![Location {
                paper_id: "p1".into(),
                pdf_url: "https://x/1.pdf".into(),
                category: LocationCategory::Street,
                canonical_name: "Rathausplatz".into(),
                latitude: if with_coords { Some(48.0) } else { None },
                longitude: if with_coords { Some(11.0) } else { None },
                display_name: None,
                provenance: if with_coords { Provenance::Gazetteer } else { Provenance::Unresolved },
            }],
        }
    }

    #[test]
    fn writes_only_resolved_locations() {
        let dir = tempfile::tempdir().unwrap();
        let writer = GeoJsonWriter::new(dir.path(), "springfield");
        writer.write(&[sample_record(true), sample_record(false)]).unwrap();

        let content = std::fs::read_to_string(dir.path().join("springfield_map.geojson")).unwrap();
        let parsed: FeatureCollection = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.features.len(), 1);
    }

    #[test]
    fn feature_carries_source_pdf_back_pointer() {
        let record = sample_record(true);
        let feature = to_feature(&record, &record.locations[0]);
        let props = feature.properties.unwrap();
        assert_eq!(props.get("pdf_url").unwrap(), "https://x/1.pdf");
    }
}
