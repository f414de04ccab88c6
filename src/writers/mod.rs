//! Component F: the three output sinks, wired behind a single facade the
//! orchestrator drives per batch.

pub mod columnar;
pub mod geojson;
pub mod graph;

use std::path::Path;
use std::sync::Mutex;

use crate::config::ParquetConfig;
use crate::error::Result;
use crate::models::PaperRecord;

use columnar::ColumnarWriter;
use geojson::GeoJsonWriter;
use graph::GraphWriter;

/// All records seen across the whole run, retained only for the GeoJSON
/// layer, which has no append-friendly format and must be rewritten whole
/// at finalization.
pub struct Writers {
    columnar: ColumnarWriter,
    graph: GraphWriter,
    geojson: GeoJsonWriter,
    seen: Mutex<Vec<PaperRecord>>,
}

impl Writers {
    pub fn new(output_dir: &Path, parquet_config: ParquetConfig, graph_base_uri: &str, city: &str) -> Writers {
        Writers {
            columnar: ColumnarWriter::new(output_dir, parquet_config),
            graph: GraphWriter::new(output_dir, graph_base_uri),
            geojson: GeoJsonWriter::new(output_dir, city),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Called once per completed batch. The columnar and graph sinks are
    /// append-only and flush immediately; the GeoJSON layer accumulates
    /// until `finalize`.
    pub fn write_batch(&self, city: &str, records: &[PaperRecord]) -> Result<()> {
        self.columnar.append_batch(city, records)?;
        self.graph.append_batch(records)?;
        self.seen.lock().unwrap().extend(records.iter().cloned());
        Ok(())
    }

    /// Called once at the end of a run (or on resumption, to bring the
    /// derived outputs in sync with whatever completed before a crash).
    pub fn finalize(&self) -> Result<()> {
        self.graph.finalize()?;
        let seen = self.seen.lock().unwrap();
        self.geojson.write(&seen)?;
        Ok(())
    }
}
