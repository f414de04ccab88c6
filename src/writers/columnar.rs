//! Partitioned columnar (Parquet) writer.
//!
//! Path construction follows this codebase's `storage::content_storage_path`
//! idiom (deterministic join of a base directory with derived path
//! segments, `create_dir_all` before write) adapted from a hash-prefix
//! layout to the contract's (city, year, month) partitioning.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;

use crate::config::{CompressionKind, ParquetConfig};
use crate::error::{PipelineError, Result};
use crate::models::PaperRecord;

const SCHEMA: &str = "
message paper_record {
    REQUIRED BYTE_ARRAY paper_id (UTF8);
    REQUIRED BYTE_ARRAY title (UTF8);
    OPTIONAL BYTE_ARRAY reference (UTF8);
    OPTIONAL BYTE_ARRAY date (UTF8);
    OPTIONAL BYTE_ARRAY document_type (UTF8);
    REQUIRED BYTE_ARRAY pdf_url (UTF8);
    REQUIRED BYTE_ARRAY full_text (UTF8);
    REQUIRED BYTE_ARRAY locations_json (UTF8);
}
";

pub struct ColumnarWriter {
    base_path: PathBuf,
    config: ParquetConfig,
    next_seq: std::sync::atomic::AtomicU64,
}

impl ColumnarWriter {
    pub fn new(base_path: &Path, config: ParquetConfig) -> ColumnarWriter {
        ColumnarWriter {
            base_path: base_path.join("council_data.parquet"),
            config,
            next_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Flushes one new file per partition represented in `records`. Never
    /// mutates an existing file — every batch becomes new files.
    pub fn append_batch(&self, city: &str, records: &[PaperRecord]) -> Result<()> {
        let mut by_partition: std::collections::HashMap<(i32, u32), Vec<&PaperRecord>> = std::collections::HashMap::new();
        for record in records {
            let (year, month) = partition_key(record);
            by_partition.entry((year, month)).or_default().push(record);
        }

        for ((year, month), partition_records) in by_partition {
            self.write_partition_file(city, year, month, &partition_records)?;
        }
        Ok(())
    }

    fn write_partition_file(&self, city: &str, year: i32, month: u32, records: &[&PaperRecord]) -> Result<()> {
        let dir = self
            .base_path
            .join(format!("city={city}"))
            .join(format!("year={year}"))
            .join(format!("month={month:02}"));
        std::fs::create_dir_all(&dir)?;

        let seq = self.next_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let path = dir.join(format!("part-{seq:06}.parquet"));

        let schema = Arc::new(parse_message_type(SCHEMA).map_err(|e| PipelineError::Write(e.to_string()))?);
        let props = Arc::new(
            WriterProperties::builder()
                .set_compression(compression_codec(self.config.compression))
                .build(),
        );
        let file = File::create(&path)?;
        let mut writer = SerializedFileWriter::new(file, schema, props)
            .map_err(|e| PipelineError::Write(e.to_string()))?;

        {
            let mut row_group = writer.next_row_group().map_err(|e| PipelineError::Write(e.to_string()))?;
            write_string_column(&mut row_group, records.iter().map(|r| r.paper.id.as_str()))?;
            write_string_column(&mut row_group, records.iter().map(|r| r.paper.title.as_str()))?;
            write_optional_string_column(&mut row_group, records.iter().map(|r| r.paper.reference.as_deref()))?;
            write_optional_string_column(
                &mut row_group,
                records.iter().map(|r| r.paper.date.map(|d| d.to_rfc3339())).collect::<Vec<_>>().iter().map(|o| o.as_deref()),
            )?;
            write_optional_string_column(&mut row_group, records.iter().map(|r| r.paper.document_type.as_deref()))?;
            write_string_column(&mut row_group, records.iter().map(|r| r.paper.main_file().map(|f| f.access_url.as_str()).unwrap_or("")))?;
            write_string_column(&mut row_group, records.iter().map(|r| r.full_text.as_str()))?;
            let locations_json: Vec<String> = records
                .iter()
                .map(|r| serde_json::to_string(&r.locations).unwrap_or_else(|_| "[]".to_string()))
                .collect();
            write_string_column(&mut row_group, locations_json.iter().map(|s| s.as_str()))?;
            row_group.close().map_err(|e| PipelineError::Write(e.to_string()))?;
        }

        writer.close().map_err(|e| PipelineError::Write(e.to_string()))?;
        Ok(())
    }
}

fn partition_key(record: &PaperRecord) -> (i32, u32) {
    match record.paper.date {
        Some(d) => (d.format("%Y").to_string().parse().unwrap_or(0), d.format("%m").to_string().parse().unwrap_or(1)),
        None => {
            let now = chrono::Utc::now();
            (now.format("%Y").to_string().parse().unwrap_or(0), now.format("%m").to_string().parse().unwrap_or(1))
        }
    }
}

fn compression_codec(kind: CompressionKind) -> Compression {
    match kind {
        CompressionKind::Snappy => Compression::SNAPPY,
        CompressionKind::Zstd => Compression::ZSTD(Default::default()),
        CompressionKind::Gzip => Compression::GZIP(Default::default()),
    }
}

fn write_string_column<'a>(
    row_group: &mut parquet::file::writer::SerializedRowGroupWriter<'_, File>,
    values: impl Iterator<Item = &'a str>,
) -> Result<()> {
    use parquet::data_type::ByteArray;
    let data: Vec<ByteArray> = values.map(ByteArray::from).collect();
    let mut col = row_group
        .next_column()
        .map_err(|e| PipelineError::Write(e.to_string()))?
        .ok_or_else(|| PipelineError::Write("missing column writer".into()))?;
    col.typed::<parquet::data_type::ByteArrayType>()
        .write_batch(&data, None, None)
        .map_err(|e| PipelineError::Write(e.to_string()))?;
    col.close().map_err(|e| PipelineError::Write(e.to_string()))?;
    Ok(())
}

fn write_optional_string_column<'a>(
    row_group: &mut parquet::file::writer::SerializedRowGroupWriter<'_, File>,
    values: impl Iterator<Item = Option<&'a str>>,
) -> Result<()> {
    use parquet::data_type::ByteArray;
    let mut data = Vec::new();
    let mut def_levels = Vec::new();
    for v in values {
        match v {
            Some(s) => {
                data.push(ByteArray::from(s));
                def_levels.push(1);
            }
            None => def_levels.push(0),
        }
    }
    let mut col = row_group
        .next_column()
        .map_err(|e| PipelineError::Write(e.to_string()))?
        .ok_or_else(|| PipelineError::Write("missing column writer".into()))?;
    col.typed::<parquet::data_type::ByteArrayType>()
        .write_batch(&data, Some(&def_levels), None)
        .map_err(|e| PipelineError::Write(e.to_string()))?;
    col.close().map_err(|e| PipelineError::Write(e.to_string()))?;
    Ok(())
}
