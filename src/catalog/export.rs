//! Catalog exports
//!
//! Writes a collected batch in both shapes: a nested JSON array (arrival
//! order) and a flat CSV whose header is the sorted union of every column
//! seen, so repeated exports of the same batch are byte-identical.

use crate::catalog::mapper::{flatten, FlatRow, FlatValue};
use crate::catalog::record::{Document, MetadataRecord, RecordError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid catalog entry: {0}")]
    Record(#[from] RecordError),
}

/// Sorted union of all column names across `rows`
pub fn flat_header(rows: &[FlatRow]) -> Vec<String> {
    rows.iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Write rows as CSV. Absent columns render as empty cells.
pub fn write_flat<W: Write>(writer: W, rows: &[FlatRow]) -> Result<(), ExportError> {
    let header = flat_header(rows);
    let mut csv_writer = csv::Writer::from_writer(writer);

    csv_writer.write_record(&header)?;
    for row in rows {
        csv_writer.write_record(
            header
                .iter()
                .map(|column| row.get(column).map(FlatValue::to_string).unwrap_or_default()),
        )?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Pretty-printed JSON array
pub fn write_json_array<W: Write, T: Serialize>(writer: W, items: &[T]) -> Result<(), ExportError> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, items)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read a flat export back. Every cell is text; empty cells are omitted.
pub fn read_flat_rows<R: Read>(reader: R) -> Result<Vec<FlatRow>, ExportError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let header = csv_reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let row: FlatRow = header
            .iter()
            .zip(record.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(column, cell)| (column.to_string(), FlatValue::from(cell)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

pub fn read_flat_file(path: &Path) -> Result<Vec<FlatRow>, ExportError> {
    read_flat_rows(File::open(path)?)
}

/// Paths written by one export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFiles {
    pub json: PathBuf,
    pub csv: PathBuf,
}

/// Load a nested catalog written by [`CatalogWriter::write_catalog`]
pub fn read_catalog(path: &Path) -> Result<Vec<MetadataRecord>, ExportError> {
    let file = File::open(path)?;
    let documents: Vec<Document> = serde_json::from_reader(BufReader::new(file))?;
    documents
        .into_iter()
        .map(|document| MetadataRecord::from_document(document).map_err(ExportError::from))
        .collect()
}

/// Persists a finalized batch next to `output_path` (no extension)
#[derive(Debug, Clone)]
pub struct CatalogWriter {
    output_path: PathBuf,
}

impl CatalogWriter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    fn with_suffix(&self, extension: &str) -> PathBuf {
        PathBuf::from(format!("{}.{}", self.output_path.display(), extension))
    }

    fn ensure_parent(&self) -> Result<(), ExportError> {
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Write `<output>.json` and `<output>.csv`. An empty batch writes nothing.
    pub fn write_catalog(&self, records: &[MetadataRecord]) -> Result<Option<CatalogFiles>, ExportError> {
        if records.is_empty() {
            warn!("No cohort data collected, skipping catalog export");
            return Ok(None);
        }

        info!("Saving catalog with {} cohorts", records.len());
        self.ensure_parent()?;

        let files = CatalogFiles {
            json: self.with_suffix("json"),
            csv: self.with_suffix("csv"),
        };

        write_json_array(File::create(&files.json)?, records)?;
        info!("JSON catalog saved to {}", files.json.display());

        let rows: Vec<FlatRow> = records.iter().map(flatten).collect();
        write_flat(File::create(&files.csv)?, &rows)?;
        info!("CSV catalog saved to {}", files.csv.display());

        Ok(Some(files))
    }

    /// Write any other per-site payload as `<output>.json`
    pub fn write_payloads<T: Serialize>(&self, items: &[T]) -> Result<Option<PathBuf>, ExportError> {
        if items.is_empty() {
            warn!("No site results collected, skipping export");
            return Ok(None);
        }
        self.ensure_parent()?;
        let path = self.with_suffix("json");
        write_json_array(File::create(&path)?, items)?;
        info!("Saved {} site results to {}", items.len(), path.display());
        Ok(Some(path))
    }
}
