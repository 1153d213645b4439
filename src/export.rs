//! Scan log export
//!
//! One CSV file per finished run, named by the export time. Columns
//! follow [`ScanRecord`]: `timestamp, condition, reader, code,
//! is_activation`, with a header row. Files can be read back with
//! [`read_records`].

use crate::experiment::ScanRecord;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("export CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Destination for a finished run's records
pub trait ScanExporter: Send + Sync {
    /// Persist `records`; returns where they went
    fn export(&mut self, records: &[ScanRecord]) -> Result<PathBuf, ExportError>;
}

/// Writes `scans_<YYYY-mm-dd_HH-MM-SS>.csv` files into a directory
#[derive(Debug, Clone)]
pub struct CsvExporter {
    directory: PathBuf,
}

impl CsvExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Create the first free file name for the current time. Existing
    /// files are never opened.
    fn create_next(&self) -> Result<(PathBuf, File), ExportError> {
        let stem = format!("scans_{}", Local::now().format("%Y-%m-%d_%H-%M-%S"));
        let mut path = self.directory.join(format!("{stem}.csv"));
        let mut n = 1;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    path = self.directory.join(format!("{stem}_{n}.csv"));
                    n += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl ScanExporter for CsvExporter {
    fn export(&mut self, records: &[ScanRecord]) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.directory)?;
        let (path, file) = self.create_next()?;
        write_records(file, records)?;

        debug!("Wrote {} record(s) to {:?}", records.len(), path);
        Ok(path)
    }
}

/// Write `records` as CSV with a header row
pub fn write_records<W: io::Write>(writer: W, records: &[ScanRecord]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(writer);
    if records.is_empty() {
        writer.write_record(["timestamp", "condition", "reader", "code", "is_activation"])?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read an exported file back into records
pub fn read_records(path: &Path) -> Result<Vec<ScanRecord>, ExportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader.deserialize().collect::<Result<Vec<ScanRecord>, _>>()?;
    Ok(records)
}
