//! # Sample Log Module
//!
//! Append-only, in-memory record of every accepted sample for the lifetime of
//! a session, independent of the display windows' eviction.
//!
//! ## Export Format
//! Plain CSV, one row per sample in ingestion order:
//! ```text
//! index,primary,derived
//! 0,0.61,0.02
//! 1,0,0.01
//! ```
//! Export never mutates the log, so exporting twice without new samples
//! yields identical bytes.

use crate::channel_deriver::Sample;
use crate::error::ExportError;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const HEADER: [&str; 3] = ["index", "primary", "derived"];

#[derive(Serialize)]
struct ExportRow {
    index: usize,
    primary: f64,
    derived: f64,
}

#[derive(Debug, Default, Clone)]
pub struct SampleLog {
    samples: Vec<Sample>,
}

impl SampleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Writes the whole log as CSV to `dest`.
    pub fn export<W: Write>(&self, dest: W) -> Result<(), ExportError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(dest);

        writer.write_record(HEADER)?;
        for (index, sample) in self.samples.iter().enumerate() {
            writer.serialize(ExportRow {
                index,
                primary: sample.primary,
                derived: sample.derived,
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes the log to `path`, replacing any existing file.
    pub fn export_to_file(&self, path: &Path) -> Result<(), ExportError> {
        let file = File::create(path)?;
        self.export(BufWriter::new(file))
    }

    /// Writes a timestamped `recording_YYYYMMDD_HHMMSS.csv` under `output_dir`.
    ///
    /// The directory is created if needed. Returns the path written.
    pub fn export_to_dir(&self, output_dir: &Path) -> Result<PathBuf, ExportError> {
        if !output_dir.exists() {
            fs::create_dir_all(output_dir)?;
        }

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let file_path = output_dir.join(format!("recording_{}.csv", timestamp));

        log::info!(
            "Exporting {} samples to: {}",
            self.samples.len(),
            file_path.display()
        );
        self.export_to_file(&file_path)?;
        Ok(file_path)
    }
}
