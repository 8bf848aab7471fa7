//! Append-only JSONL output.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::models::Record;

/// Writer for one dataset's output file.
///
/// The file is opened once per dataset and owned exclusively by its
/// harvester for the run's duration. Each record is flushed as its own
/// line, so everything written before a crash survives intact.
pub struct DatasetWriter {
    writer: BufWriter<File>,
}

impl DatasetWriter {
    /// Open the output file. A fresh dataset truncates; a resumed dataset
    /// appends after its persisted cursor.
    pub fn open(path: &Path, resume: bool) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = if resume {
            OpenOptions::new().create(true).append(true).open(path)?
        } else {
            File::create(path)?
        };
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Append one record as a JSON line and flush it to disk.
    pub fn write_record(&mut self, record: &Record) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}
