//! # Backlog Module
//!
//! Local append-only copy of every admissible sentence, kept so nothing is
//! lost when the collection service is unreachable.
//!
//! This module handles:
//! - Creating one backlog file per run, named after the start time
//! - Writing raw sentences or JSON Lines records
//! - A no-op sink for hosts without backlog storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::BacklogConfig;
use crate::error::{CourierError, Result};

/// Destination for admissible sentences
pub trait RecordSink: Send {
    /// Append one sentence, the sink adds its own terminator
    fn append(&mut self, line: &str) -> io::Result<()>;
}

/// Record layout inside a backlog file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacklogFormat {
    /// Sentence followed by `\n`
    Raw,
    /// One JSON object per line with a receive timestamp
    #[serde(rename = "jsonl")]
    JsonLines,
}

#[derive(Serialize)]
struct BacklogRecord<'a> {
    timestamp: String,
    line: &'a str,
}

/// Append-only backlog file
#[derive(Debug)]
pub struct BacklogFile {
    file: File,
    path: PathBuf,
    format: BacklogFormat,
}

impl BacklogFile {
    /// Create `<dir>/<prefix>-<unix seconds>` for this run
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be created
    pub fn create(config: &BacklogConfig) -> Result<Self> {
        Self::create_at(&config.dir, &config.prefix, config.format, Utc::now())
    }

    /// Create a backlog file stamped with `now`
    pub fn create_at<P: AsRef<Path>>(
        dir: P,
        prefix: &str,
        format: BacklogFormat,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let path = dir
            .as_ref()
            .join(format!("{}-{}", prefix, now.timestamp()));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                CourierError::Io(io::Error::new(
                    e.kind(),
                    format!("{}: {}", path.display(), e),
                ))
            })?;

        info!("Opened local backlog {}", path.display());
        Ok(Self { file, path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for BacklogFile {
    fn append(&mut self, line: &str) -> io::Result<()> {
        match self.format {
            BacklogFormat::Raw => {
                self.file.write_all(line.as_bytes())?;
                self.file.write_all(b"\n")
            }
            BacklogFormat::JsonLines => {
                let record = BacklogRecord {
                    timestamp: Utc::now().to_rfc3339(),
                    line,
                };
                let mut encoded = serde_json::to_vec(&record)?;
                encoded.push(b'\n');
                self.file.write_all(&encoded)
            }
        }
    }
}

/// Sink that drops every sentence
#[derive(Debug, Default)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn append(&mut self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Open the sink selected by `config`
pub fn open(config: &BacklogConfig) -> Result<Box<dyn RecordSink>> {
    if !config.enabled {
        info!("Local backlog disabled");
        return Ok(Box::new(NullSink));
    }

    Ok(Box::new(BacklogFile::create(config)?))
}
