//! Persistence sinks: durable, ordered, append-only output stores.
//!
//! The durability rule is what makes the pipeline resumable: the driver
//! dequeues a unit only *after* [`PersistenceSink::append`] returns, and
//! `append` may not return success until the record is durably on its target.
//! A crash between append and dequeue therefore re-submits at most the unit
//! whose record is already persisted - which resume detection then skips -
//! and never loses a completed unit.
//!
//! Three implementations ship with the crate:
//!
//! * [`JsonlSink`] - one JSON record per line, fsynced per append. The line
//!   count doubles as the resume cursor, so a killed run restarted against
//!   the same file picks up exactly where it stopped.
//! * [`TextFileSink`] - plain text with a separator between records, for
//!   callers that want the final document and nothing else. Records can
//!   contain the separator, so this sink cannot count what is already on
//!   disk and reports no resumable progress.
//! * [`MemorySink`] - collects records in memory for library callers and
//!   tests.

use crate::error::SinkError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Output of one successfully transformed unit. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Ordinal of the unit this record came from.
    pub ordinal: usize,
    /// The transformed text.
    pub text: String,
}

/// Durable, append-only store for transformed units.
///
/// One call = one append; the driver never appends the same unit twice, and
/// a sink performs no deduplication of its own. `append` must not return
/// `Ok` before the record would survive a crash.
#[async_trait]
pub trait PersistenceSink: Send {
    /// Durably append one record.
    async fn append(&mut self, record: &ResultRecord) -> Result<(), SinkError>;

    /// How many records the sink's target already holds.
    ///
    /// The driver skips that many units at the start of a run, which is the
    /// whole resume mechanism. Sinks that cannot tell (plain-text targets)
    /// return 0 and every run starts from the first unit.
    fn completed_units(&self) -> usize {
        0
    }
}

// ── JSONL ────────────────────────────────────────────────────────────────

/// Resumable sink: one JSON-encoded [`ResultRecord`] per line.
pub struct JsonlSink {
    path: PathBuf,
    file: File,
    completed: usize,
}

impl JsonlSink {
    /// Open (or create) `path` for appending, counting existing records.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let completed = match tokio::fs::read_to_string(&path).await {
            Ok(existing) => existing.lines().filter(|l| !l.trim().is_empty()).count(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => {
                return Err(SinkError::Write {
                    path,
                    source: e,
                })
            }
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SinkError::Write {
                path: path.clone(),
                source: e,
            })?;
        if completed > 0 {
            debug!("Resuming sink '{}': {} records present", path.display(), completed);
        }
        Ok(Self {
            path,
            file,
            completed,
        })
    }

    fn io_err(&self, source: std::io::Error) -> SinkError {
        SinkError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl PersistenceSink for JsonlSink {
    async fn append(&mut self, record: &ResultRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(record).map_err(|e| SinkError::Encode {
            ordinal: record.ordinal,
            source: e,
        })?;
        line.push('\n');

        if let Err(e) = self.file.write_all(line.as_bytes()).await {
            return Err(self.io_err(e));
        }
        if let Err(e) = self.file.flush().await {
            return Err(self.io_err(e));
        }
        // Durable before returning: a crash after Ok must not lose the record.
        if let Err(e) = self.file.sync_all().await {
            return Err(self.io_err(e));
        }

        self.completed += 1;
        Ok(())
    }

    fn completed_units(&self) -> usize {
        self.completed
    }
}

/// Read all records back from a JSONL sink target, in append order.
pub async fn read_jsonl_records(path: impl AsRef<Path>) -> Result<Vec<ResultRecord>, SinkError> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SinkError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| SinkError::Encode {
                ordinal: i,
                source: e,
            })
        })
        .collect()
}

// ── Plain text ───────────────────────────────────────────────────────────

/// Append-only plain-text sink, records joined by a separator.
///
/// Prior file content is never rewritten; each append adds the record text
/// plus the separator and fsyncs. Not resumable - use [`JsonlSink`] when the
/// run may be interrupted.
pub struct TextFileSink {
    path: PathBuf,
    file: File,
    separator: String,
    appended: usize,
}

impl TextFileSink {
    /// Open (or create) `path` with the default `"\n\n"` record separator.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Self::with_separator(path, "\n\n").await
    }

    pub async fn with_separator(
        path: impl AsRef<Path>,
        separator: impl Into<String>,
    ) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SinkError::Write {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self {
            path,
            file,
            separator: separator.into(),
            appended: 0,
        })
    }

    /// Records appended by this handle (not counting prior file content).
    pub fn appended(&self) -> usize {
        self.appended
    }

    fn io_err(&self, source: std::io::Error) -> SinkError {
        SinkError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl PersistenceSink for TextFileSink {
    async fn append(&mut self, record: &ResultRecord) -> Result<(), SinkError> {
        if let Err(e) = self.file.write_all(record.text.as_bytes()).await {
            return Err(self.io_err(e));
        }
        if let Err(e) = self.file.write_all(self.separator.as_bytes()).await {
            return Err(self.io_err(e));
        }
        if let Err(e) = self.file.flush().await {
            return Err(self.io_err(e));
        }
        if let Err(e) = self.file.sync_all().await {
            return Err(self.io_err(e));
        }
        self.appended += 1;
        Ok(())
    }
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Collects records in memory; for library callers assembling the final
/// document themselves, and for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<ResultRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ResultRecord> {
        self.records
    }

    /// Join all record texts with `separator`, in append order.
    pub fn joined(&self, separator: &str) -> String {
        self.records
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn append(&mut self, record: &ResultRecord) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn completed_units(&self) -> usize {
        self.records.len()
    }
}
