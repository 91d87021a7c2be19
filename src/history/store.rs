// =============================================================================
// History Store - append-only CSV table with one row per report date
// =============================================================================
//
// Appends are atomic: the existing bytes plus the new row are written to a
// sibling `.tmp` file, synced, and renamed over the original.  Readers see
// either the old table or the new one, never a partial row.
//
// Physical row order is append order.  `load()` always returns the table
// sorted ascending by report date.
// =============================================================================

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::record::{HistoricalRecord, TableLayout};
use super::HistoryTable;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    #[error("failed to persist history to {path}: {reason}")]
    PersistFailure { path: PathBuf, reason: String },
}

/// Result of an append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "report_date", rename_all = "snake_case")]
pub enum AppendOutcome {
    /// The record was written as the new last row.
    Appended(NaiveDate),
    /// A record for this date already exists; nothing was written.
    Duplicate(NaiveDate),
}

/// File-backed history table.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

/// Raw file contents plus the parsed view, kept together so an append can
/// copy the exact bytes it validated.
struct Snapshot {
    bytes: Vec<u8>,
    layout: TableLayout,
    table: HistoryTable,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, reason: impl Into<String>) -> StoreError {
        StoreError::StorageUnavailable {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn persist_failure(&self, reason: impl Into<String>) -> StoreError {
        StoreError::PersistFailure {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "history".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    // -------------------------------------------------------------------------
    // Initialisation
    // -------------------------------------------------------------------------

    /// Create an empty table with the canonical header if the file does not
    /// exist. Returns `true` when a file was created.
    pub fn initialize(&self) -> Result<bool, StoreError> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.persist_failure(e.to_string()))?;
        }

        let layout = TableLayout::canonical();
        let mut buf = Vec::new();
        {
            let mut writer = WriterBuilder::new().from_writer(&mut buf);
            writer
                .write_record(layout.headers())
                .map_err(|e| self.persist_failure(e.to_string()))?;
            writer
                .flush()
                .map_err(|e| self.persist_failure(e.to_string()))?;
        }
        self.write_atomically(&buf)?;

        info!(path = %self.path.display(), "history table created");
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------------

    fn read_snapshot(&self) -> Result<Snapshot, StoreError> {
        let bytes = std::fs::read(&self.path).map_err(|e| self.unavailable(e.to_string()))?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes.as_slice());

        let header = reader
            .headers()
            .map_err(|e| self.unavailable(format!("unreadable header: {e}")))?
            .clone();
        if header.is_empty() {
            return Err(self.unavailable("empty file"));
        }
        let layout = TableLayout::from_header(&header).map_err(|missing| {
            self.unavailable(format!("header missing columns: {}", missing.join(", ")))
        })?;

        let mut records = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row = row.map_err(|e| self.unavailable(format!("row {}: {e}", i + 1)))?;
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            let record = HistoricalRecord::from_row(&layout, &row)
                .map_err(|e| self.unavailable(format!("row {}: {e}", i + 1)))?;
            records.push(record);
        }

        Ok(Snapshot {
            bytes,
            layout,
            table: HistoryTable::from_records(records),
        })
    }

    /// Read the persisted table, sorted ascending by report date.
    pub fn load(&self) -> Result<HistoryTable, StoreError> {
        let snapshot = self.read_snapshot()?;
        debug!(
            path = %self.path.display(),
            rows = snapshot.table.len(),
            "history loaded"
        );
        Ok(snapshot.table)
    }

    /// Whether `table` already holds a record for `date`.
    pub fn contains_date(table: &HistoryTable, date: NaiveDate) -> bool {
        table.contains_date(date)
    }

    // -------------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------------

    /// Append `record` unless its report date is already present.
    pub fn append(&self, record: &HistoricalRecord) -> Result<AppendOutcome, StoreError> {
        let snapshot = self.read_snapshot()?;
        let date = record.report_date;

        if Self::contains_date(&snapshot.table, date) {
            info!(report_date = %date, "report date already in history, nothing written");
            return Ok(AppendOutcome::Duplicate(date));
        }

        let mut buf = snapshot.bytes;
        if !buf.is_empty() && !buf.ends_with(b"\n") {
            buf.push(b'\n');
        }
        {
            let mut writer = WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut buf);
            writer
                .write_record(&StringRecord::from(record.to_row(&snapshot.layout)))
                .map_err(|e| self.persist_failure(e.to_string()))?;
            writer
                .flush()
                .map_err(|e| self.persist_failure(e.to_string()))?;
        }

        self.write_atomically(&buf)?;

        info!(
            path = %self.path.display(),
            report_date = %date,
            rows = snapshot.table.len() + 1,
            "history appended"
        );
        Ok(AppendOutcome::Appended(date))
    }

    /// Write `content` to a temporary sibling file, sync it, then rename it
    /// over the table.
    fn write_atomically(&self, content: &[u8]) -> Result<(), StoreError> {
        let tmp_path = self.tmp_path();

        let result = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(content)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &self.path)
        })();

        if let Err(e) = result {
            if tmp_path.exists() {
                if let Err(cleanup) = std::fs::remove_file(&tmp_path) {
                    warn!(path = %tmp_path.display(), error = %cleanup, "failed to remove temp file");
                }
            }
            return Err(self.persist_failure(e.to_string()));
        }
        Ok(())
    }
}
