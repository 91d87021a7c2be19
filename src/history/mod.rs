// =============================================================================
// History Module
// =============================================================================
//
// Append-only storage of weekly positioning snapshots.  `record` defines the
// row model and the CSV column contract; `store` owns the file and enforces
// one record per reporting date.

pub mod record;
pub mod store;

pub use record::{HistoricalRecord, PositionCounts};
pub use store::{AppendOutcome, HistoryStore, StoreError};

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::Serialize;
use tracing::warn;

/// Reduce an upstream timestamp to the calendar date it falls on in its own
/// timezone. Report dates are compared by calendar date only.
pub fn normalize_report_date<Tz: TimeZone>(at: &DateTime<Tz>) -> NaiveDate {
    at.date_naive()
}

/// The full history, sorted strictly ascending by report date.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryTable {
    records: Vec<HistoricalRecord>,
}

impl HistoryTable {
    /// Sort `records` by date and drop repeated dates, keeping the first
    /// occurrence in input order.
    pub fn from_records(records: Vec<HistoricalRecord>) -> Self {
        let before = records.len();
        let mut records = records;
        // Stable sort keeps input order among equal dates.
        records.sort_by_key(|r| r.report_date);
        records.dedup_by_key(|r| r.report_date);
        let dropped = before - records.len();
        if dropped > 0 {
            warn!(dropped, "duplicate report dates in history, keeping first occurrence");
        }
        Self { records }
    }

    pub fn records(&self) -> &[HistoricalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Shared date axis of every derived series.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.records.iter().map(|r| r.report_date).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.report_date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.report_date)
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.records
            .binary_search_by_key(&date, |r| r.report_date)
            .is_ok()
    }
}
