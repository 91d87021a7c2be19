// =============================================================================
// Record Extraction
// =============================================================================
//
// A `RecordExtractor` turns an upstream report into at most one structured
// record for the latest reporting date.  Everything fragile about parsing the
// upstream format stays behind this trait; the history store only ever sees a
// complete `HistoricalRecord` or nothing.

pub mod cftc;

pub use cftc::CftcReportExtractor;

use async_trait::async_trait;
use thiserror::Error;

use crate::history::HistoricalRecord;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("report fetch failed: {0}")]
    Transport(String),

    #[error("report date not found")]
    DateNotFound,

    #[error("invalid number '{value}' in {field}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("inconsistent report figures: {0}")]
    Inconsistent(String),
}

#[async_trait]
pub trait RecordExtractor: Send + Sync {
    /// Fetch and parse the latest report. `Ok(None)` means the report does not
    /// list the configured market this run.
    async fn extract(&self) -> Result<Option<HistoricalRecord>, ExtractionError>;

    /// Short name for logging.
    fn source_name(&self) -> &'static str;
}
