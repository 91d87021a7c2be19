// =============================================================================
// Ingestion Pass
// =============================================================================
//
// One pass: extract at most one record, append it unless its date is already
// stored, reload the full table and derive every net series.
//
// Failures never abort the pass.  An extraction or persist failure is recorded
// in the report and the table is still reloaded; when the reload itself fails
// the caller keeps whatever it loaded last.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::extractor::RecordExtractor;
use crate::history::{AppendOutcome, HistoryStore, HistoryTable, StoreError};
use crate::positions::{derive_all, NetPositionSet};

/// What happened to the extracted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Appended { report_date: NaiveDate },
    Duplicate { report_date: NaiveDate },
    NoNewRecord,
    ExtractionFailed { reason: String },
    PersistFailed { reason: String },
    StorageUnavailable { reason: String },
}

impl IngestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ExtractionFailed { .. } | Self::PersistFailed { .. } | Self::StorageUnavailable { .. }
        )
    }
}

impl From<AppendOutcome> for IngestOutcome {
    fn from(outcome: AppendOutcome) -> Self {
        match outcome {
            AppendOutcome::Appended(report_date) => Self::Appended { report_date },
            AppendOutcome::Duplicate(report_date) => Self::Duplicate { report_date },
        }
    }
}

impl From<StoreError> for IngestOutcome {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StorageUnavailable { .. } => Self::StorageUnavailable {
                reason: err.to_string(),
            },
            StoreError::PersistFailure { .. } => Self::PersistFailed {
                reason: err.to_string(),
            },
        }
    }
}

/// Summary of one pass, kept in application state for the API.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub source: &'static str,
    pub outcome: IngestOutcome,
    /// Rows in the reloaded table, `None` when the reload failed.
    pub rows: Option<usize>,
    /// Reload error, if any.
    pub load_error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// The loaded table together with the net series derived from it.
#[derive(Debug, Clone, Default)]
pub struct DerivedHistory {
    pub table: Arc<HistoryTable>,
    pub net: Arc<NetPositionSet>,
}

impl DerivedHistory {
    pub fn from_table(table: HistoryTable) -> Self {
        let net = derive_all(&table);
        Self {
            table: Arc::new(table),
            net: Arc::new(net),
        }
    }
}

/// Load the table and derive its net series.
pub fn load_derived(store: &HistoryStore) -> Result<DerivedHistory, StoreError> {
    store.load().map(DerivedHistory::from_table)
}

/// Run one ingestion pass.
///
/// Returns the pass report and, when the reload succeeded, the fresh derived
/// history.
pub async fn run_ingest(
    extractor: &dyn RecordExtractor,
    store: &HistoryStore,
) -> (IngestReport, Option<DerivedHistory>) {
    let source = extractor.source_name();

    let outcome = match extractor.extract().await {
        Ok(Some(record)) => match store.append(&record) {
            Ok(appended) => IngestOutcome::from(appended),
            Err(e) => {
                error!(source, error = %e, "failed to store extracted record");
                IngestOutcome::from(e)
            }
        },
        Ok(None) => {
            info!(source, "no new record this run");
            IngestOutcome::NoNewRecord
        }
        Err(e) => {
            warn!(source, error = %e, "extraction failed, keeping stored history");
            IngestOutcome::ExtractionFailed {
                reason: e.to_string(),
            }
        }
    };

    let (derived, load_error) = match load_derived(store) {
        Ok(derived) => (Some(derived), None),
        Err(e) => {
            error!(path = %store.path().display(), error = %e, "history reload failed");
            (None, Some(e.to_string()))
        }
    };

    let report = IngestReport {
        source,
        outcome,
        rows: derived.as_ref().map(|d| d.table.len()),
        load_error,
        finished_at: Utc::now(),
    };
    info!(
        source,
        outcome = ?report.outcome,
        rows = ?report.rows,
        "ingest pass finished"
    );
    (report, derived)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::extractor::ExtractionError;
    use crate::history::test_support::sample_record;
    use crate::history::HistoricalRecord;
    use crate::types::ParticipantCategory;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    enum Fake {
        Record(HistoricalRecord),
        Nothing,
        Broken,
    }

    #[async_trait]
    impl RecordExtractor for Fake {
        async fn extract(&self) -> Result<Option<HistoricalRecord>, ExtractionError> {
            match self {
                Fake::Record(r) => Ok(Some(r.clone())),
                Fake::Nothing => Ok(None),
                Fake::Broken => Err(ExtractionError::DateNotFound),
            }
        }

        fn source_name(&self) -> &'static str {
            "fake"
        }
    }

    fn seeded_store(dir: &tempfile::TempDir) -> HistoryStore {
        let store = HistoryStore::new(dir.path().join("history.csv"));
        store.initialize().unwrap();
        store.append(&sample_record(date(2024, 1, 2), 100, 40)).unwrap();
        store
    }

    #[tokio::test]
    async fn new_record_is_appended_and_derived() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);
        let fake = Fake::Record(sample_record(date(2024, 1, 9), 120, 30));

        let (report, derived) = run_ingest(&fake, &store).await;
        assert_eq!(
            report.outcome,
            IngestOutcome::Appended { report_date: date(2024, 1, 9) }
        );
        assert_eq!(report.rows, Some(2));
        let derived = derived.unwrap();
        let am = derived.net.get(ParticipantCategory::AssetManager).unwrap();
        assert_eq!(am.values(), vec![60, 90]);
    }

    #[tokio::test]
    async fn repeated_pass_reports_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);
        let fake = Fake::Record(sample_record(date(2024, 1, 9), 120, 30));

        run_ingest(&fake, &store).await;
        let before = std::fs::read(store.path()).unwrap();
        let (report, derived) = run_ingest(&fake, &store).await;

        assert_eq!(
            report.outcome,
            IngestOutcome::Duplicate { report_date: date(2024, 1, 9) }
        );
        assert!(!report.outcome.is_failure());
        assert_eq!(derived.unwrap().table.len(), 2);
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn extraction_failure_still_serves_stored_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        let (report, derived) = run_ingest(&Fake::Broken, &store).await;
        assert!(matches!(report.outcome, IngestOutcome::ExtractionFailed { .. }));
        assert!(report.outcome.is_failure());
        assert_eq!(derived.unwrap().table.len(), 1);

        let (report, _) = run_ingest(&Fake::Nothing, &store).await;
        assert_eq!(report.outcome, IngestOutcome::NoNewRecord);
    }

    #[tokio::test]
    async fn missing_store_reports_unavailable_without_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("absent.csv"));
        let fake = Fake::Record(sample_record(date(2024, 1, 9), 120, 30));

        let (report, derived) = run_ingest(&fake, &store).await;
        assert!(matches!(report.outcome, IngestOutcome::StorageUnavailable { .. }));
        assert!(derived.is_none());
        assert_eq!(report.rows, None);
        assert!(report.load_error.is_some());
    }

    #[test]
    fn outcome_serialises_with_tag() {
        let json = serde_json::to_value(IngestOutcome::Duplicate {
            report_date: date(2024, 1, 9),
        })
        .unwrap();
        assert_eq!(json["outcome"], "duplicate");
        assert_eq!(json["report_date"], "2024-01-09");
    }
}
