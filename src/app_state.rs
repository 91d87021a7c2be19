// =============================================================================
// Central Application State
// =============================================================================
//
// Everything the API handlers and background loops share, passed around as
// `Arc<AppState>`.  Derived data is published as whole `Arc` snapshots so a
// reader never observes a half-updated table.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock around published snapshots and small collections.
//   - tokio::sync::Mutex around the history store: one ingestion pass at a
//     time, held across the report fetch.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::binance::BinanceClient;
use crate::extractor::RecordExtractor;
use crate::history::HistoryStore;
use crate::market_data::PriceSeries;
use crate::pipeline::{self, DerivedHistory, IngestOutcome, IngestReport};
use crate::runtime_config::{RuntimeConfig, Selection};

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the state endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Where the error came from, e.g. "ingest" or "history".
    pub source: &'static str,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented whenever published data changes.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    /// File the config is saved back to on selection updates.
    pub config_path: PathBuf,
    /// Bearer token for mutating endpoints. `None` refuses them all.
    admin_token: Option<String>,

    // ── Collaborators ───────────────────────────────────────────────────
    store: tokio::sync::Mutex<HistoryStore>,
    extractor: Arc<dyn RecordExtractor>,
    price_client: BinanceClient,

    // ── Published data ──────────────────────────────────────────────────
    history: RwLock<DerivedHistory>,
    prices: RwLock<Arc<PriceSeries>>,
    last_ingest: RwLock<Option<IngestReport>>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        config_path: impl Into<PathBuf>,
        store: HistoryStore,
        extractor: Arc<dyn RecordExtractor>,
        price_client: BinanceClient,
    ) -> Self {
        let prices = PriceSeries::empty(
            &config.reference_price.symbol,
            &config.reference_price.interval,
        );

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            config_path: config_path.into(),
            admin_token: None,
            store: tokio::sync::Mutex::new(store),
            extractor,
            price_client,
            history: RwLock::new(DerivedHistory::default()),
            prices: RwLock::new(Arc::new(prices)),
            last_ingest: RwLock::new(None),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// Set the admin token. An empty token counts as unset.
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error. The ring buffer is capped at [`MAX_RECENT_ERRORS`];
    /// oldest entries are evicted first.
    pub fn push_error(&self, source: &'static str, msg: String) {
        let record = ErrorRecord {
            message: msg,
            source,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Published data ──────────────────────────────────────────────────

    /// Current table and net series. Cheap: clones two `Arc`s.
    pub fn history(&self) -> DerivedHistory {
        self.history.read().clone()
    }

    pub fn prices(&self) -> Arc<PriceSeries> {
        self.prices.read().clone()
    }

    pub fn last_ingest(&self) -> Option<IngestReport> {
        self.last_ingest.read().clone()
    }

    pub fn default_selection(&self) -> Selection {
        self.runtime_config.read().default_selection.clone()
    }

    fn publish_history(&self, derived: DerivedHistory) {
        *self.history.write() = derived;
        self.increment_version();
    }

    // ── Refresh operations ──────────────────────────────────────────────

    /// Load whatever is on disk without ingesting. Used at startup so the API
    /// serves stored data before the first report fetch completes.
    pub async fn load_stored(&self) {
        let store = self.store.lock().await;
        match pipeline::load_derived(&store) {
            Ok(derived) => {
                info!(rows = derived.table.len(), "stored history loaded");
                self.publish_history(derived);
            }
            Err(e) => {
                warn!(error = %e, "stored history unavailable");
                self.push_error("history", e.to_string());
            }
        }
    }

    /// Run one ingestion pass and publish the result. On a failed reload the
    /// previously published table stays in place.
    pub async fn ingest_once(&self) -> IngestReport {
        let (report, derived) = {
            let store = self.store.lock().await;
            pipeline::run_ingest(self.extractor.as_ref(), &store).await
        };

        if let IngestOutcome::ExtractionFailed { reason }
        | IngestOutcome::PersistFailed { reason }
        | IngestOutcome::StorageUnavailable { reason } = &report.outcome
        {
            self.push_error("ingest", reason.clone());
        }
        if let Some(reason) = &report.load_error {
            self.push_error("history", reason.clone());
        }
        if let Some(derived) = derived {
            self.publish_history(derived);
        }

        *self.last_ingest.write() = Some(report.clone());
        self.increment_version();
        report
    }

    /// Fetch the reference price series. A failed fetch publishes an empty
    /// series.
    pub async fn refresh_prices(&self) -> Arc<PriceSeries> {
        let params = self.runtime_config.read().reference_price.clone();
        let series = Arc::new(self.price_client.fetch_price_series(&params).await);
        *self.prices.write() = series.clone();
        self.increment_version();
        series
    }

    /// Persist a new default selection.
    pub fn update_selection(&self, selection: Selection) -> anyhow::Result<()> {
        selection.validate()?;
        let mut config = self.runtime_config.write();
        let mut updated = config.clone();
        updated.default_selection = selection;
        updated.save(&self.config_path)?;
        *config = updated;
        drop(config);
        self.increment_version();
        Ok(())
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    pub fn build_snapshot(&self) -> StateSnapshot {
        let history = self.history();
        let prices = self.prices();

        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            rows: history.table.len(),
            first_report_date: history.table.first_date(),
            last_report_date: history.table.last_date(),
            last_ingest: self.last_ingest(),
            price_points: prices.len(),
            latest_close: prices.latest().map(|p| p.close),
            price_fetched_at: prices.fetched_at.map(|t| t.timestamp_millis()),
            default_selection: self.default_selection(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub rows: usize,
    pub first_report_date: Option<NaiveDate>,
    pub last_report_date: Option<NaiveDate>,
    pub last_ingest: Option<IngestReport>,
    pub price_points: usize,
    pub latest_close: Option<f64>,
    pub price_fetched_at: Option<i64>,
    pub default_selection: Selection,
    pub recent_errors: Vec<ErrorRecord>,
}
