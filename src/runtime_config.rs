// =============================================================================
// Runtime Configuration - monitor settings with atomic save
// =============================================================================
//
// Every tunable lives here: where the history table is, where reports and
// reference prices come from, how often they are refreshed, and the default
// participant / indicator selection offered to chart clients.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{IndicatorKind, ParticipantCategory};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_history_path() -> PathBuf {
    PathBuf::from("history.csv")
}

fn default_report_url() -> String {
    "https://www.cftc.gov/dea/futures/financial_lf.htm".to_string()
}

fn default_report_timeout_secs() -> u64 {
    30
}

fn default_report_refresh_secs() -> u64 {
    6 * 60 * 60
}

fn default_price_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_price_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_price_interval() -> String {
    "1d".to_string()
}

fn default_price_limit() -> u32 {
    500
}

fn default_price_timeout_secs() -> u64 {
    15
}

fn default_price_max_retries() -> u32 {
    3
}

fn default_price_retry_backoff_ms() -> u64 {
    500
}

fn default_price_refresh_secs() -> u64 {
    15 * 60
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_participants() -> Vec<ParticipantCategory> {
    vec![
        ParticipantCategory::AssetManager,
        ParticipantCategory::LeveragedFunds,
    ]
}

fn default_indicators() -> Vec<IndicatorKind> {
    vec![IndicatorKind::AbsoluteDifference]
}

// =============================================================================
// MarketIdentity
// =============================================================================

/// Identity of the tracked market, written into every appended row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketIdentity {
    /// Section heading in the report, also the `Market_and_Exchange_Names` cell.
    pub name: String,
    /// Expected `CFTC Code #` of the section. Empty accepts any code.
    pub contract_market_code: String,
    pub market_code: String,
    pub region_code: String,
    pub commodity_code: String,
}

impl Default for MarketIdentity {
    fn default() -> Self {
        Self {
            name: "BITCOIN - CHICAGO MERCANTILE EXCHANGE".to_string(),
            contract_market_code: "133741".to_string(),
            market_code: "CME".to_string(),
            region_code: "00".to_string(),
            commodity_code: "133".to_string(),
        }
    }
}

// =============================================================================
// ReferencePriceParams
// =============================================================================

/// Where and how the reference price series is fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencePriceParams {
    #[serde(default = "default_price_base_url")]
    pub base_url: String,

    #[serde(default = "default_price_symbol")]
    pub symbol: String,

    /// Kline interval, e.g. "1d".
    #[serde(default = "default_price_interval")]
    pub interval: String,

    /// Number of klines requested (Binance caps this at 1000).
    #[serde(default = "default_price_limit")]
    pub limit: u32,

    #[serde(default = "default_price_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries on network errors and HTTP 5xx.
    #[serde(default = "default_price_max_retries")]
    pub max_retries: u32,

    /// Retry `n` waits `n * retry_backoff_ms`.
    #[serde(default = "default_price_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_price_refresh_secs")]
    pub refresh_secs: u64,
}

impl Default for ReferencePriceParams {
    fn default() -> Self {
        Self {
            base_url: default_price_base_url(),
            symbol: default_price_symbol(),
            interval: default_price_interval(),
            limit: default_price_limit(),
            timeout_secs: default_price_timeout_secs(),
            max_retries: default_price_max_retries(),
            retry_backoff_ms: default_price_retry_backoff_ms(),
            refresh_secs: default_price_refresh_secs(),
        }
    }
}

// =============================================================================
// Selection
// =============================================================================

/// Default participant pair and indicator set served to chart clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default = "default_participants")]
    pub participants: Vec<ParticipantCategory>,

    #[serde(default = "default_indicators")]
    pub indicators: Vec<IndicatorKind>,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            participants: default_participants(),
            indicators: default_indicators(),
        }
    }
}

impl Selection {
    /// A selection must name exactly two distinct participants.
    pub fn validate(&self) -> Result<()> {
        match self.participants.as_slice() {
            [a, b] if a != b => Ok(()),
            [a, _] => anyhow::bail!("participant {a} selected twice"),
            other => anyhow::bail!("select exactly two participants ({} given)", other.len()),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the monitor.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- History ------------------------------------------------------------

    /// CSV file holding one row per report date.
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    /// Create an empty table on startup when the file is absent.
    #[serde(default = "default_true")]
    pub create_history_if_missing: bool,

    // --- Report source ------------------------------------------------------

    #[serde(default = "default_report_url")]
    pub report_url: String,

    #[serde(default)]
    pub market: MarketIdentity,

    #[serde(default = "default_report_timeout_secs")]
    pub report_timeout_secs: u64,

    /// Seconds between ingestion passes.
    #[serde(default = "default_report_refresh_secs")]
    pub report_refresh_secs: u64,

    // --- Reference price ----------------------------------------------------

    #[serde(default)]
    pub reference_price: ReferencePriceParams,

    // --- API ----------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub default_selection: Selection,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_path: default_history_path(),
            create_history_if_missing: true,
            report_url: default_report_url(),
            market: MarketIdentity::default(),
            report_timeout_secs: default_report_timeout_secs(),
            report_refresh_secs: default_report_refresh_secs(),
            reference_price: ReferencePriceParams::default(),
            bind_addr: default_bind_addr(),
            default_selection: Selection::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid runtime config in {}", path.display()))?;

        info!(
            path = %path.display(),
            history = %config.history_path.display(),
            symbol = %config.reference_price.symbol,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Reject settings that cannot be served.
    pub fn validate(&self) -> Result<()> {
        self.default_selection
            .validate()
            .context("default_selection")?;
        if self.reference_price.limit == 0 {
            anyhow::bail!("reference_price.limit must be positive");
        }
        if self.report_refresh_secs == 0 || self.reference_price.refresh_secs == 0 {
            anyhow::bail!("refresh intervals must be positive");
        }
        Ok(())
    }

    /// Apply `COT_HISTORY_PATH` / `COT_BIND_ADDR` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("COT_HISTORY_PATH") {
            if !path.trim().is_empty() {
                self.history_path = PathBuf::from(path.trim());
            }
        }
        if let Ok(addr) = std::env::var("COT_BIND_ADDR") {
            if !addr.trim().is_empty() {
                self.bind_addr = addr.trim().to_string();
            }
        }
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        // Atomic write: write to a temporary sibling file, then rename.
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.history_path, PathBuf::from("history.csv"));
        assert!(cfg.create_history_if_missing);
        assert_eq!(cfg.market.name, "BITCOIN - CHICAGO MERCANTILE EXCHANGE");
        assert_eq!(cfg.reference_price.symbol, "BTCUSDT");
        assert_eq!(cfg.reference_price.interval, "1d");
        assert_eq!(cfg.reference_price.limit, 500);
        assert_eq!(cfg.reference_price.max_retries, 3);
        assert_eq!(
            cfg.default_selection.participants,
            vec![ParticipantCategory::AssetManager, ParticipantCategory::LeveragedFunds]
        );
        assert_eq!(
            cfg.default_selection.indicators,
            vec![IndicatorKind::AbsoluteDifference]
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:3001");
        assert_eq!(cfg.report_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.reference_price.timeout_secs, 15);
        assert_eq!(cfg.market.market_code, "CME");
        assert_eq!(cfg.market.contract_market_code, "133741");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "history_path": "data/btc.csv",
            "reference_price": { "symbol": "ETHUSDT" },
            "default_selection": { "participants": ["dealer", "Nonreportable"] }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.history_path, PathBuf::from("data/btc.csv"));
        assert_eq!(cfg.reference_price.symbol, "ETHUSDT");
        assert_eq!(cfg.reference_price.limit, 500);
        assert_eq!(
            cfg.default_selection.participants,
            vec![ParticipantCategory::Dealer, ParticipantCategory::NonReportable]
        );
        assert_eq!(
            cfg.default_selection.indicators,
            vec![IndicatorKind::AbsoluteDifference]
        );
    }

    #[test]
    fn unknown_participant_fails_at_load() {
        let json = r#"{ "default_selection": { "participants": ["dealer", "whales"] } }"#;
        assert!(serde_json::from_str::<RuntimeConfig>(json).is_err());
    }

    #[test]
    fn selection_must_be_two_distinct() {
        let mut sel = Selection::default();
        assert!(sel.validate().is_ok());
        sel.participants = vec![ParticipantCategory::Dealer];
        assert!(sel.validate().is_err());
        sel.participants = vec![ParticipantCategory::Dealer, ParticipantCategory::Dealer];
        assert!(sel.validate().is_err());
        sel.participants = ParticipantCategory::ALL[..3].to_vec();
        assert!(sel.validate().is_err());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cot_config.json");
        let mut cfg = RuntimeConfig::default();
        cfg.default_selection.indicators = vec![IndicatorKind::Crossover];
        cfg.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.default_selection, cfg.default_selection);
        assert_eq!(loaded.history_path, cfg.history_path);
    }

    #[test]
    fn load_rejects_invalid_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cot_config.json");
        std::fs::write(&path, r#"{ "default_selection": { "participants": ["dealer"] } }"#)
            .unwrap();
        assert!(RuntimeConfig::load(&path).is_err());
    }
}
