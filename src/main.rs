// =============================================================================
// COT Divergence Monitor - Main Entry Point
// =============================================================================
//
// Loads the stored positioning history, runs one ingestion pass and one price
// fetch side by side, then serves the API while background loops repeat both
// on their configured intervals.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────

mod api;
mod app_state;
mod binance;
mod divergence;
mod extractor;
mod history;
mod market_data;
mod pipeline;
mod positions;
mod runtime_config;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::auth::ADMIN_TOKEN_ENV;
use crate::app_state::AppState;
use crate::binance::BinanceClient;
use crate::extractor::CftcReportExtractor;
use crate::history::HistoryStore;
use crate::runtime_config::RuntimeConfig;

const DEFAULT_CONFIG_PATH: &str = "cot_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("COT divergence monitor starting up");

    let config_path =
        std::env::var("COT_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    info!(
        history = %config.history_path.display(),
        report_url = %config.report_url,
        market = %config.market.name,
        symbol = %config.reference_price.symbol,
        "Configuration resolved"
    );

    // ── 2. History store ─────────────────────────────────────────────────
    let store = HistoryStore::new(&config.history_path);
    if config.create_history_if_missing {
        match store.initialize() {
            Ok(true) => info!(path = %store.path().display(), "Created empty history table"),
            Ok(false) => {}
            Err(e) => error!(error = %e, "Could not create history table"),
        }
    }

    // ── 3. Collaborators ─────────────────────────────────────────────────
    let extractor = CftcReportExtractor::new(
        config.report_url.clone(),
        config.market.clone(),
        config.report_timeout(),
    )
    .context("failed to build report extractor")?;
    let price_client = BinanceClient::new(&config.reference_price)?;

    let report_every = Duration::from_secs(config.report_refresh_secs);
    let price_every = Duration::from_secs(config.reference_price.refresh_secs);
    let bind_addr = config.bind_addr.clone();

    // ── 4. Build shared state & first pass ───────────────────────────────
    let admin_token = std::env::var(ADMIN_TOKEN_ENV).ok();
    if admin_token.as_deref().map_or(true, str::is_empty) {
        warn!("{ADMIN_TOKEN_ENV} is not set, authenticated endpoints are disabled");
    }
    let state = Arc::new(
        AppState::new(
            config,
            &config_path,
            store,
            Arc::new(extractor),
            price_client,
        )
        .with_admin_token(admin_token),
    );

    state.load_stored().await;
    let (report, prices) = tokio::join!(state.ingest_once(), state.refresh_prices());
    info!(
        outcome = ?report.outcome,
        rows = ?report.rows,
        price_points = prices.len(),
        "Initial refresh complete"
    );
    if report.outcome.is_failure() {
        warn!("Serving previously stored history until the next ingestion pass");
    }

    // ── 5. Start the API server ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server to {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 6. Report ingestion loop ─────────────────────────────────────────
    let ingest_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(report_every);
        // The first tick fires immediately; the startup pass already ran.
        interval.tick().await;
        loop {
            interval.tick().await;
            ingest_state.ingest_once().await;
        }
    });

    // ── 7. Reference price loop ──────────────────────────────────────────
    let price_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(price_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let series = price_state.refresh_prices().await;
            info!(points = series.len(), "Reference prices refreshed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    info!("COT divergence monitor shut down complete.");
    Ok(())
}
