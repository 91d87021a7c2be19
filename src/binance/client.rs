// =============================================================================
// Binance REST API Client - public kline endpoint
// =============================================================================
//
// Only unsigned market-data requests are made, so no API key is needed.
// Transient failures (network errors, HTTP 5xx) are retried with a linear
// backoff; client errors (4xx) fail immediately.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use tracing::{debug, instrument, warn};

use crate::market_data::{PricePoint, PriceSeries};
use crate::runtime_config::ReferencePriceParams;

/// Binance public REST client.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
    backoff: Duration,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(params: &ReferencePriceParams) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(params.timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %params.base_url, "BinanceClient initialised");

        Ok(Self {
            base_url: params.base_url.trim_end_matches('/').to_string(),
            client,
            max_retries: params.max_retries,
            backoff: Duration::from_millis(params.retry_backoff_ms),
        })
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines (public - no signature required).
    ///
    /// Returns one [`PricePoint`] per kline, keyed by the kline open time.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<PricePoint>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let mut attempt = 0;
        let body = loop {
            attempt += 1;
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_server_error() && attempt <= self.max_retries => {
                    warn!(status = %resp.status(), attempt, "klines request failed, retrying");
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body: serde_json::Value = resp
                        .json()
                        .await
                        .context("failed to parse klines response")?;
                    if !status.is_success() {
                        anyhow::bail!("Binance GET /api/v3/klines returned {}: {}", status, body);
                    }
                    break body;
                }
                Err(e) if attempt <= self.max_retries => {
                    warn!(error = %e, attempt, "klines request failed, retrying");
                }
                Err(e) => {
                    return Err(e).context("GET /api/v3/klines request failed");
                }
            }
            tokio::time::sleep(self.backoff * attempt).await;
        };

        let points = Self::parse_klines(&body)?;
        debug!(symbol, interval, count = points.len(), "klines fetched");
        Ok(points)
    }

    /// Fetch the configured reference series, substituting an empty series on
    /// any failure.
    pub async fn fetch_price_series(&self, params: &ReferencePriceParams) -> PriceSeries {
        match self
            .get_klines(&params.symbol, &params.interval, params.limit)
            .await
        {
            Ok(points) => PriceSeries::from_points(&params.symbol, &params.interval, points),
            Err(e) => {
                warn!(symbol = %params.symbol, error = %e, "price fetch failed, using empty series");
                PriceSeries::empty(&params.symbol, &params.interval)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    fn parse_klines(body: &serde_json::Value) -> Result<Vec<PricePoint>> {
        let raw = body
            .as_array()
            .context("klines response is not an array")?;

        let mut points = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry
                .as_array()
                .context("kline entry is not an array")?;

            if arr.len() < 5 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }

            let open_time = arr[0]
                .as_i64()
                .context("kline open time is not an integer")?;
            let Some(timestamp) = Utc.timestamp_millis_opt(open_time).single() else {
                warn!(open_time, "skipping kline with out-of-range open time");
                continue;
            };
            let close = Self::parse_str_f64(&arr[4])?;

            points.push(PricePoint { timestamp, close });
        }
        Ok(points)
    }

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use serde_json::json;

    #[test]
    fn parse_klines_reads_open_time_and_close() {
        let body = json!([
            [1704153600000_i64, "42000.0", "43000.0", "41000.0", "42500.5", "100.0", 1704239999999_i64],
            [1704240000000_i64, "42500.5", "44000.0", "42000.0", 43100, "90.0", 1704326399999_i64]
        ]);
        let points = BinanceClient::parse_klines(&body).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(
            points[0].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(points[0].close, 42500.5);
        assert_eq!(points[1].close, 43100.0);
    }

    #[test]
    fn parse_klines_skips_short_entries_and_rejects_garbage() {
        let body = json!([[1704153600000_i64, "1"], [1704153600000_i64, "1", "1", "1", "2"]]);
        assert_eq!(BinanceClient::parse_klines(&body).unwrap().len(), 1);

        let bad = json!([[1704153600000_i64, "1", "1", "1", "not-a-price"]]);
        assert!(BinanceClient::parse_klines(&bad).is_err());
        assert!(BinanceClient::parse_klines(&json!({"code": -1})).is_err());
    }

    async fn serve(status: StatusCode, hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/api/v3/klines",
            get(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (status, axum::Json(json!([[1704153600000_i64, "1", "1", "1", "7.5"]])))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn params(base_url: String, max_retries: u32) -> ReferencePriceParams {
        ReferencePriceParams {
            base_url,
            max_retries,
            retry_backoff_ms: 1,
            ..ReferencePriceParams::default()
        }
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_give_empty_series() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(StatusCode::INTERNAL_SERVER_ERROR, hits.clone()).await;
        let params = params(base, 2);
        let client = BinanceClient::new(&params).unwrap();

        let series = client.fetch_price_series(&params).await;
        assert!(series.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(StatusCode::BAD_REQUEST, hits.clone()).await;
        let params = params(base, 3);
        let client = BinanceClient::new(&params).unwrap();

        assert!(client.get_klines("BTCUSDT", "1d", 10).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_fetch_builds_series() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(StatusCode::OK, hits.clone()).await;
        let params = params(base, 0);
        let client = BinanceClient::new(&params).unwrap();

        let series = client.fetch_price_series(&params).await;
        assert_eq!(series.len(), 1);
        assert_eq!(series.symbol, "BTCUSDT");
        assert_eq!(series.latest().map(|p| p.close), Some(7.5));
    }
}
