// =============================================================================
// REST API Endpoints - Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`.  Reads are public; the two mutating
// endpoints (selection update, manual refresh) require a Bearer token checked
// via the `AuthBearer` extractor.
//
// Selection query parameters are comma-separated identifiers:
//   ?participants=asset_manager,leveraged_funds&indicators=abs_diff,crossover
// Either parameter falls back to the configured default when absent.
//
// CORS is configured permissively.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::api::chart;
use crate::app_state::AppState;
use crate::divergence;
use crate::runtime_config::Selection;
use crate::types::{parse_list, IndicatorKind, ParticipantCategory};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/history", get(history))
        .route("/api/v1/participants", get(participants))
        .route("/api/v1/indicators", get(indicators))
        .route("/api/v1/net-positions", get(net_positions))
        .route("/api/v1/divergence", get(divergence_series))
        .route("/api/v1/chart", get(positions_chart))
        .route("/api/v1/price", get(price))
        .route("/api/v1/price/chart", get(price_chart))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/selection", get(get_selection).post(set_selection))
        .route("/api/v1/refresh", post(refresh))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// State & data
// =============================================================================

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

async fn history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let history = state.history();
    Json(history.table.records().to_vec())
}

#[derive(Serialize)]
struct Choice {
    id: &'static str,
    label: &'static str,
}

async fn participants() -> impl IntoResponse {
    let choices: Vec<Choice> = ParticipantCategory::ALL
        .iter()
        .map(|c| Choice {
            id: c.id(),
            label: c.label(),
        })
        .collect();
    Json(choices)
}

async fn indicators() -> impl IntoResponse {
    let choices: Vec<Choice> = IndicatorKind::ALL
        .iter()
        .map(|k| Choice {
            id: k.id(),
            label: k.label(),
        })
        .collect();
    Json(choices)
}

async fn net_positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let history = state.history();
    Json(history.net.as_ref().clone())
}

// =============================================================================
// Divergence & charts
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct SelectionQuery {
    participants: Option<String>,
    indicators: Option<String>,
}

impl SelectionQuery {
    /// Resolve against the configured default selection.
    fn resolve(&self, default: Selection) -> Result<Selection, Response> {
        let participants = match &self.participants {
            Some(raw) => parse_list(raw)
                .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?,
            None => default.participants,
        };
        let indicators = match &self.indicators {
            Some(raw) => parse_list(raw)
                .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?,
            None => default.indicators,
        };
        Ok(Selection {
            participants,
            indicators,
        })
    }
}

async fn divergence_series(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SelectionQuery>,
) -> Response {
    let selection = match query.resolve(state.default_selection()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let history = state.history();

    match divergence::compute_for(&history.net, &selection.participants, &selection.indicators) {
        Ok(series) => Json(series).into_response(),
        Err(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

async fn positions_chart(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SelectionQuery>,
) -> Response {
    let selection = match query.resolve(state.default_selection()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let history = state.history();
    Json(chart::positions_chart(
        &history.net,
        &selection.participants,
        &selection.indicators,
    ))
    .into_response()
}

async fn price(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.prices().as_ref().clone())
}

async fn price_chart(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(chart::price_chart(&state.prices()))
}

// =============================================================================
// Selection
// =============================================================================

async fn get_selection(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.default_selection())
}

async fn set_selection(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(selection): Json<Selection>,
) -> Response {
    match state.update_selection(selection.clone()) {
        Ok(()) => {
            info!(
                participants = ?selection.participants,
                indicators = ?selection.indicators,
                "default selection updated"
            );
            Json(selection).into_response()
        }
        Err(e) => {
            warn!(error = %e, "selection update rejected");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, format!("{e:#}"))
        }
    }
}

// =============================================================================
// Manual refresh
// =============================================================================

#[derive(Serialize)]
struct RefreshResponse {
    ingest: crate::pipeline::IngestReport,
    price_points: usize,
}

async fn refresh(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (ingest, prices) = tokio::join!(state.ingest_once(), state.refresh_prices());
    Json(RefreshResponse {
        ingest,
        price_points: prices.len(),
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::NaiveDate;
    use tower::ServiceExt;

    use crate::app_state::test_support::state_in;
    use crate::history::test_support::sample_record;

    const TOKEN: &str = "test-token";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn app_with_token(
        dir: &tempfile::TempDir,
        token: Option<&str>,
    ) -> (Router, Arc<AppState>) {
        let state = Arc::new(
            state_in(
                dir,
                &[
                    sample_record(date(2024, 1, 2), 100, 40),
                    sample_record(date(2024, 1, 9), 120, 30),
                ],
                Some(sample_record(date(2024, 1, 16), 130, 30)),
            )
            .with_admin_token(token.map(str::to_string)),
        );
        state.load_stored().await;
        (router(state.clone()), state)
    }

    async fn app(dir: &tempfile::TempDir) -> (Router, Arc<AppState>) {
        app_with_token(dir, Some(TOKEN)).await
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn post_json(
        app: Router,
        uri: &str,
        token: Option<&str>,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let resp = app
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir).await;
        let (status, body) = get_json(app, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn history_and_net_positions() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir).await;

        let (status, body) = get_json(app.clone(), "/api/v1/history").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = get_json(app, "/api/v1/net-positions").await;
        let am = &body["series"]["asset_manager"]["points"];
        assert_eq!(am[0]["net"], 60);
        assert_eq!(am[1]["net"], 90);
    }

    #[tokio::test]
    async fn divergence_with_explicit_selection() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir).await;
        let (status, body) = get_json(
            app,
            "/api/v1/divergence?participants=asset_manager,dealer&indicators=abs_diff",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["kind"], "absolute_difference");
        assert_eq!(body[0]["points"][0]["value"], 260.0);
    }

    #[tokio::test]
    async fn divergence_defaults_to_configured_selection() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir).await;
        let (status, body) = get_json(app, "/api/v1/divergence").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["first"], "asset_manager");
        assert_eq!(body[0]["second"], "leveraged_funds");
    }

    #[tokio::test]
    async fn divergence_rejects_bad_selection() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir).await;

        let (status, body) = get_json(app.clone(), "/api/v1/divergence?participants=dealer").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("exactly two"));

        let (status, _) = get_json(app, "/api/v1/divergence?participants=dealer,whales").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chart_prompts_on_wrong_count() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir).await;
        let (status, body) = get_json(
            app,
            "/api/v1/chart?participants=dealer,asset_manager,leveraged_funds",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], chart::SELECTION_PROMPT);
        assert!(body["traces"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn selection_update_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app(&dir).await;
        let body = serde_json::json!({
            "participants": ["dealer", "non_reportable"],
            "indicators": ["crossover"]
        });

        let (status, _) = post_json(app.clone(), "/api/v1/selection", None, body.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) =
            post_json(app.clone(), "/api/v1/selection", Some("wrong"), body.clone()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = post_json(app.clone(), "/api/v1/selection", Some(TOKEN), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.default_selection().participants,
            vec![ParticipantCategory::Dealer, ParticipantCategory::NonReportable]
        );

        let (status, _) = post_json(
            app,
            "/api/v1/selection",
            Some(TOKEN),
            serde_json::json!({ "participants": ["dealer"] }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn refresh_ingests_and_tolerates_price_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir).await;

        let (status, body) =
            post_json(app.clone(), "/api/v1/refresh", Some(TOKEN), serde_json::json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ingest"]["outcome"]["outcome"], "appended");
        assert_eq!(body["price_points"], 0);

        let (_, state) = get_json(app, "/api/v1/state").await;
        assert_eq!(state["rows"], 3);
        assert_eq!(state["last_report_date"], "2024-01-16");
    }

    #[tokio::test]
    async fn guarded_endpoints_refuse_when_token_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let (app, state) = app_with_token(&dir, None).await;
        let before = state.default_selection();

        let (status, body) = post_json(
            app.clone(),
            "/api/v1/selection",
            Some(TOKEN),
            serde_json::json!({ "participants": ["dealer", "non_reportable"] }),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Server authentication not configured");
        assert_eq!(state.default_selection(), before);

        let (status, _) =
            post_json(app, "/api/v1/refresh", None, serde_json::json!({})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(state.history().table.len(), 2);
    }
}
