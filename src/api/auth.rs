// =============================================================================
// Bearer Token Authentication - Axum extractor
// =============================================================================
//
// Guards the mutating endpoints (selection update, manual refresh).  The
// expected token is read from `COT_ADMIN_TOKEN` once at startup and held in
// `AppState`.  With no token configured every guarded request is refused.
//
//   async fn handler(_auth: AuthBearer, ...) { ... }
// =============================================================================

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::app_state::AppState;

pub const ADMIN_TOKEN_ENV: &str = "COT_ADMIN_TOKEN";

/// Compare two byte slices without short-circuiting on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Validated `Authorization: Bearer <token>` header.
pub struct AuthBearer;

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

fn reject(status: StatusCode, message: &'static str) -> AuthRejection {
    AuthRejection { status, message }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = Arc::<AppState>::from_ref(state);
        let Some(expected) = app.admin_token() else {
            warn!("{ADMIN_TOKEN_ENV} is not set, rejecting authenticated request");
            return Err(reject(
                StatusCode::FORBIDDEN,
                "Server authentication not configured",
            ));
        };

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let Some(token) = token else {
            warn!("missing or malformed Authorization header");
            return Err(reject(
                StatusCode::UNAUTHORIZED,
                "Missing or invalid authorization token",
            ));
        };

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            warn!("invalid admin token presented");
            return Err(reject(StatusCode::FORBIDDEN, "Invalid authorization token"));
        }

        Ok(AuthBearer)
    }
}
