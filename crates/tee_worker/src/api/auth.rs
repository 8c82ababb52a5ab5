use crate::api::AppState;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// Checks `Authorization: Bearer <key>` or `X-API-Key: <key>` against the
/// configured key. A no-op when no key is configured. `/healthz` and
/// `/readyz` are mounted outside this layer and never pass through it.
pub async fn require_api_key<B>(
    State(app): State<Arc<AppState>>,
    req: Request<B>,
    next: Next<B>,
) -> Response {
    let Some(expected) = &app.api_key else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            req.headers()
                .get("X-API-Key")
                .and_then(|v| v.to_str().ok())
        });

    match provided {
        Some(key) if key == expected => next.run(req).await,
        _ => (StatusCode::UNAUTHORIZED, "invalid or missing API key").into_response(),
    }
}
