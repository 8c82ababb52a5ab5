use crate::api::error::ApiError;
use crate::api::AppState;
use crate::sealing::Sealer;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tee_protocol::Job;
use uuid::Uuid;

#[derive(Serialize)]
struct GenerateResponse {
    encrypted_job: String,
}

/// `POST /job/generate` -- seals a client-submitted job, binding it to
/// this worker's identity so `/job/add` can later prove the job came
/// through a generate call this worker issued.
pub async fn generate(
    State(app): State<Arc<AppState>>,
    Json(mut job): Json<Job>,
) -> Result<Json<GenerateResponse>, ApiError> {
    job.uid = None;
    let mut signed = serde_json::to_value(&job).map_err(anyhow::Error::from)?;
    if let Some(obj) = signed.as_object_mut() {
        obj.insert(
            "worker_id".to_string(),
            serde_json::Value::String(app.worker_id.clone()),
        );
    }
    let plaintext = serde_json::to_vec(&signed).map_err(anyhow::Error::from)?;
    let encrypted_job = app.sealer.seal(b"", &plaintext)?;
    Ok(Json(GenerateResponse { encrypted_job }))
}

#[derive(Deserialize)]
pub struct AddRequest {
    encrypted_job: String,
}

#[derive(Serialize)]
struct AddResponse {
    uid: Uuid,
}

/// `POST /job/add` -- decrypts the handle from `generate` and admits it.
pub async fn add(
    State(app): State<Arc<AppState>>,
    Json(req): Json<AddRequest>,
) -> Result<Json<AddResponse>, ApiError> {
    let plaintext = app.sealer.unseal(b"", &req.encrypted_job)?;
    let mut value: serde_json::Value =
        serde_json::from_slice(&plaintext).map_err(|e| anyhow::anyhow!("malformed job: {e}"))?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("worker_id");
    }
    let job: Job =
        serde_json::from_value(value).map_err(|e| anyhow::anyhow!("malformed job: {e}"))?;

    let uid = app.server.add_job(job).await?;
    Ok(Json(AddResponse { uid }))
}

/// `GET /job/status/:uid` -- polls for a sealed result.
pub async fn status(
    State(app): State<Arc<AppState>>,
    Path(uid): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(result) = app.server.poll_result(&uid).await else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            anyhow::anyhow!("no result for {uid}"),
        ));
    };

    if !result.is_success() {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            anyhow::anyhow!(result.error),
        ));
    }

    let plaintext = serde_json::to_vec(&result).map_err(anyhow::Error::from)?;
    let sealed = app.sealer.seal(result.job.nonce.as_bytes(), &plaintext)?;
    Ok(Json(sealed))
}

#[derive(Deserialize)]
pub struct ResultRequest {
    encrypted_request: String,
    encrypted_result: String,
}

/// `POST /job/result` -- a server-side convenience that decrypts a
/// `(request, result)` bundle on the client's behalf.
pub async fn result(
    State(app): State<Arc<AppState>>,
    Json(req): Json<ResultRequest>,
) -> Result<String, ApiError> {
    let job_bytes = app.sealer.unseal(b"", &req.encrypted_request)?;
    let job: Job = serde_json::from_slice(&job_bytes)
        .map_err(|e| anyhow::anyhow!("malformed request bundle: {e}"))?;

    let result_bytes = app
        .sealer
        .unseal(job.nonce.as_bytes(), &req.encrypted_result)?;
    String::from_utf8(result_bytes).map_err(|e| anyhow::anyhow!("non-utf8 result: {e}").into())
}

#[derive(Deserialize)]
pub struct SetKeyRequest {
    key: String,
    signature: String,
}

#[derive(Serialize)]
struct SetKeyResponse {
    status: &'static str,
}

/// `POST /setkey` -- operator-only route to install a new root key.
/// Only present (routed) in enclave mode; see `api::build_router`.
pub async fn setkey(
    State(app): State<Arc<AppState>>,
    Json(req): Json<SetKeyRequest>,
) -> Result<Json<SetKeyResponse>, ApiError> {
    use base64::Engine;

    let Some(distributor) = &app.key_distributor else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            anyhow::anyhow!("setkey is not configured"),
        ));
    };
    let Some(ring) = &app.key_ring else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            anyhow::anyhow!("setkey is unavailable in standalone mode"),
        ));
    };

    let key = base64::engine::general_purpose::STANDARD
        .decode(&req.key)
        .map_err(|e| anyhow::anyhow!("malformed key: {e}"))?;
    if key.len() != 32 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            anyhow::anyhow!("key must be exactly 32 bytes"),
        ));
    }
    let signature = base64::engine::general_purpose::STANDARD
        .decode(&req.signature)
        .map_err(|e| anyhow::anyhow!("malformed signature: {e}"))?;

    distributor
        .verify(&key, &signature)
        .map_err(|e| ApiError::new(StatusCode::UNAUTHORIZED, anyhow::anyhow!(e.to_string())))?;

    ring.add(key);
    app.stats.record(crate::telemetry::StatsEvent::KeyRotated);
    Ok(Json(SetKeyResponse { status: "installed" }))
}

#[derive(Serialize)]
struct StatsSummary {
    admitted: u64,
    completed_ok: u64,
    completed_err: u64,
    key_rotations: u64,
}

#[derive(Serialize)]
struct CapabilitiesResponse {
    capabilities: Vec<String>,
    stats: StatsSummary,
}

pub async fn capabilities(State(app): State<Arc<AppState>>) -> Json<CapabilitiesResponse> {
    use std::sync::atomic::Ordering;

    let counters = app.stats.counters();
    Json(CapabilitiesResponse {
        capabilities: app.server.advertised_capabilities(),
        stats: StatsSummary {
            admitted: counters.admitted.load(Ordering::Relaxed),
            completed_ok: counters.completed_ok.load(Ordering::Relaxed),
            completed_err: counters.completed_err.load(Ordering::Relaxed),
            key_rotations: counters.key_rotations.load(Ordering::Relaxed),
        },
    })
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz(State(app): State<Arc<AppState>>) -> StatusCode {
    if app.ready.load(std::sync::atomic::Ordering::Acquire) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
