use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tee_protocol::AdmissionError;

/// A status code paired with the error that produced it. Every fallible
/// handler converts into this before returning, so the wire shape of an
/// error response is uniform across all routes.
pub struct ApiError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        ApiError {
            status,
            error: error.into(),
        }
    }
}

pub trait ApiErrorExt {
    fn with_status(self, status: StatusCode) -> ApiError;
}

impl<E: Into<anyhow::Error>> ApiErrorExt for E {
    fn with_status(self, status: StatusCode) -> ApiError {
        ApiError::new(status, self)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        let status = match &err {
            AdmissionError::NotWhitelisted => StatusCode::BAD_REQUEST,
            AdmissionError::DuplicateNonce => StatusCode::BAD_REQUEST,
            AdmissionError::CapabilityUnhealthy(_) => StatusCode::BAD_REQUEST,
            AdmissionError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        };
        ApiError::new(status, anyhow::anyhow!(err.to_string()))
    }
}

impl From<crate::sealing::SealError> for ApiError {
    fn from(err: crate::sealing::SealError) -> Self {
        // Never echo internal crypto state; the client only learns that
        // sealing failed, not why.
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow::anyhow!("{err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::debug!(status = %self.status, error = %self.error, "request failed");
        let body = ErrorBody {
            error: format!("{:#}", self.error),
        };
        (self.status, axum::Json(body)).into_response()
    }
}
