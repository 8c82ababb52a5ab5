//! The four-endpoint encrypted request protocol, plus the unauthenticated
//! health/capabilities surface.

mod auth;
mod error;
mod routes;

pub use error::ApiError;

use crate::dispatch::JobServer;
use crate::sealing::{KeyRing, RsaKeyDistributor, Sealer};
use crate::telemetry::StatsSink;
use axum::routing::{get, post};
use axum::Router;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub struct AppState {
    pub server: Arc<JobServer>,
    pub sealer: Arc<dyn Sealer>,
    /// Only set in enclave mode, where `/setkey` is reachable.
    pub key_ring: Option<Arc<KeyRing>>,
    pub key_distributor: Option<RsaKeyDistributor>,
    pub worker_id: String,
    pub api_key: Option<String>,
    pub stats: StatsSink,
    pub ready: AtomicBool,
}

/// Builds the router. `/healthz` is always reachable; every other route
/// sits behind the API-key middleware (a no-op when no key is configured)
/// and `/setkey` is only mounted at all when a key ring and distributor
/// are present (enclave mode).
pub fn build_router(app: Arc<AppState>) -> Router {
    let enclave_mode = app.key_ring.is_some() && app.key_distributor.is_some();

    let mut protected = Router::new()
        .route("/job/generate", post(routes::generate))
        .route("/job/add", post(routes::add))
        .route("/job/status/:uid", get(routes::status))
        .route("/job/result", post(routes::result))
        .route("/capabilities", get(routes::capabilities));

    if enclave_mode {
        protected = protected.route("/setkey", post(routes::setkey));
    }

    let protected = protected
        .layer(axum::middleware::from_fn_with_state(
            app.clone(),
            auth::require_api_key,
        ))
        .with_state(app.clone());

    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .with_state(app)
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
