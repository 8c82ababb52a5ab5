use anyhow::Context;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tee_worker::api::{self, AppState};
use tee_worker::cache::ResultCache;
use tee_worker::config::{Config, SealingMode};
use tee_worker::dispatch::{Handler, JobServer, JobServerConfig};
use tee_worker::health::HealthTracker;
use tee_worker::priority::PriorityClassifier;
use tee_worker::queue::PriorityQueue;
use tee_worker::sealing::{KeyRing, OsKeystoreSealer, RsaKeyDistributor, Sealer};
use tee_worker::telemetry;

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate()?;
    init_logging(config.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;

    runtime.block_on(async_main(config))
}

fn init_logging(format: tee_worker::config::LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    match format {
        tee_worker::config::LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
        tee_worker::config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .json()
                .init();
        }
    }
}

/// `worker_id` always wins when set explicitly. Otherwise, when `data_dir`
/// is configured, the identity persists across restarts in a small file
/// there; without a `data_dir` it's freshly generated every start. Keys
/// never go through this path -- per ยง6, `data_dir` is for the worker id
/// only.
fn resolve_worker_id(config: &Config) -> anyhow::Result<String> {
    if let Some(id) = &config.worker_id {
        return Ok(id.clone());
    }
    let Some(data_dir) = &config.data_dir else {
        return Ok(uuid::Uuid::new_v4().to_string());
    };

    let path = data_dir.join("worker_id");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let fresh = uuid::Uuid::new_v4().to_string();
    std::fs::write(&path, &fresh)
        .with_context(|| format!("persisting worker id to {}", path.display()))?;
    Ok(fresh)
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    let worker_id = resolve_worker_id(&config)?;

    let (sealer, key_ring): (Arc<dyn Sealer>, Option<Arc<KeyRing>>) = match config.sealing_mode {
        SealingMode::Enclave => {
            let ring = Arc::new(KeyRing::new());
            (ring.clone() as Arc<dyn Sealer>, Some(ring))
        }
        SealingMode::Standalone => {
            let sealer = OsKeystoreSealer::load_or_create().context("loading standalone key")?;
            (Arc::new(sealer), None)
        }
    };

    let key_distributor = config
        .setkey_public_key_pem
        .as_deref()
        .map(RsaKeyDistributor::from_public_key_pem)
        .transpose()
        .context("parsing setkey public key")?;

    let queue = Arc::new(PriorityQueue::new(config.fast_queue_size, config.slow_queue_size));
    let cache = Arc::new(ResultCache::new(
        config.result_cache_max_size,
        Duration::from_secs(config.result_cache_max_age_seconds),
    ));
    let classifier = Arc::new(PriorityClassifier::new(
        config.external_worker_id_priority_endpoint.clone(),
    ));
    let health = Arc::new(HealthTracker::new(HashMap::new()));

    // Production handlers (web scraper, social scrapers, transcription)
    // are out of this worker's scope; the embedding deployment registers
    // them here via `JobServer::new`'s handler list.
    let handlers: Vec<Arc<dyn Handler>> = Vec::new();

    let (stats, stats_drain) = telemetry::channel(config.stats_buf_size);

    let job_server = Arc::new(JobServer::new(
        JobServerConfig {
            worker_count: config.max_jobs,
            default_job_timeout: Duration::from_secs(config.job_timeout_seconds),
            requester_whitelist: None,
        },
        handlers,
        queue.clone(),
        cache.clone(),
        classifier.clone(),
        health.clone(),
        stats.clone(),
    ));

    let app_state = Arc::new(AppState {
        server: job_server.clone(),
        sealer,
        key_ring,
        key_distributor,
        worker_id,
        api_key: config.api_key.clone(),
        stats: stats.clone(),
        ready: AtomicBool::new(false),
    });

    let router = api::build_router(app_state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    let shutdown = tokio::signal::ctrl_c().map(|_| ()).shared();

    let dispatch_fut = job_server.clone().run();
    let classifier_fut = classifier.run(Duration::from_secs(config.priority_refresh_interval_seconds));
    let health_fut = health.reconcile(Duration::from_secs(30));
    let cache_sweep_fut = cache.run_sweeper(Duration::from_secs(config.result_cache_max_age_seconds.max(1) / 2));
    let stats_summary_fut = stats.run_summary_log(Duration::from_secs(60));

    app_state.ready.store(true, std::sync::atomic::Ordering::Release);

    let serve_fut = axum::serve(listener, router).with_graceful_shutdown(shutdown.clone());

    tokio::select! {
        result = serve_fut => { result.context("http server failed")?; }
        _ = dispatch_fut => {}
        _ = classifier_fut => {}
        _ = health_fut => {}
        _ = cache_sweep_fut => {}
        _ = stats_summary_fut => {}
        _ = stats_drain => {}
        _ = shutdown.clone() => {}
    }

    queue.close();
    tracing::info!("shutting down");
    Ok(())
}
