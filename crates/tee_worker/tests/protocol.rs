//! End-to-end coverage of the generate/add/status/result protocol against
//! an in-process server, using the demo handlers as stand-ins for the
//! out-of-scope production job types.

use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tee_demo_handlers::{EchoHandler, WebHandler};
use tee_worker::api::{build_router, AppState};
use tee_worker::cache::ResultCache;
use tee_worker::dispatch::{Handler, JobServer, JobServerConfig};
use tee_worker::health::HealthTracker;
use tee_worker::priority::PriorityClassifier;
use tee_worker::queue::PriorityQueue;
use tee_worker::sealing::{KeyRing, Sealer};
use tee_worker::telemetry;

struct Harness {
    base_url: String,
    sealer: Arc<KeyRing>,
    client: reqwest::Client,
    _server: tokio::task::JoinHandle<()>,
}

async fn start_harness(worker_count: usize) -> Harness {
    let sealer = Arc::new(KeyRing::new());

    let queue = Arc::new(PriorityQueue::new(16, 32));
    let cache = Arc::new(ResultCache::new(100, Duration::from_secs(60)));
    let classifier = Arc::new(PriorityClassifier::new(None));
    let health = Arc::new(HealthTracker::new(HashMap::new()));

    let handlers: Vec<Arc<dyn Handler>> = vec![
        Arc::new(EchoHandler::default()),
        Arc::new(WebHandler::default()),
    ];

    let (stats, stats_drain) = telemetry::channel(64);
    tokio::spawn(stats_drain);

    let server = Arc::new(JobServer::new(
        JobServerConfig {
            worker_count,
            default_job_timeout: Duration::from_secs(5),
            requester_whitelist: None,
        },
        handlers,
        queue.clone(),
        cache,
        classifier,
        health,
        stats.clone(),
    ));

    let app_state = Arc::new(AppState {
        server: server.clone(),
        sealer: sealer.clone() as Arc<dyn Sealer>,
        key_ring: Some(sealer.clone()),
        key_distributor: None,
        worker_id: "test-worker".to_string(),
        api_key: None,
        stats,
        ready: AtomicBool::new(true),
    });

    let router = build_router(app_state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(server.run());

    let join = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Harness {
        base_url: format!("http://{addr}"),
        sealer,
        client: reqwest::Client::new(),
        _server: join,
    }
}

impl Harness {
    async fn generate_and_add(&self, job: serde_json::Value) -> uuid::Uuid {
        let generated: serde_json::Value = self
            .client
            .post(format!("{}/job/generate", self.base_url))
            .json(&job)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let added: serde_json::Value = self
            .client
            .post(format!("{}/job/add", self.base_url))
            .json(&json!({ "encrypted_job": generated["encrypted_job"] }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        serde_json::from_value(added["uid"].clone()).unwrap()
    }

    async fn poll_until_done(&self, uid: uuid::Uuid, nonce: &str) -> Result<String, (u16, String)> {
        for _ in 0..200 {
            let resp = self
                .client
                .get(format!("{}/job/status/{uid}", self.base_url))
                .send()
                .await
                .unwrap();
            let status = resp.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }
            if status.is_success() {
                use base64::Engine;
                let sealed: String = resp.json().await.unwrap();
                let plaintext = self.sealer.unseal(nonce.as_bytes(), &sealed).unwrap();
                let result: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
                let payload_b64 = result["payload"].as_str().unwrap_or_default();
                let payload = base64::engine::general_purpose::STANDARD
                    .decode(payload_b64)
                    .unwrap_or_default();
                return Ok(String::from_utf8(payload).unwrap_or_default());
            }
            let body: serde_json::Value = resp.json().await.unwrap();
            return Err((status.as_u16(), body["error"].as_str().unwrap_or_default().to_string()));
        }
        panic!("result never became ready");
    }
}

#[tokio::test]
async fn s1_happy_path_echo() {
    let harness = start_harness(2).await;
    let job = json!({
        "type": "echo",
        "arguments": { "message": "hello" },
        "nonce": "s1",
        "identity": "requester-a",
    });
    let uid = harness.generate_and_add(job).await;
    let payload = harness
        .poll_until_done(uid, "s1")
        .await
        .expect("echo job should succeed");
    assert!(payload.contains("hello"));
}

#[tokio::test]
async fn s2_unknown_job_type() {
    let harness = start_harness(1).await;
    let job = json!({
        "type": "does-not-exist",
        "arguments": {},
        "nonce": "s2",
        "identity": "requester-a",
    });
    let uid = harness.generate_and_add(job).await;
    let (status, error) = harness.poll_until_done(uid, "s2").await.unwrap_err();
    assert_eq!(status, 500);
    assert!(error.contains("unknown job type"));
}

#[tokio::test]
async fn s3_invalid_url() {
    let harness = start_harness(1).await;
    let job = json!({
        "type": "web",
        "arguments": { "url": "google" },
        "nonce": "s3",
        "identity": "requester-a",
    });
    let uid = harness.generate_and_add(job).await;
    let (status, error) = harness.poll_until_done(uid, "s3").await.unwrap_err();
    assert_eq!(status, 500);
    assert!(error.contains("URL must include a scheme"));
}

#[tokio::test]
async fn s5_duplicate_nonce_is_rejected() {
    let harness = start_harness(1).await;
    let job = json!({
        "type": "echo",
        "arguments": { "message": "hi" },
        "nonce": "s5",
        "identity": "requester-a",
    });
    let _ = harness.generate_and_add(job.clone()).await;

    let generated: serde_json::Value = harness
        .client
        .post(format!("{}/job/generate", harness.base_url))
        .json(&job)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let resp = harness
        .client
        .post(format!("{}/job/add", harness.base_url))
        .json(&json!({ "encrypted_job": generated["encrypted_job"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("already executed"));
}
