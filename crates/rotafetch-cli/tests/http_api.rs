//! HTTP surface tests, driven through the router without a socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use rotafetch::{
    AttemptExecutor, AttemptOutcome, AttemptRequest, AttemptStatus, EngineConfig,
    EscalationController, NoopFallback,
};
use rotafetch_cli::export::JsonExporter;
use rotafetch_cli::{rest, App};

// ─────────────────────── helpers ───────────────────────

/// Serves a fixed status per URL; records the cookie header each time.
struct FixedExecutor {
    statuses: HashMap<String, u16>,
    cookies: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl AttemptExecutor for FixedExecutor {
    async fn execute(&self, request: AttemptRequest<'_>) -> AttemptOutcome {
        let cookie = request
            .credentials
            .and_then(|c| c.merged_header(&Default::default()));
        self.cookies.lock().unwrap().push(cookie);
        let code = self.statuses.get(request.url).copied().unwrap_or(500);
        AttemptOutcome {
            status: AttemptStatus::Http(code),
            elapsed_ms: 3,
            final_url: request.url.to_string(),
            body: if code == 200 {
                "<html><head><title>Jane Doe</title></head></html>".to_string()
            } else {
                String::new()
            },
            set_cookies: Vec::new(),
        }
    }
}

fn app(dir: &tempfile::TempDir, statuses: &[(&str, u16)]) -> (Arc<App>, Arc<FixedExecutor>) {
    let mut cfg = EngineConfig::default();
    cfg.proxy.enabled = false;
    cfg.rate_limit.enabled = false;
    cfg.fetch.max_attempts = 2;
    cfg.fetch.retry_delay_ms = 0;

    let exec = Arc::new(FixedExecutor {
        statuses: statuses
            .iter()
            .map(|(u, c)| (u.to_string(), *c))
            .collect(),
        cookies: Mutex::new(Vec::new()),
    });
    let controller = EscalationController::from_config(&cfg)
        .unwrap()
        .with_executor(exec.clone())
        .with_fallback(Arc::new(NoopFallback));
    let app = App::new(controller, JsonExporter::new(dir.path()));
    (Arc::new(app), exec)
}

async fn call(app: Arc<App>, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = rest::router(app)
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

const JANE: &str = "https://www.example.com/in/jane-doe";
const GONE: &str = "https://www.example.com/in/gone";

// ─────────────────────── endpoints ───────────────────────

#[tokio::test]
async fn health_reports_ok() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(&dir, &[]);
    let (status, body) = call(app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "service": "rotafetch"}));
}

#[tokio::test]
async fn fetch_success_saves_record() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(&dir, &[(JANE, 200)]);

    let (status, body) = call(app, "POST", "/fetch", Some(json!({"url": JANE}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["record"]["title"], "Jane Doe");
    assert_eq!(body["identifier"], "jane-doe");
    assert!(dir.path().join("jane-doe.json").exists());
}

#[tokio::test]
async fn fetch_failure_is_bad_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(&dir, &[(GONE, 404)]);

    let (status, body) = call(app, "POST", "/fetch", Some(json!({"url": GONE}))).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["status"], "error");
    assert_eq!(body["reason"]["kind"], "not_found");
    assert_eq!(body["attempts"], 1);
    assert_eq!(body["last_status"], 404);
}

#[tokio::test]
async fn fetch_without_url_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let (app, exec) = app(&dir, &[]);

    let (status, body) = call(app, "POST", "/fetch", Some(json!({"link": JANE}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(exec.cookies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn fetch_applies_request_cookie() {
    let dir = tempfile::tempdir().unwrap();
    let (app, exec) = app(&dir, &[(JANE, 200)]);

    let (status, _) = call(
        app,
        "POST",
        "/fetch",
        Some(json!({"url": JANE, "cookie": "li_at=secret"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        exec.cookies.lock().unwrap().as_slice(),
        &[Some("li_at=secret".to_string())]
    );
}

#[tokio::test]
async fn batch_reports_each_item() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(&dir, &[(JANE, 200), (GONE, 404)]);

    let (status, body) = call(
        app,
        "POST",
        "/fetch/batch",
        Some(json!({"urls": [JANE, 42, "not a url", GONE]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["total"], 4);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0]["status"], "success");
    assert_eq!(results[1]["error"], "url must be a string");
    assert_eq!(results[2]["reason"]["kind"], "invalid_url");
    assert_eq!(results[3]["reason"]["kind"], "not_found");
}

#[tokio::test]
async fn batch_requires_array() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(&dir, &[]);

    let (status, _) = call(
        app.clone(),
        "POST",
        "/fetch/batch",
        Some(json!({"urls": JANE})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(app, "POST", "/fetch/batch", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_expose_pools() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app(&dir, &[(JANE, 200)]);
    call(app.clone(), "POST", "/fetch", Some(json!({"url": JANE}))).await;

    let (status, body) = call(app, "GET", "/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["proxies"]["enabled"], false);
    assert!(body["identities"]["total"].as_u64().unwrap() >= 1);
}
