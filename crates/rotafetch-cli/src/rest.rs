//! HTTP surface.
//!
//! `POST /fetch` and `POST /fetch/batch` run the engine and export records;
//! `GET /stats` exposes proxy and identity diagnostics.

use crate::app::App;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rotafetch::Credentials;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Build the axum Router with all endpoints.
pub fn router(state: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/fetch", post(handle_fetch))
        .route("/fetch/batch", post(handle_batch))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(state)
}

/// Serve on `addr` until the process is stopped.
pub async fn start(addr: &str, state: Arc<App>) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "status": "error", "error": message.into() })),
    )
        .into_response()
}

fn request_credentials(body: &Value) -> Option<Credentials> {
    body.get("cookie")
        .and_then(Value::as_str)
        .map(Credentials::parse)
        .filter(|c| !c.is_empty())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "rotafetch" }))
}

async fn handle_fetch(State(app): State<Arc<App>>, Json(body): Json<Value>) -> Response {
    let Some(url) = body.get("url").and_then(Value::as_str) else {
        tracing::warn!("fetch request without url");
        return error(StatusCode::BAD_REQUEST, "missing required field: url");
    };
    tracing::info!("fetch requested: {url}");

    let creds = request_credentials(&body);
    match app.process(url, creds.as_ref(), true).await {
        Ok(processed) if processed.is_success() => {
            (StatusCode::OK, Json(processed.to_json(true))).into_response()
        }
        Ok(processed) => (StatusCode::BAD_GATEWAY, Json(processed.to_json(false))).into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }
}

async fn handle_batch(State(app): State<Arc<App>>, Json(body): Json<Value>) -> Response {
    let Some(urls) = body.get("urls") else {
        return error(StatusCode::BAD_REQUEST, "missing required field: urls");
    };
    let Some(urls) = urls.as_array() else {
        return error(StatusCode::BAD_REQUEST, "urls must be an array");
    };
    tracing::info!("batch of {} requested", urls.len());

    let targets: Vec<String> = urls
        .iter()
        .filter_map(|u| u.as_str().map(str::to_string))
        .collect();
    let creds = request_credentials(&body);
    let mut processed = app
        .process_batch(&targets, creds.as_ref(), true)
        .await
        .into_iter();

    let results: Vec<Value> = urls
        .iter()
        .map(|u| match u.as_str() {
            None => json!({ "url": u, "status": "error", "error": "url must be a string" }),
            Some(url) => match processed.next() {
                Some(Ok(p)) => p.to_json(false),
                Some(Err(e)) => json!({ "url": url, "status": "error", "error": format!("{e:#}") }),
                None => json!({ "url": url, "status": "error", "error": "not processed" }),
            },
        })
        .collect();

    Json(json!({
        "status": "completed",
        "total": urls.len(),
        "results": results,
    }))
    .into_response()
}

async fn handle_stats(State(app): State<Arc<App>>) -> Json<Value> {
    Json(json!(app.controller.stats()))
}
