//! Integration tests for the HTTP API.
//!
//! These tests spawn a fake Finnhub upstream and a real Axum server on random
//! ports, then use reqwest to hit the server with actual HTTP requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use mcp_finnhub::models::AppConfig;
use mcp_finnhub::server::{self, AppState};
use mcp_finnhub::tools::ToolContext;

const CANDLE_ROWS: usize = 2000;

// ---------------------------------------------------------------------------
// Fake Finnhub upstream
// ---------------------------------------------------------------------------

async fn fake_quote(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
    if q.get("symbol").map(String::as_str) == Some("MISSING") {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Symbol not found" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "c": 189.5, "h": 190.2, "l": 187.1, "o": 188.0,
            "pc": 187.9, "d": 1.6, "dp": 0.85, "t": 1_700_000_000i64
        })),
    )
}

async fn fake_candles() -> Json<Value> {
    let t: Vec<i64> = (0..CANDLE_ROWS as i64).map(|i| 1_600_000_000 + i * 60).collect();
    let prices: Vec<f64> = (0..CANDLE_ROWS).map(|i| 100.0 + i as f64 * 0.01).collect();
    Json(json!({
        "s": "ok",
        "c": prices,
        "h": prices,
        "l": prices,
        "o": prices,
        "v": vec![1000.0; CANDLE_ROWS],
        "t": t,
    }))
}

async fn fake_news() -> Json<Value> {
    Json(json!([
        { "id": 1, "headline": "Markets open higher", "source": "wire" },
        { "id": 2, "headline": "Rates unchanged", "source": "wire" }
    ]))
}

async fn spawn_upstream() -> String {
    let app = Router::new()
        .route("/quote", get(fake_quote))
        .route("/stock/candle", get(fake_candles))
        .route("/news", get(fake_news));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

// ---------------------------------------------------------------------------
// Helper to spawn a test server on a random port
// ---------------------------------------------------------------------------

async fn spawn_test_server() -> (String, TempDir, tokio::task::JoinHandle<()>) {
    let upstream = spawn_upstream().await;
    let tmp = TempDir::new().expect("create temp dir");

    let config = AppConfig {
        finnhub_api_key: "test-key".to_string(),
        base_url: upstream,
        safe_token_limit: 1000,
        max_retries: 0,
        ..AppConfig::default()
    };
    let ctx = ToolContext::new(config, tmp.path().join("data"))
        .await
        .expect("build tool context");

    let state = Arc::new(AppState {
        ctx: Arc::new(ctx),
        start_time: Instant::now(),
    });
    let router = server::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to random port");
    let addr = listener.local_addr().expect("get local addr");
    let base_url = format!("http://{}", addr);

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (base_url, tmp, handle)
}

async fn post_json(url: String, body: Value) -> (StatusCode, Value) {
    let resp = reqwest::Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
    (status, resp.json().await.unwrap())
}

async fn get_json(url: String) -> (StatusCode, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
    (status, resp.json().await.unwrap())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_endpoint_returns_correct_structure() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, json) = get_json(format!("{}/health", base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["uptime_seconds"].is_number());
    assert_eq!(json["running_jobs"], 0);
    assert_eq!(json["safe_token_limit"], 1000);
    assert_eq!(json["version"], "0.1.0");
}

#[tokio::test]
async fn test_list_tools_includes_every_endpoint() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, json) = get_json(format!("{}/api/tools", base_url)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"quote"));
    assert!(names.contains(&"candles"));
    assert!(names.contains(&"market_news"));
}

#[tokio::test]
async fn test_small_quote_returned_inline() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, json) = post_json(
        format!("{}/api/tools/quote", base_url),
        json!({ "symbol": "AAPL" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["c"], 189.5);
    assert!(json.get("file_path").is_none());
}

#[tokio::test]
async fn test_upstream_not_found_maps_to_api_error() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, json) = post_json(
        format!("{}/api/tools/quote", base_url),
        json!({ "symbol": "MISSING" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "API_ERROR");
    assert_eq!(json["error"]["details"]["type"], "NotFoundError");
    assert_eq!(json["error"]["details"]["status_code"], 404);
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Symbol not found"));
}

#[tokio::test]
async fn test_large_candles_spill_to_csv() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, json) = post_json(
        format!("{}/api/tools/candles", base_url),
        json!({
            "symbol": "AAPL",
            "resolution": "1",
            "from_timestamp": 1_600_000_000i64,
            "to_timestamp": 1_700_000_000i64,
            "project": "research",
            "format": "csv"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "truncated");
    assert_eq!(json["format"], "csv");
    assert_eq!(json["record_count"], CANDLE_ROWS);
    assert!(json["token_count"].as_u64().unwrap() > 1000);

    let path = json["file_path"].as_str().unwrap();
    assert!(path.contains("research"));
    let content = std::fs::read_to_string(path).unwrap();
    assert_eq!(content.lines().count(), CANDLE_ROWS + 1);
    assert!(content.lines().next().unwrap().contains("close"));
}

#[tokio::test]
async fn test_unknown_tool_returns_404() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, json) = post_json(format!("{}/api/tools/nope", base_url), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "UNKNOWN_OPERATION");
}

#[tokio::test]
async fn test_missing_parameter_returns_400() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, json) = post_json(format!("{}/api/tools/quote", base_url), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "MISSING_PARAMETER");
    assert_eq!(json["error"]["details"]["parameter"], "symbol");
}

#[tokio::test]
async fn test_submit_job_and_poll_until_completed() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, submitted) = post_json(
        format!("{}/api/jobs", base_url),
        json!({ "operation": "quote", "params": { "symbol": "AAPL" } }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = submitted["job_id"].as_str().unwrap().to_string();

    let mut job = Value::Null;
    for _ in 0..100 {
        let (status, body) = get_json(format!("{}/api/jobs/{}", base_url, job_id)).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "completed" || body["status"] == "failed" {
            job = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(job["status"], "completed", "job did not complete: {}", job);
    assert_eq!(job["progress"], 100);
    assert_eq!(job["result"]["c"], 189.5);

    let (_, listed) = get_json(format!("{}/api/jobs?status=completed", base_url)).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["jobs"][0]["job_id"], job_id.as_str());
}

#[tokio::test]
async fn test_submit_unknown_operation_returns_404() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, json) = post_json(
        format!("{}/api/jobs", base_url),
        json!({ "operation": "does_not_exist" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "UNKNOWN_OPERATION");

    let (_, listed) = get_json(format!("{}/api/jobs", base_url)).await;
    assert_eq!(listed["total"], 0);
}

#[tokio::test]
async fn test_get_unknown_job_returns_404() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let (status, json) =
        get_json(format!("{}/api/jobs/{}", base_url, uuid::Uuid::now_v7())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "JOB_NOT_FOUND");
}

#[tokio::test]
async fn test_submit_job_with_bad_body_returns_400() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/jobs", base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn test_project_create_duplicate_and_list() {
    let (base_url, _tmp, _handle) = spawn_test_server().await;
    let url = format!("{}/api/projects", base_url);

    let (status, created) = post_json(url.clone(), json!({ "project": "alpha" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["project"], "alpha");

    let (status, dup) = post_json(url.clone(), json!({ "project": "alpha" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(dup["error"]["code"], "PROJECT_EXISTS");

    let (status, bad) = post_json(url.clone(), json!({ "project": "../escape" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(bad["error"]["code"], "INVALID_PROJECT_NAME");

    let (status, listed) = get_json(url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total_projects"], 1);
    assert_eq!(listed["projects"][0]["name"], "alpha");
}
