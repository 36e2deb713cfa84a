use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::AppState;
use crate::api::endpoints::ENDPOINTS;
use crate::tools::ToolError;

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

fn status_for(code: &str) -> StatusCode {
    match code {
        "MISSING_PARAMETER" | "INVALID_PARAMETER" | "INVALID_PROJECT_NAME" => StatusCode::BAD_REQUEST,
        "UNKNOWN_OPERATION" | "JOB_NOT_FOUND" => StatusCode::NOT_FOUND,
        "PROJECT_EXISTS" | "JOB_REJECTED" => StatusCode::CONFLICT,
        "API_ERROR" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: ToolError) -> Response {
    let status = status_for(err.code);
    if status.is_server_error() {
        tracing::warn!("Request failed: {}", err);
    }
    (status, Json(err.to_value())).into_response()
}

fn respond(status: StatusCode, result: Result<Value, ToolError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(err) => error_response(err),
    }
}

/// Parse an optional JSON object body; an empty body is an empty object.
fn parse_object(body: &[u8]) -> Result<Map<String, Value>, ToolError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ToolError::new("INVALID_PARAMETER", "Request body must be a JSON object")),
        Err(e) => Err(ToolError::new(
            "INVALID_PARAMETER",
            format!("Invalid JSON body: {}", e),
        )),
    }
}

// ---------------------------------------------------------------------------
// Query and body params
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct ListJobsParams {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub operation: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub project: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/tools
pub async fn list_tools() -> impl IntoResponse {
    let tools: Vec<Value> = ENDPOINTS
        .iter()
        .map(|endpoint| {
            let params: Vec<Value> = endpoint
                .params
                .iter()
                .map(|p| {
                    json!({
                        "name": p.name,
                        "required": p.required,
                        "default": p.default,
                    })
                })
                .collect();
            json!({
                "name": endpoint.name,
                "description": endpoint.description,
                "params": params,
            })
        })
        .collect();

    (StatusCode::OK, Json(json!({ "tools": tools })))
}

/// POST /api/tools/{name}
pub async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let params = match parse_object(&body) {
        Ok(params) => params,
        Err(err) => return error_response(err),
    };
    respond(StatusCode::OK, state.ctx.run_tool(&name, params).await)
}

/// GET /api/jobs
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Response {
    respond(
        StatusCode::OK,
        state
            .ctx
            .job_list(params.status.as_deref(), params.limit)
            .await,
    )
}

/// POST /api/jobs
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Response {
    let request: SubmitJobRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(ToolError::new(
                "INVALID_PARAMETER",
                format!("Invalid job request: {}", e),
            ))
        }
    };

    let timeout = match request.timeout_secs {
        None => None,
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(Duration::from_secs_f64(secs)),
        Some(_) => {
            return error_response(
                ToolError::new("INVALID_PARAMETER", "timeout_secs must be a positive number")
                    .with_details(json!({ "parameter": "timeout_secs" })),
            )
        }
    };

    respond(
        StatusCode::ACCEPTED,
        state
            .ctx
            .submit_job(&request.operation, request.params, timeout)
            .await,
    )
}

/// GET /api/jobs/{id}
pub async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    respond(StatusCode::OK, state.ctx.job_status(&id).await)
}

/// POST /api/jobs/{id}/cancel
pub async fn cancel_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    respond(StatusCode::OK, state.ctx.job_cancel(&id).await)
}

/// GET /api/projects
pub async fn list_projects(State(state): State<Arc<AppState>>) -> Response {
    respond(StatusCode::OK, state.ctx.project_list().await)
}

/// POST /api/projects
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Response {
    let request: CreateProjectRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => {
            return error_response(
                ToolError::new("MISSING_PARAMETER", "Missing required parameter: project")
                    .with_details(json!({ "parameter": "project" })),
            )
        }
    };
    respond(
        StatusCode::CREATED,
        state.ctx.project_create(&request.project).await,
    )
}
