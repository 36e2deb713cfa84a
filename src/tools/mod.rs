//! The named operations offered to a calling agent.
//!
//! [`ToolContext`] wires the client, router, job store and worker together
//! and converts every failure into a structured [`ToolError`] payload.

pub mod handlers;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::endpoints::{self, ParamError};
use crate::api::{ClientError, FinnhubClient, SchemaError};
use crate::daemon::worker::BackgroundWorker;
use crate::errors::AppError;
use crate::models::{AppConfig, Job, JobParams, JobStatus};
use crate::output::{PathError, PathResolver, ResultRouter, TokenEstimator};
use crate::storage::{FsJobStore, JobStore};

/// Folders created inside every new project.
pub const PROJECT_SUBDIRECTORIES: [&str; 7] = [
    "candles",
    "quotes",
    "news",
    "fundamentals",
    "technical",
    "jobs",
    "exports",
];

const PROJECT_METADATA_FILE: &str = ".project.json";

/// Structured failure returned to tool callers as
/// `{"error": {"code", "message", "details"}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolError {
    pub code: &'static str,
    pub message: String,
    pub details: Value,
}

impl ToolError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Value::Object(Map::new()),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn to_value(&self) -> Value {
        json!({ "error": self })
    }

    /// Classify an error raised anywhere below the tool layer.
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(e) = find_cause::<ParamError>(err) {
            return match e {
                ParamError::Missing(name) => Self::new("MISSING_PARAMETER", e.to_string())
                    .with_details(json!({ "parameter": name })),
                ParamError::Invalid { name, .. } => Self::new("INVALID_PARAMETER", e.to_string())
                    .with_details(json!({ "parameter": name })),
            };
        }
        if let Some(e) = find_cause::<ClientError>(err) {
            let mut details = json!({ "type": e.kind_name() });
            if let Some(api) = e.as_api() {
                details["status_code"] = json!(api.status);
                details["url"] = json!(api.url);
            }
            return Self::new("API_ERROR", e.to_string()).with_details(details);
        }
        if let Some(e) = find_cause::<SchemaError>(err) {
            return Self::new("API_ERROR", e.to_string())
                .with_details(json!({ "type": "SchemaValidationError" }));
        }
        if let Some(e) = find_cause::<PathError>(err) {
            return Self::new("INVALID_PROJECT_NAME", e.to_string());
        }

        match find_cause::<AppError>(err) {
            Some(AppError::NotFound(msg)) => Self::new("JOB_NOT_FOUND", msg.clone()),
            Some(AppError::UnknownOperation(msg)) => Self::new("UNKNOWN_OPERATION", msg.clone()),
            Some(AppError::Validation(msg)) => Self::new("INVALID_PARAMETER", msg.clone()),
            Some(
                AppError::Conflict(msg)
                | AppError::InvalidTransition(msg)
                | AppError::ShuttingDown(msg),
            ) => Self::new("JOB_REJECTED", msg.clone()).with_details(json!({ "stage": "validation" })),
            _ => Self::new("INTERNAL_ERROR", format!("{:#}", err)),
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        ToolError::from_error(&err)
    }
}

fn find_cause<T: std::error::Error + Send + Sync + 'static>(err: &anyhow::Error) -> Option<&T> {
    err.downcast_ref::<T>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<T>()))
}

/// Everything a tool call needs, constructed once per process.
pub struct ToolContext {
    config: Arc<AppConfig>,
    client: Arc<FinnhubClient>,
    resolver: PathResolver,
    router: ResultRouter,
    store: Arc<dyn JobStore>,
    worker: Arc<BackgroundWorker>,
}

impl ToolContext {
    pub async fn new(config: AppConfig, storage_root: PathBuf) -> Result<Self> {
        let client = FinnhubClient::new(&config).context("Failed to build Finnhub client")?;
        Self::with_client(config, storage_root, Arc::new(client)).await
    }

    pub async fn with_client(
        config: AppConfig,
        storage_root: PathBuf,
        client: Arc<FinnhubClient>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&storage_root)
            .await
            .with_context(|| format!("Failed to create storage root {}", storage_root.display()))?;

        let resolver = PathResolver::new(&storage_root);
        let router = ResultRouter::new(
            TokenEstimator::new(),
            resolver.clone(),
            config.safe_token_limit,
        );
        let store: Arc<dyn JobStore> = Arc::new(FsJobStore::new(storage_root.join("jobs")).await?);
        let worker = Arc::new(BackgroundWorker::new(
            Arc::clone(&store),
            config.max_concurrent_jobs,
            config.job_timeout(),
        ));
        handlers::register_endpoints(&worker, &client, &router).await;

        Ok(Self {
            config: Arc::new(config),
            client,
            resolver,
            router,
            store,
            worker,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage_root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn worker(&self) -> &Arc<BackgroundWorker> {
        &self.worker
    }

    pub fn router(&self) -> &ResultRouter {
        &self.router
    }

    /// Call an endpoint and route its result inline or to a file.
    pub async fn run_tool(&self, name: &str, params: JobParams) -> Result<Value, ToolError> {
        let endpoint = endpoints::find(name).ok_or_else(|| unknown_tool(name))?;
        let (project, format) = handlers::routing_options(&params).map_err(anyhow::Error::from)?;

        let data = endpoint.call(&self.client, &params).await?;
        let label = handlers::export_label(name, &params);
        let routed = self
            .router
            .route(data, project.as_deref(), &label, format)
            .await?;
        Ok(routed)
    }

    /// Create a job for `operation` and start it in the background.
    ///
    /// Unknown operations and bad parameters are rejected before a job record
    /// is created.
    pub async fn submit_job(
        &self,
        operation: &str,
        params: JobParams,
        timeout: Option<Duration>,
    ) -> Result<Value, ToolError> {
        if !self
            .worker
            .registered_operations()
            .await
            .iter()
            .any(|op| op == operation)
        {
            return Err(unknown_tool(operation));
        }
        if let Some(endpoint) = endpoints::find(operation) {
            endpoint.query(&params).map_err(anyhow::Error::from)?;
            handlers::routing_options(&params).map_err(anyhow::Error::from)?;
        }

        let job = self.store.create(operation, params).await?;
        if let Err(e) = self.worker.submit(job.id, timeout).await {
            tracing::warn!("Job {} rejected by worker: {:#}", job.id, e);
            if let Err(cleanup) = self.store.delete(job.id).await {
                tracing::error!("Failed to remove rejected job {}: {:#}", job.id, cleanup);
            }
            return Err(ToolError::from_error(&e));
        }

        Ok(json!({
            "job_id": job.id,
            "operation": job.operation,
            "status": job.status,
            "created_at": job.created_at,
            "message": format!("Job submitted. Poll job_status with job_id {} for progress.", job.id),
        }))
    }

    pub async fn job_status(&self, job_id: &str) -> Result<Value, ToolError> {
        let id = parse_job_id(job_id)?;
        let job = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| job_not_found(job_id))?;
        Ok(job_view(&job, true))
    }

    pub async fn job_list(
        &self,
        status: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Value, ToolError> {
        let status = status
            .map(|s| s.parse::<JobStatus>())
            .transpose()
            .map_err(|e| {
                ToolError::new("INVALID_PARAMETER", e.to_string())
                    .with_details(json!({ "parameter": "status" }))
            })?;

        let jobs = self.store.list(status, limit).await?;
        let views: Vec<Value> = jobs.iter().map(|job| job_view(job, false)).collect();
        Ok(json!({
            "jobs": views,
            "total": views.len(),
        }))
    }

    /// Cancel a running or pending job. Terminal jobs are returned unchanged.
    pub async fn job_cancel(&self, job_id: &str) -> Result<Value, ToolError> {
        let id = parse_job_id(job_id)?;

        let was_running = self.worker.cancel(id).await;
        let job = if was_running {
            self.store.get(id).await?
        } else {
            self.store.mark_cancelled(id, None).await?
        }
        .ok_or_else(|| job_not_found(job_id))?;

        let mut view = job_view(&job, false);
        view["cancelled"] = json!(job.status == JobStatus::Cancelled);
        view["was_running"] = json!(was_running);
        Ok(view)
    }

    pub async fn project_create(&self, name: &str) -> Result<Value, ToolError> {
        let name = name.trim();
        if !is_valid_project_name(name) {
            return Err(ToolError::new(
                "INVALID_PROJECT_NAME",
                "Project names must use letters, numbers, hyphens, or underscores only.",
            )
            .with_details(json!({ "project": name })));
        }

        let project_dir = self.resolver.project_path(name).map_err(anyhow::Error::from)?;
        if tokio::fs::try_exists(&project_dir).await.unwrap_or(false) {
            return Err(
                ToolError::new("PROJECT_EXISTS", format!("Project '{}' already exists.", name))
                    .with_details(json!({ "project": name })),
            );
        }

        for subdir in PROJECT_SUBDIRECTORIES {
            tokio::fs::create_dir_all(project_dir.join(subdir))
                .await
                .with_context(|| format!("Failed to create {}/{}", name, subdir))?;
        }

        let created_at = Utc::now();
        let metadata = json!({
            "project": name,
            "created_at": created_at,
            "subdirectories": PROJECT_SUBDIRECTORIES,
        });
        let metadata_path = project_dir.join(PROJECT_METADATA_FILE);
        let content = serde_json::to_string_pretty(&metadata).map_err(anyhow::Error::from)?;
        tokio::fs::write(&metadata_path, content)
            .await
            .with_context(|| format!("Failed to write {}", metadata_path.display()))?;

        tracing::info!("Created project '{}' at {}", name, project_dir.display());

        Ok(json!({
            "project": name,
            "path": project_dir,
            "metadata_file": metadata_path,
            "subdirectories": PROJECT_SUBDIRECTORIES,
            "created_at": created_at,
        }))
    }

    /// Projects with readable metadata, newest first.
    pub async fn project_list(&self) -> Result<Value, ToolError> {
        let resolver = self.resolver.clone();
        let projects = tokio::task::spawn_blocking(move || scan_projects(&resolver))
            .await
            .map_err(|e| ToolError::new("INTERNAL_ERROR", format!("Project scan failed: {}", e)))??;

        Ok(json!({
            "total_projects": projects.len(),
            "projects": projects,
        }))
    }

    /// Delete terminal jobs older than the configured retention.
    pub async fn cleanup_jobs(&self) -> Result<usize> {
        let removed = self
            .store
            .cleanup_older_than(self.config.job_retention())
            .await?;
        if removed > 0 {
            tracing::info!("Removed {} expired job(s)", removed);
        }
        Ok(removed)
    }
}

fn unknown_tool(name: &str) -> ToolError {
    let supported = endpoints::names();
    ToolError::new(
        "UNKNOWN_OPERATION",
        format!("Unknown operation: {}. Supported: {}", name, supported.join(", ")),
    )
    .with_details(json!({ "operation": name, "supported": supported }))
}

fn job_not_found(job_id: &str) -> ToolError {
    ToolError::new("JOB_NOT_FOUND", format!("Job not found: {}", job_id))
        .with_details(json!({ "job_id": job_id }))
}

fn parse_job_id(job_id: &str) -> Result<Uuid, ToolError> {
    let job_id = job_id.trim();
    if job_id.is_empty() {
        return Err(ToolError::new("MISSING_PARAMETER", "Missing required parameter: job_id")
            .with_details(json!({ "parameter": "job_id" })));
    }
    Uuid::parse_str(job_id).map_err(|_| job_not_found(job_id))
}

fn job_view(job: &Job, include_result: bool) -> Value {
    let mut view = json!({
        "job_id": job.id,
        "operation": job.operation,
        "status": job.status,
        "progress": job.progress,
        "message": job.message,
        "created_at": job.created_at,
        "started_at": job.started_at,
        "completed_at": job.completed_at,
        "updated_at": job.updated_at(),
    });

    if let Some(duration) = job.duration() {
        view["duration_seconds"] = json!(duration.num_milliseconds() as f64 / 1000.0);
    }
    if include_result {
        if let Some(result) = &job.result {
            view["result"] = result.clone();
        }
    }
    if let Some(error) = &job.error {
        view["error"] = json!(error);
        view["stage"] = json!("execution");
    }
    if !job.metadata.is_empty() {
        view["metadata"] = Value::Object(job.metadata.clone());
    }
    view
}

fn is_valid_project_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn scan_projects(resolver: &PathResolver) -> Result<Vec<Value>, ToolError> {
    let names = resolver.list_projects().with_context(|| {
        format!("Failed to read storage root {}", resolver.root().display())
    })?;

    let mut projects = Vec::new();
    for dir_name in names {
        let project_dir = resolver.root().join(&dir_name);
        let metadata_path = project_dir.join(PROJECT_METADATA_FILE);
        if !metadata_path.exists() {
            continue;
        }
        let metadata: Value = match std::fs::read_to_string(&metadata_path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
        {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Skipping project with unreadable metadata {:?}: {}", metadata_path, e);
                continue;
            }
        };

        let subdirectories: Vec<String> = metadata["subdirectories"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut file_counts = Map::new();
        let mut total_files = 0;
        for subdir in &subdirectories {
            let (count, _) = dir_stats(&project_dir.join(subdir));
            file_counts.insert(subdir.clone(), json!(count));
            total_files += count;
        }
        let (_, total_size_bytes) = dir_stats(&project_dir);

        let name = metadata["project"]
            .as_str()
            .map(String::from)
            .unwrap_or(dir_name);

        projects.push(json!({
            "name": name,
            "path": project_dir,
            "created_at": metadata.get("created_at").cloned().unwrap_or(Value::Null),
            "subdirectories": subdirectories,
            "file_counts": file_counts,
            "total_files": total_files,
            "total_size_bytes": total_size_bytes,
        }));
    }

    projects.sort_by(|a, b| {
        let a = a["created_at"].as_str().unwrap_or("");
        let b = b["created_at"].as_str().unwrap_or("");
        b.cmp(a)
    });
    Ok(projects)
}

/// Recursive file count and byte size; unreadable entries are skipped.
fn dir_stats(dir: &Path) -> (usize, u64) {
    let mut files = 0;
    let mut bytes = 0;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                files += 1;
                bytes += meta.len();
            }
        }
    }
    (files, bytes)
}
