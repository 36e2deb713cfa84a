pub mod jobs;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Job, JobParams, JobStatus};

pub use jobs::FsJobStore;

/// Fields `update` may change. `None` leaves the field as stored.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<i64>,
    pub message: Option<String>,
}

/// Owner of job persistence and the sanctioned status transitions.
///
/// Every returned [`Job`] is a snapshot; mutate through the store only.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, operation: &str, params: JobParams) -> Result<Job>;
    /// Missing and malformed records both read as `None`.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;
    async fn save(&self, job: &Job) -> Result<()>;
    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<Option<Job>>;
    async fn mark_complete(
        &self,
        id: Uuid,
        result: Value,
        message: Option<String>,
    ) -> Result<Option<Job>>;
    async fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        message: Option<String>,
    ) -> Result<Option<Job>>;
    /// No-op returning the stored snapshot when the job is already terminal.
    async fn mark_cancelled(&self, id: Uuid, message: Option<String>) -> Result<Option<Job>>;
    /// Newest first.
    async fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> Result<Vec<Job>>;
    async fn delete(&self, id: Uuid) -> Result<bool>;
    /// Delete terminal jobs completed more than `age` ago.
    async fn cleanup_older_than(&self, age: chrono::Duration) -> Result<usize>;
}
