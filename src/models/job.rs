use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::AppError;

/// Input parameters handed to a job's operation.
pub type JobParams = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            other => Err(AppError::Validation(format!(
                "Unknown job status '{}'. Expected one of: pending, running, completed, failed, cancelled",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub operation: String,
    #[serde(default)]
    pub params: JobParams,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Job {
    pub fn new(operation: impl Into<String>, params: JobParams) -> Self {
        Self {
            id: Uuid::now_v7(),
            operation: operation.into(),
            params,
            status: JobStatus::Pending,
            progress: 0,
            message: "Job created".to_string(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata: Map::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Most recent lifecycle timestamp.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.completed_at
            .or(self.started_at)
            .unwrap_or(self.created_at)
    }

    /// Time spent running, measured up to now for jobs still in flight.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }

    /// Move to `next`, stamping `started_at` / `completed_at` the first time
    /// the job enters RUNNING or a terminal state.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }

        let now = Utc::now();
        if next == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self, message: Option<String>) -> Result<(), AppError> {
        self.transition(JobStatus::Running)?;
        self.message = message.unwrap_or_else(|| "Job started".to_string());
        Ok(())
    }

    pub fn complete(&mut self, result: Value, message: Option<String>) -> Result<(), AppError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        self.progress = 100;
        self.message = message.unwrap_or_else(|| "Job completed successfully".to_string());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, message: Option<String>) -> Result<(), AppError> {
        self.transition(JobStatus::Failed)?;
        let error = error.into();
        self.message = message.unwrap_or_else(|| format!("Job failed: {}", error));
        self.error = Some(error);
        Ok(())
    }

    /// Cancel a pending or running job. Returns `false` and leaves the job
    /// untouched when it has already reached a terminal state.
    pub fn cancel(&mut self, message: Option<String>) -> Result<bool, AppError> {
        if self.is_terminal() {
            return Ok(false);
        }
        self.transition(JobStatus::Cancelled)?;
        self.message = message.unwrap_or_else(|| "Job cancelled".to_string());
        Ok(true)
    }

    pub fn update_progress(&mut self, progress: i64, message: Option<String>) {
        self.progress = progress.clamp(0, 100) as u8;
        if let Some(message) = message {
            self.message = message;
        }
    }
}
