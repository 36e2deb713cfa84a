use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Job, JobParams, JobStatus};
use crate::storage::{JobStore, JobUpdate};

/// One `<id>.json` file per job inside a dedicated directory.
pub struct FsJobStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FsJobStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create jobs directory {:?}", dir))?;

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Atomically write one job record.
    /// Writes to a .tmp file first, then renames over the record; the .tmp
    /// file is removed if either step fails.
    async fn persist(&self, job: &Job) -> Result<()> {
        let path = self.job_path(job.id);
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(job).context("Failed to serialize job")?;

        let written: Result<()> = async {
            tokio::fs::write(&tmp_path, json.as_bytes())
                .await
                .context("Failed to write temporary job file")?;
            tokio::fs::rename(&tmp_path, &path)
                .await
                .context("Failed to rename temporary job file")?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            tracing::error!("Failed to persist job {}: {:#}", job.id, e);
            if let Err(cleanup_err) = tokio::fs::remove_file(&tmp_path).await {
                if cleanup_err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {:?}: {}", tmp_path, cleanup_err);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn load(&self, path: &Path) -> Option<Job> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read job file {:?}: {}", path, e);
                return None;
            }
        };
        match serde_json::from_str::<Job>(&content) {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!("Skipping malformed job file {:?}: {}", path, e);
                None
            }
        }
    }

    async fn load_all(&self) -> Result<Vec<Job>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .context("Failed to read jobs directory")?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(job) = self.load(&path).await {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Load, apply `change`, persist. `None` when the job is unknown.
    async fn modify<F>(&self, id: Uuid, change: F) -> Result<Option<Job>>
    where
        F: FnOnce(&mut Job) -> Result<bool> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let Some(mut job) = self.load(&self.job_path(id)).await else {
            return Ok(None);
        };
        if change(&mut job)? {
            self.persist(&job).await?;
        }
        Ok(Some(job))
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn create(&self, operation: &str, params: JobParams) -> Result<Job> {
        let job = Job::new(operation, params);
        let _guard = self.write_lock.lock().await;
        self.persist(&job).await?;
        tracing::info!("Created job {} for '{}'", job.id, job.operation);
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.load(&self.job_path(id)).await)
    }

    async fn save(&self, job: &Job) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persist(job).await
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<Option<Job>> {
        self.modify(id, |job| {
            if let Some(status) = update.status {
                job.transition(status)?;
            }
            if let Some(progress) = update.progress {
                job.update_progress(progress, None);
            }
            if let Some(message) = update.message {
                job.message = message;
            }
            Ok(true)
        })
        .await
    }

    async fn mark_complete(
        &self,
        id: Uuid,
        result: Value,
        message: Option<String>,
    ) -> Result<Option<Job>> {
        self.modify(id, |job| {
            job.complete(result, message)?;
            Ok(true)
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        message: Option<String>,
    ) -> Result<Option<Job>> {
        self.modify(id, |job| {
            job.fail(error, message)?;
            Ok(true)
        })
        .await
    }

    async fn mark_cancelled(&self, id: Uuid, message: Option<String>) -> Result<Option<Job>> {
        self.modify(id, |job| Ok(job.cancel(message)?)).await
    }

    async fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> Result<Vec<Job>> {
        let mut jobs = self.load_all().await?;
        if let Some(status) = status {
            jobs.retain(|j| j.status == status);
        }
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.job_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete job {}", id)),
        }
    }

    async fn cleanup_older_than(&self, age: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - age;
        let expired: Vec<Uuid> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|job| job.is_terminal())
            .filter(|job| job.completed_at.is_some_and(|done| done < cutoff))
            .map(|job| job.id)
            .collect();

        let mut removed = 0;
        for id in expired {
            if self.delete(id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!("Cleaned up {} expired job(s)", removed);
        }
        Ok(removed)
    }
}
