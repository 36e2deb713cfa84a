use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::{ApiError, ClientError, ParamError, SchemaError};
use crate::errors::AppError;
use crate::models::{Job, JobParams, JobStatus};
use crate::storage::{JobStore, JobUpdate};

/// An operation the worker can run on behalf of a job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn invoke(&self, params: JobParams) -> Result<Value>;
}

/// Adapts an async closure into a [`JobHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobParams) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn invoke(&self, params: JobParams) -> Result<Value> {
        (self.0)(params).await
    }
}

/// Handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub join_handle: JoinHandle<Result<Job>>,
}

impl JobHandle {
    /// Wait for the job's execution to finish.
    pub async fn join(self) -> Result<Job> {
        self.join_handle
            .await
            .map_err(|e| AppError::Internal(format!("job task {} failed: {}", self.job_id, e)))?
    }
}

struct InFlight {
    cancel_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

type FlightTable = Arc<Mutex<HashMap<Uuid, InFlight>>>;

fn lock_table(table: &Mutex<HashMap<Uuid, InFlight>>) -> MutexGuard<'_, HashMap<Uuid, InFlight>> {
    table.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("In-flight table mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Removes the in-flight entry and signals waiters when an execution ends,
/// including when its task is aborted or panics.
struct FlightGuard {
    id: Uuid,
    table: FlightTable,
    done_tx: watch::Sender<bool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        lock_table(&self.table).remove(&self.id);
        self.done_tx.send_replace(true);
    }
}

/// Armed for the span of one execution. If the execution future is dropped
/// before a terminal state is written, the job is marked CANCELLED on
/// a detached task, and the in-flight entry is held until that write lands.
struct ExecutionGuard {
    id: Uuid,
    store: Arc<dyn JobStore>,
    flight: Option<FlightGuard>,
    armed: bool,
}

impl ExecutionGuard {
    fn arm(id: Uuid, store: Arc<dyn JobStore>, flight: FlightGuard) -> Self {
        Self {
            id,
            store,
            flight: Some(flight),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        let flight = self.flight.take();
        if !self.armed {
            return;
        }

        let id = self.id;
        let store = Arc::clone(&self.store);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!("Execution of job {} was interrupted, marking cancelled", id);
                runtime.spawn(async move {
                    let message = Some("Job cancelled: execution was interrupted".to_string());
                    if let Err(e) = store.mark_cancelled(id, message).await {
                        tracing::error!("Failed to record cancellation of job {}: {:#}", id, e);
                    }
                    drop(flight);
                });
            }
            Err(_) => {
                tracing::error!("Job {} interrupted outside a runtime, left RUNNING", id);
            }
        }
    }
}

enum Outcome {
    Finished(Result<Value>),
    TimedOut,
    Cancelled,
}

/// Bounded-concurrency executor for registered job operations.
pub struct BackgroundWorker {
    store: Arc<dyn JobStore>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    gate: Arc<Semaphore>,
    max_workers: usize,
    default_timeout: Duration,
    in_flight: FlightTable,
    shutting_down: AtomicBool,
}

impl BackgroundWorker {
    pub fn new(store: Arc<dyn JobStore>, max_workers: usize, default_timeout: Duration) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            store,
            handlers: RwLock::new(HashMap::new()),
            gate: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            default_timeout,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub async fn register(&self, operation: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let operation = operation.into();
        tracing::debug!("Registered handler for '{}'", operation);
        self.handlers.write().await.insert(operation, handler);
    }

    pub async fn register_fn<F, Fut>(&self, operation: impl Into<String>, f: F)
    where
        F: Fn(JobParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(operation, Arc::new(FnHandler(f))).await;
    }

    /// Returns whether a handler was registered under `operation`.
    pub async fn unregister(&self, operation: &str) -> bool {
        self.handlers.write().await.remove(operation).is_some()
    }

    pub async fn registered_operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn running_count(&self) -> usize {
        lock_table(&self.in_flight).len()
    }

    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn is_running(&self, id: Uuid) -> bool {
        lock_table(&self.in_flight).contains_key(&id)
    }

    /// Run a job to completion on the current task.
    ///
    /// Handler errors and timeouts are recorded on the returned FAILED job.
    /// Cancellation is recorded as CANCELLED and returned as
    /// [`AppError::Cancelled`].
    pub async fn execute(&self, id: Uuid, timeout: Option<Duration>) -> Result<Job> {
        let (job, handler) = self.validate(id).await?;
        let (cancel_rx, flight) = self.track(id)?;
        self.run(job, handler, timeout, cancel_rx, flight).await
    }

    /// Start a job on its own task. Validation happens before returning, so a
    /// rejected job is reported here and never changes state.
    pub async fn submit(self: &Arc<Self>, id: Uuid, timeout: Option<Duration>) -> Result<JobHandle> {
        let (job, handler) = self.validate(id).await?;
        let (cancel_rx, flight) = self.track(id)?;

        let worker = Arc::clone(self);
        let join_handle =
            tokio::spawn(async move { worker.run(job, handler, timeout, cancel_rx, flight).await });

        Ok(JobHandle {
            job_id: id,
            join_handle,
        })
    }

    /// Cancel an in-flight job and wait until it has unwound.
    /// Returns `false` when nothing was running under `id`.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let done_rx = {
            let table = lock_table(&self.in_flight);
            match table.get(&id) {
                Some(flight) => {
                    flight.cancel_tx.send_replace(true);
                    flight.done_rx.clone()
                }
                None => return false,
            }
        };
        tracing::info!("Cancelling job {}", id);
        wait_done(done_rx).await;
        true
    }

    /// Wait for an in-flight job, then return its stored snapshot.
    pub async fn wait_for(&self, id: Uuid, timeout: Option<Duration>) -> Result<Option<Job>> {
        let done_rx = lock_table(&self.in_flight)
            .get(&id)
            .map(|flight| flight.done_rx.clone());

        if let Some(done_rx) = done_rx {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, wait_done(done_rx))
                    .await
                    .map_err(|_| {
                        AppError::Timeout(format!(
                            "Job {} still running after {} seconds",
                            id,
                            limit.as_secs_f64()
                        ))
                    })?,
                None => wait_done(done_rx).await,
            }
        }
        self.store.get(id).await
    }

    /// Stop accepting work. With `cancel_running` every in-flight job is
    /// cancelled, otherwise in-flight jobs are awaited.
    pub async fn shutdown(&self, cancel_running: bool) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let ids: Vec<Uuid> = lock_table(&self.in_flight).keys().copied().collect();
        tracing::info!(
            "Worker shutting down with {} in-flight job(s) (cancel_running={})",
            ids.len(),
            cancel_running
        );

        if cancel_running {
            futures_util::future::join_all(ids.into_iter().map(|id| self.cancel(id))).await;
        } else {
            let waiters: Vec<_> = {
                let table = lock_table(&self.in_flight);
                table.values().map(|f| wait_done(f.done_rx.clone())).collect()
            };
            futures_util::future::join_all(waiters).await;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Reject misuse before any state is touched.
    async fn validate(&self, id: Uuid) -> Result<(Job, Arc<dyn JobHandler>)> {
        if self.is_shutting_down() {
            return Err(AppError::ShuttingDown("worker is not accepting new jobs".to_string()).into());
        }

        let job = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;

        if job.status == JobStatus::Running {
            return Err(AppError::Conflict(format!("Job {} is already running", id)).into());
        }
        if job.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "Job {} is already in terminal state {}",
                id, job.status
            ))
            .into());
        }

        let handlers = self.handlers.read().await;
        let handler = match handlers.get(&job.operation) {
            Some(handler) => Arc::clone(handler),
            None => {
                let mut available: Vec<&str> = handlers.keys().map(String::as_str).collect();
                available.sort_unstable();
                return Err(AppError::UnknownOperation(format!(
                    "No handler registered for operation '{}'. Available operations: [{}]",
                    job.operation,
                    available.join(", ")
                ))
                .into());
            }
        };
        Ok((job, handler))
    }

    fn track(&self, id: Uuid) -> Result<(watch::Receiver<bool>, FlightGuard)> {
        let mut table = lock_table(&self.in_flight);
        if table.contains_key(&id) {
            return Err(AppError::Conflict(format!("Job {} is already submitted", id)).into());
        }
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        table.insert(id, InFlight { cancel_tx, done_rx });

        Ok((
            cancel_rx,
            FlightGuard {
                id,
                table: Arc::clone(&self.in_flight),
                done_tx,
            },
        ))
    }

    async fn run(
        &self,
        job: Job,
        handler: Arc<dyn JobHandler>,
        timeout: Option<Duration>,
        mut cancel_rx: watch::Receiver<bool>,
        flight: FlightGuard,
    ) -> Result<Job> {
        let id = job.id;
        let timeout = timeout.unwrap_or(self.default_timeout);

        // Armed before the RUNNING write so an interruption during it is
        // still recorded.
        let guard = ExecutionGuard::arm(id, Arc::clone(&self.store), flight);

        // Persist RUNNING before the handler can start so pollers see it.
        let started = self
            .store
            .update(
                id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    message: Some(format!("Executing {}", job.operation)),
                    ..Default::default()
                },
            )
            .await
            .and_then(|updated| {
                updated.ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)).into())
            });
        if let Err(e) = started {
            guard.disarm();
            return Err(e);
        }
        tracing::info!("Job {} started: {}", id, job.operation);

        let work = async {
            let _permit = match self.gate.acquire().await {
                Ok(permit) => permit,
                Err(_) => {
                    return Outcome::Finished(Err(AppError::ShuttingDown(
                        "worker pool closed".to_string(),
                    )
                    .into()))
                }
            };
            let invocation = AssertUnwindSafe(handler.invoke(job.params)).catch_unwind();
            match tokio::time::timeout(timeout, invocation).await {
                Ok(Ok(result)) => Outcome::Finished(result),
                Ok(Err(_)) => Outcome::Finished(Err(AppError::Internal(
                    "handler panicked".to_string(),
                )
                .into())),
                Err(_) => Outcome::TimedOut,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => Outcome::Cancelled,
            outcome = work => outcome,
        };

        let result = match outcome {
            Outcome::Finished(Ok(value)) => {
                let job = self.finish(self.store.mark_complete(id, value, None).await, id)?;
                tracing::info!("Job {} completed", id);
                Ok(job)
            }
            Outcome::TimedOut => {
                let error = format!("Job timed out after {} seconds", timeout.as_secs_f64());
                tracing::warn!("Job {}: {}", id, error);
                self.finish(self.store.mark_failed(id, error, None).await, id)
            }
            Outcome::Finished(Err(e)) if AppError::is_cancelled(&e) => self.cancelled(id).await,
            Outcome::Cancelled => self.cancelled(id).await,
            Outcome::Finished(Err(e)) => {
                let error = format!("{}: {:#}", error_kind(&e), e);
                tracing::warn!("Job {} failed: {}", id, error);
                self.finish(self.store.mark_failed(id, error, None).await, id)
            }
        };
        guard.disarm();
        result
    }

    async fn cancelled(&self, id: Uuid) -> Result<Job> {
        self.finish(self.store.mark_cancelled(id, None).await, id)?;
        tracing::info!("Job {} cancelled", id);
        Err(AppError::Cancelled(format!("Job {} was cancelled", id)).into())
    }

    fn finish(&self, persisted: Result<Option<Job>>, id: Uuid) -> Result<Job> {
        match persisted {
            Ok(Some(job)) => Ok(job),
            Ok(None) => Err(AppError::NotFound(format!("Job {} disappeared during execution", id)).into()),
            Err(e) => {
                tracing::error!("Failed to record outcome of job {}: {:#}", id, e);
                Err(e)
            }
        }
    }
}

/// Resolves once cancellation has been requested; never if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn wait_done(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Short type name recorded in a failed job's error.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    if let Some(e) = err.downcast_ref::<ClientError>() {
        return e.kind_name();
    }
    if let Some(e) = err.downcast_ref::<ApiError>() {
        return e.kind.name();
    }
    if err.downcast_ref::<ParamError>().is_some() {
        return "ParameterError";
    }
    if err.downcast_ref::<SchemaError>().is_some() {
        return "SchemaValidationError";
    }
    if err.downcast_ref::<reqwest::Error>().is_some() {
        return "NetworkError";
    }
    if err.downcast_ref::<serde_json::Error>().is_some() {
        return "SerializationError";
    }
    match err.downcast_ref::<AppError>() {
        Some(AppError::Validation(_)) => "ValidationError",
        Some(AppError::NotFound(_)) => "NotFoundError",
        Some(AppError::Timeout(_)) => "TimeoutError",
        Some(AppError::Storage(_)) => "StorageError",
        Some(_) => "InternalError",
        None => "HandlerError",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsJobStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    async fn setup_worker(max_workers: usize) -> (Arc<BackgroundWorker>, Arc<dyn JobStore>, TempDir) {
        let tmp = TempDir::new().expect("create temp dir");
        let store: Arc<dyn JobStore> =
            Arc::new(FsJobStore::new(tmp.path().join("jobs")).await.expect("store"));
        let worker = Arc::new(BackgroundWorker::new(
            Arc::clone(&store),
            max_workers,
            Duration::from_secs(30),
        ));
        worker
            .register_fn("echo", |params: JobParams| async move {
                Ok(Value::Object(params))
            })
            .await;
        worker
            .register_fn("sleep", |_params: JobParams| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!("woke"))
            })
            .await;
        worker
            .register_fn("explode", |_params: JobParams| async move {
                Err(AppError::Validation("symbol is required".to_string()).into())
            })
            .await;
        (worker, store, tmp)
    }

    fn app_error(err: &anyhow::Error) -> &AppError {
        err.downcast_ref::<AppError>().expect("AppError")
    }

    async fn wait_until_running(worker: &BackgroundWorker, store: &Arc<dyn JobStore>, id: Uuid) {
        for _ in 0..200 {
            let job = store.get(id).await.unwrap().unwrap();
            if job.status == JobStatus::Running && worker.is_running(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached running", id);
    }

    #[tokio::test]
    async fn test_execute_completes_with_result() {
        let (worker, store, _tmp) = setup_worker(2).await;
        let job = store
            .create("echo", json!({"v": 1}).as_object().cloned().unwrap())
            .await
            .unwrap();

        let done = worker.execute(job.id, None).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result, Some(json!({"v": 1})));
        assert!(done.started_at.is_some());
        assert!(done.completed_at.is_some());
        assert!(!worker.is_running(job.id));
    }

    #[tokio::test]
    async fn test_execute_rejects_missing_job() {
        let (worker, _store, _tmp) = setup_worker(1).await;
        let err = worker.execute(Uuid::now_v7(), None).await.unwrap_err();
        assert!(matches!(app_error(&err), AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_execute_rejects_unknown_operation_without_mutation() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("mystery", JobParams::new()).await.unwrap();

        let err = worker.execute(job.id, None).await.unwrap_err();
        match app_error(&err) {
            AppError::UnknownOperation(msg) => {
                assert!(msg.contains("mystery"));
                assert!(msg.contains("echo, explode, sleep"));
            }
            other => panic!("Expected UnknownOperation, got: {:?}", other),
        }
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored, job);
    }

    #[tokio::test]
    async fn test_execute_rejects_terminal_job() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("echo", JobParams::new()).await.unwrap();
        worker.execute(job.id, None).await.unwrap();

        let err = worker.execute(job.id, None).await.unwrap_err();
        assert!(matches!(app_error(&err), AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_handler_error_recorded_not_raised() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("explode", JobParams::new()).await.unwrap();

        let failed = worker.execute(job.id, None).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        let error = failed.error.unwrap();
        assert!(error.starts_with("ValidationError: "), "{}", error);
        assert!(error.contains("symbol is required"));
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("sleep", JobParams::new()).await.unwrap();

        let failed = worker
            .execute(job.id, Some(Duration::from_millis(100)))
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("Job timed out after 0.1 seconds"));
    }

    #[tokio::test]
    async fn test_submit_rejects_double_submission() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("sleep", JobParams::new()).await.unwrap();

        let _handle = worker.submit(job.id, None).await.unwrap();
        let err = worker.submit(job.id, None).await.unwrap_err();
        assert!(matches!(app_error(&err), AppError::Conflict(_)));
        assert!(worker.cancel(job.id).await);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("sleep", JobParams::new()).await.unwrap();
        let handle = worker.submit(job.id, None).await.unwrap();
        wait_until_running(&worker, &store, job.id).await;

        assert!(worker.cancel(job.id).await);
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(!worker.is_running(job.id));

        let err = handle.join().await.unwrap_err();
        assert!(AppError::is_cancelled(&err));
    }

    #[tokio::test]
    async fn test_cancel_unknown_returns_false() {
        let (worker, _store, _tmp) = setup_worker(1).await;
        assert!(!worker.cancel(Uuid::now_v7()).await);
    }

    async fn wait_for_status(store: &Arc<dyn JobStore>, id: Uuid, status: JobStatus) -> Job {
        for _ in 0..200 {
            let job = store.get(id).await.unwrap().unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached {}", id, status);
    }

    #[tokio::test]
    async fn test_dropped_execute_marks_cancelled() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("sleep", JobParams::new()).await.unwrap();

        let outer = tokio::time::timeout(Duration::from_millis(100), worker.execute(job.id, None)).await;
        assert!(outer.is_err());

        let stored = wait_for_status(&store, job.id, JobStatus::Cancelled).await;
        assert!(stored.completed_at.is_some());
        let snapshot = worker.wait_for(job.id, Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(snapshot.unwrap().status, JobStatus::Cancelled);
        assert!(!worker.is_running(job.id));

        let err = worker.execute(job.id, None).await.unwrap_err();
        assert!(matches!(app_error(&err), AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_aborted_submission_marks_cancelled() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("sleep", JobParams::new()).await.unwrap();
        let handle = worker.submit(job.id, None).await.unwrap();
        wait_until_running(&worker, &store, job.id).await;

        handle.join_handle.abort();

        wait_for_status(&store, job.id, JobStatus::Cancelled).await;
        worker.wait_for(job.id, Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(worker.running_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_gate_bounds_handlers() {
        let (worker, store, _tmp) = setup_worker(2).await;
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            worker
                .register_fn("busy", move |_params: JobParams| {
                    let active = Arc::clone(&active);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(json!(null))
                    }
                })
                .await;
        }

        let mut handles = Vec::new();
        for _ in 0..6 {
            let job = store.create("busy", JobParams::new()).await.unwrap();
            handles.push(worker.submit(job.id, None).await.unwrap());
        }
        for handle in handles {
            assert_eq!(handle.join().await.unwrap().status, JobStatus::Completed);
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(worker.available_slots(), 2);
        assert_eq!(worker.running_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_returns_final_snapshot() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store
            .create("echo", json!({"x": 2}).as_object().cloned().unwrap())
            .await
            .unwrap();
        let _handle = worker.submit(job.id, None).await.unwrap();

        let done = worker.wait_for(job.id, None).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_wait_for_timeout() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("sleep", JobParams::new()).await.unwrap();
        let _handle = worker.submit(job.id, None).await.unwrap();

        let err = worker
            .wait_for(job.id, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(app_error(&err), AppError::Timeout(_)));
        worker.cancel(job.id).await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_rejects_new_work() {
        let (worker, store, _tmp) = setup_worker(2).await;
        let a = store.create("sleep", JobParams::new()).await.unwrap();
        let b = store.create("sleep", JobParams::new()).await.unwrap();
        worker.submit(a.id, None).await.unwrap();
        worker.submit(b.id, None).await.unwrap();

        worker.shutdown(true).await;
        assert_eq!(worker.running_count(), 0);
        for id in [a.id, b.id] {
            let job = store.get(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Cancelled);
        }

        let c = store.create("echo", JobParams::new()).await.unwrap();
        let err = worker.submit(c.id, None).await.unwrap_err();
        assert!(matches!(app_error(&err), AppError::ShuttingDown(_)));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_natural_completion() {
        let (worker, store, _tmp) = setup_worker(1).await;
        let job = store.create("echo", JobParams::new()).await.unwrap();
        worker.submit(job.id, None).await.unwrap();

        worker.shutdown(false).await;
        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_unregister_and_registered_operations() {
        let (worker, _store, _tmp) = setup_worker(1).await;
        assert_eq!(worker.registered_operations().await, vec!["echo", "explode", "sleep"]);
        assert!(worker.unregister("explode").await);
        assert!(!worker.unregister("explode").await);
        assert_eq!(worker.registered_operations().await, vec!["echo", "sleep"]);
    }

    #[test]
    fn test_error_kind_names() {
        let api: anyhow::Error = ClientError::from(ApiError::from_response(429, "u", vec![], "")).into();
        assert_eq!(error_kind(&api), "RateLimitError");

        let param: anyhow::Error = ParamError::Missing("symbol".to_string()).into();
        assert_eq!(error_kind(&param), "ParameterError");

        let plain = anyhow::anyhow!("something odd");
        assert_eq!(error_kind(&plain), "HandlerError");
    }
}
