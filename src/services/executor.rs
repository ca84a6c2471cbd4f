//! In-process task executor.
//!
//! Request handlers `submit` a [`JobRequest`] onto a bounded queue (the broker)
//! and get back a [`JobHandle`]. Workers pull jobs off the queue, run the
//! matching pipeline and publish the outcome into the [`ResultBackend`], where
//! `await_result` picks it up.
//!
//! ```text
//! handler                     queue                  worker
//! ───────                     ─────                  ──────
//!    │ submit(job) ─────────────►│                      │
//!    │                           │ next() ─────────────►│ run pipeline
//!    │ await_result ◄─────────── results ◄──────────────│ complete(outcome)
//! ```
//!
//! Results are consumed once: once `await_result` returns, times out or is
//! dropped, the job is forgotten.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use uuid::Uuid;

pub type JobId = Uuid;

/// What a pipeline hands back: a value, or `None` for failure.
pub type JobOutcome = Option<String>;

/// A named job with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", content = "args", rename_all = "snake_case")]
pub enum JobRequest {
    /// Hash a staged file, record it and push it to the blob store.
    PutData { file_path: PathBuf },
    /// Look up a key and pull its blob into the download directory.
    GetData { file_key: String },
}

impl JobRequest {
    pub fn name(&self) -> &'static str {
        match self {
            JobRequest::PutData { .. } => "put_data",
            JobRequest::GetData { .. } => "get_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Completed(JobOutcome),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed(_))
    }
}

#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    name: &'static str,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Job {job_id} timed out after {duration:?}")]
    Timeout { job_id: JobId, duration: Duration },

    #[error("Task executor has shut down")]
    Shutdown,

    #[error("Unknown job {0}")]
    UnknownJob(JobId),
}

/// A job as it travels through the queue.
#[derive(Debug)]
pub struct Envelope {
    pub id: JobId,
    pub request: JobRequest,
}

/// Per-job state, keyed by job id.
#[derive(Clone, Default)]
pub struct ResultBackend {
    jobs: Arc<DashMap<JobId, watch::Sender<JobState>>>,
}

impl ResultBackend {
    fn register(&self, id: JobId) {
        let (tx, _rx) = watch::channel(JobState::Submitted);
        self.jobs.insert(id, tx);
    }

    /// Moves the job to `state`. A completed job keeps its outcome.
    fn set(&self, id: JobId, state: JobState) -> bool {
        match self.jobs.get(&id) {
            Some(tx) => {
                tx.send_if_modified(|current| {
                    if current.is_terminal() {
                        return false;
                    }
                    *current = state;
                    true
                });
                true
            }
            None => false,
        }
    }

    pub fn mark_running(&self, id: JobId) {
        self.set(id, JobState::Running);
    }

    /// Publishes the outcome. Returns false if nobody is waiting for this job anymore.
    pub fn complete(&self, id: JobId, outcome: JobOutcome) -> bool {
        self.set(id, JobState::Completed(outcome))
    }

    pub fn status(&self, id: JobId) -> Option<JobState> {
        self.jobs.get(&id).map(|tx| tx.borrow().clone())
    }

    fn subscribe(&self, id: JobId) -> Option<watch::Receiver<JobState>> {
        self.jobs.get(&id).map(|tx| tx.subscribe())
    }

    fn forget(&self, id: JobId) {
        self.jobs.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Drops the job from the result backend when the caller stops caring about
/// it, including when the waiting future itself is dropped.
struct ForgetOnDrop<'a> {
    results: &'a ResultBackend,
    id: JobId,
    armed: bool,
}

impl<'a> ForgetOnDrop<'a> {
    fn new(results: &'a ResultBackend, id: JobId) -> Self {
        Self {
            results,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ForgetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.results.forget(self.id);
        }
    }
}

/// Consumer side of the job queue, shared by all workers.
#[derive(Clone)]
pub struct JobQueue {
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    results: ResultBackend,
}

impl JobQueue {
    /// Waits for the next job. `None` once every producer is gone.
    pub async fn next(&self) -> Option<Envelope> {
        self.rx.lock().await.recv().await
    }

    pub fn results(&self) -> &ResultBackend {
        &self.results
    }
}

/// Producer side: what request handlers hold.
#[derive(Clone)]
pub struct TaskExecutor {
    tx: mpsc::Sender<Envelope>,
    results: ResultBackend,
    default_timeout: Option<Duration>,
}

impl TaskExecutor {
    /// Creates the executor and the queue its workers consume.
    pub fn new(queue_capacity: usize, default_timeout: Option<Duration>) -> (Self, JobQueue) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let results = ResultBackend::default();
        let executor = Self {
            tx,
            results: results.clone(),
            default_timeout,
        };
        let queue = JobQueue {
            rx: Arc::new(Mutex::new(rx)),
            results,
        };
        (executor, queue)
    }

    pub async fn submit(&self, request: JobRequest) -> Result<JobHandle, ExecutorError> {
        let handle = JobHandle {
            id: Uuid::new_v4(),
            name: request.name(),
        };
        self.results.register(handle.id);
        // Covers both a closed queue and a caller dropped while the queue is full
        let registered = ForgetOnDrop::new(&self.results, handle.id);

        let envelope = Envelope {
            id: handle.id,
            request,
        };
        if self.tx.send(envelope).await.is_err() {
            return Err(ExecutorError::Shutdown);
        }
        registered.disarm();

        tracing::debug!("Submitted job {} ({})", handle.id, handle.name);
        Ok(handle)
    }

    /// Blocks until the job completes, `timeout` (or the default) elapses, or
    /// the workers go away.
    pub async fn await_result(
        &self,
        handle: &JobHandle,
        timeout: Option<Duration>,
    ) -> Result<JobOutcome, ExecutorError> {
        let _forget = ForgetOnDrop::new(&self.results, handle.id);
        let mut rx = self
            .results
            .subscribe(handle.id)
            .ok_or(ExecutorError::UnknownJob(handle.id))?;

        let wait = async {
            loop {
                let state = rx.borrow_and_update().clone();
                if let JobState::Completed(outcome) = state {
                    return Ok(outcome);
                }
                tokio::select! {
                    biased;
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return Err(ExecutorError::Shutdown);
                        }
                    }
                    _ = self.tx.closed() => {
                        // Workers are gone; take a finished result if one landed
                        if let JobState::Completed(outcome) = rx.borrow().clone() {
                            return Ok(outcome);
                        }
                        return Err(ExecutorError::Shutdown);
                    }
                }
            }
        };

        match timeout.or(self.default_timeout) {
            Some(duration) => match tokio::time::timeout(duration, wait).await {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Timeout {
                    job_id: handle.id,
                    duration,
                }),
            },
            None => wait.await,
        }
    }

    /// `submit` followed by `await_result` with the default timeout.
    pub async fn run(&self, request: JobRequest) -> Result<JobOutcome, ExecutorError> {
        let handle = self.submit(request).await?;
        self.await_result(&handle, None).await
    }

    pub fn status(&self, id: JobId) -> Option<JobState> {
        self.results.status(id)
    }

    /// Jobs submitted but not yet collected.
    pub fn pending_jobs(&self) -> usize {
        self.results.len()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
