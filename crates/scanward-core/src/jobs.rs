//! Queue-agnostic job boundary.
//!
//! The pipeline is a plain async function. Hosting it behind `submit`/`poll`
//! is the job of a [`JobQueue`]; [`LocalJobQueue`] runs jobs on the current
//! tokio runtime with a concurrency cap. Durable queues implement the same
//! trait elsewhere.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot<R> {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<R> JobSnapshot<R> {
    fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    #[error("job queue unavailable: {0}")]
    Unavailable(String),
}

/// Work executed for each submitted request.
#[async_trait]
pub trait JobRunner<Req, Res>: Send + Sync + 'static {
    async fn run(&self, request: Req) -> anyhow::Result<Res>;
}

#[async_trait]
pub trait JobQueue<Req, Res>: Send + Sync {
    async fn submit(&self, request: Req) -> Result<JobId, JobError>;
    async fn poll(&self, id: &JobId) -> Result<JobSnapshot<Res>, JobError>;
}

/// Finished jobs kept for polling unless configured otherwise.
pub const DEFAULT_RETENTION: usize = 1024;

/// Snapshots by id, plus the order in which jobs finished.
struct JobTable<Res> {
    jobs: HashMap<JobId, JobSnapshot<Res>>,
    finished: VecDeque<JobId>,
    retention: usize,
}

impl<Res> JobTable<Res> {
    fn new(retention: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            finished: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    fn set(&mut self, id: &JobId, snapshot: JobSnapshot<Res>) {
        let done = matches!(snapshot.status, JobStatus::Completed | JobStatus::Failed);
        self.jobs.insert(id.clone(), snapshot);
        if !done {
            return;
        }
        self.finished.push_back(id.clone());
        while self.finished.len() > self.retention {
            if let Some(evicted) = self.finished.pop_front() {
                self.jobs.remove(&evicted);
                debug!(job_id = %evicted, "evicted finished job");
            }
        }
    }
}

/// In-process queue backed by spawned tokio tasks.
///
/// Only the most recent `retention` finished jobs stay pollable. Pending and
/// running jobs are never evicted.
pub struct LocalJobQueue<Req, Res> {
    runner: Arc<dyn JobRunner<Req, Res>>,
    table: Arc<Mutex<JobTable<Res>>>,
    permits: Arc<Semaphore>,
}

impl<Req, Res> LocalJobQueue<Req, Res>
where
    Req: Send + 'static,
    Res: Clone + Send + 'static,
{
    pub fn new(runner: Arc<dyn JobRunner<Req, Res>>, max_concurrent: usize) -> Self {
        Self {
            runner,
            table: Arc::new(Mutex::new(JobTable::new(DEFAULT_RETENTION))),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Keep at most `retention` finished jobs (at least one). Call before
    /// submitting.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.table = Arc::new(Mutex::new(JobTable::new(retention)));
        self
    }

    /// Stop accepting work. Jobs still waiting for a slot fail; running
    /// jobs finish normally.
    pub fn close(&self) {
        self.permits.close();
        info!("job queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Drop a finished job's snapshot. Returns whether one was removed.
    pub async fn forget(&self, id: &JobId) -> bool {
        let mut table = self.table.lock().await;
        let done = table
            .jobs
            .get(id)
            .is_some_and(|s| matches!(s.status, JobStatus::Completed | JobStatus::Failed));
        if done {
            table.jobs.remove(id);
            table.finished.retain(|f| f != id);
        }
        done
    }

    async fn set(&self, id: &JobId, snapshot: JobSnapshot<Res>) {
        self.table.lock().await.set(id, snapshot);
    }
}

fn failed<Res>(error: String) -> JobSnapshot<Res> {
    JobSnapshot {
        status: JobStatus::Failed,
        result: None,
        error: Some(error),
    }
}

#[async_trait]
impl<Req, Res> JobQueue<Req, Res> for LocalJobQueue<Req, Res>
where
    Req: Send + 'static,
    Res: Clone + Send + Sync + 'static,
{
    async fn submit(&self, request: Req) -> Result<JobId, JobError> {
        if self.is_closed() {
            return Err(JobError::Unavailable("queue is closed".to_string()));
        }

        let id = JobId::new();
        self.set(&id, JobSnapshot::pending()).await;

        let runner = Arc::clone(&self.runner);
        let table = Arc::clone(&self.table);
        let permits = Arc::clone(&self.permits);
        let job_id = id.clone();

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                table
                    .lock()
                    .await
                    .set(&job_id, failed("job queue closed".to_string()));
                return;
            };

            table.lock().await.set(
                &job_id,
                JobSnapshot {
                    status: JobStatus::Running,
                    result: None,
                    error: None,
                },
            );
            info!(job_id = %job_id, "job started");

            // Run on its own task so a panicking runner still settles the job.
            let handle = tokio::spawn(async move { runner.run(request).await });
            let snapshot = match handle.await {
                Ok(Ok(result)) => JobSnapshot {
                    status: JobStatus::Completed,
                    result: Some(result),
                    error: None,
                },
                Ok(Err(e)) => {
                    warn!(job_id = %job_id, error = %e, "job failed");
                    failed(format!("{e:#}"))
                }
                Err(e) => {
                    let reason = if e.is_panic() {
                        "job panicked".to_string()
                    } else {
                        format!("job aborted: {e}")
                    };
                    warn!(job_id = %job_id, error = %reason, "job failed");
                    failed(reason)
                }
            };
            table.lock().await.set(&job_id, snapshot);
        });

        Ok(id)
    }

    async fn poll(&self, id: &JobId) -> Result<JobSnapshot<Res>, JobError> {
        self.table
            .lock()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::UnknownJob(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Doubler;

    #[async_trait]
    impl JobRunner<u32, u32> for Doubler {
        async fn run(&self, request: u32) -> anyhow::Result<u32> {
            if request == 0 {
                anyhow::bail!("zero is not allowed");
            }
            Ok(request * 2)
        }
    }

    async fn wait_done(queue: &LocalJobQueue<u32, u32>, id: &JobId) -> JobSnapshot<u32> {
        for _ in 0..100 {
            let snap = queue.poll(id).await.unwrap();
            if matches!(snap.status, JobStatus::Completed | JobStatus::Failed) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job did not finish");
    }

    #[tokio::test]
    async fn submitted_job_completes_with_result() {
        let queue: LocalJobQueue<u32, u32> = LocalJobQueue::new(Arc::new(Doubler), 2);
        let id = queue.submit(21).await.unwrap();
        let snap = wait_done(&queue, &id).await;
        assert_eq!(snap.status, JobStatus::Completed);
        assert_eq!(snap.result, Some(42));
    }

    #[tokio::test]
    async fn failing_job_reports_error() {
        let queue: LocalJobQueue<u32, u32> = LocalJobQueue::new(Arc::new(Doubler), 1);
        let id = queue.submit(0).await.unwrap();
        let snap = wait_done(&queue, &id).await;
        assert_eq!(snap.status, JobStatus::Failed);
        assert!(snap.error.unwrap().contains("zero"));
    }

    struct Panicker;

    #[async_trait]
    impl JobRunner<u32, u32> for Panicker {
        async fn run(&self, _request: u32) -> anyhow::Result<u32> {
            panic!("runner blew up");
        }
    }

    #[tokio::test]
    async fn panicking_runner_marks_job_failed() {
        let queue: LocalJobQueue<u32, u32> = LocalJobQueue::new(Arc::new(Panicker), 1);
        let id = queue.submit(1).await.unwrap();
        let snap = wait_done(&queue, &id).await;
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error.as_deref(), Some("job panicked"));

        // the slot is released for the next job
        let next = queue.submit(2).await.unwrap();
        assert_eq!(wait_done(&queue, &next).await.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn oldest_finished_jobs_are_evicted() {
        let queue: LocalJobQueue<u32, u32> =
            LocalJobQueue::new(Arc::new(Doubler), 1).with_retention(2);
        let mut ids = Vec::new();
        for n in 1..=3 {
            let id = queue.submit(n).await.unwrap();
            wait_done(&queue, &id).await;
            ids.push(id);
        }

        assert!(matches!(queue.poll(&ids[0]).await, Err(JobError::UnknownJob(_))));
        assert_eq!(queue.poll(&ids[1]).await.unwrap().result, Some(4));
        assert_eq!(queue.poll(&ids[2]).await.unwrap().result, Some(6));

        assert!(queue.forget(&ids[1]).await);
        assert!(!queue.forget(&ids[1]).await);
        assert!(queue.poll(&ids[1]).await.is_err());
    }

    #[tokio::test]
    async fn closed_queue_rejects_submissions() {
        let queue: LocalJobQueue<u32, u32> = LocalJobQueue::new(Arc::new(Doubler), 1);
        queue.close();
        let err = queue.submit(5).await.unwrap_err();
        assert!(matches!(err, JobError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unknown_job_is_an_error() {
        let queue: LocalJobQueue<u32, u32> = LocalJobQueue::new(Arc::new(Doubler), 1);
        let err = queue.poll(&JobId("nope".into())).await.unwrap_err();
        assert!(matches!(err, JobError::UnknownJob(_)));
    }
}
