//! In-process job queue: a bounded channel drained by a fixed pool of tokio workers.
//!
//! Retryable failures are retried with exponential backoff up to the attempt
//! budget; non-retryable failures are dead-lettered on the spot. Every job
//! is tracked in a registry that the HTTP surface reads; finished records
//! are dropped once they age past the retention window or exceed the cap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ConversationJob, JobHandler, JobKind, JobReport};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub backoff: Duration,
    pub capacity: usize,
    /// How long a finished job stays queryable.
    pub retention: Duration,
    /// Finished jobs kept at most; the oldest go first.
    pub max_finished: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: (num_cpus::get() / 2).clamp(2, 8),
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
            capacity: 1000,
            retention: Duration::from_secs(3600),
            max_finished: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    /// Retryable error that outlived the attempt budget.
    Failed,
    /// Non-retryable error; never attempted again.
    DeadLettered,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::DeadLettered)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub conversation_id: String,
    pub state: JobState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<JobReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is full")]
    Full,
    #[error("job queue is closed")]
    Closed,
}

struct QueuedJob {
    id: String,
    job: ConversationJob,
}

type Registry = Arc<DashMap<String, JobRecord>>;

pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    jobs: Registry,
    workers: Vec<JoinHandle<()>>,
}

impl JobQueue {
    /// Spawns the workers on the current tokio runtime.
    pub fn start(handler: Arc<dyn JobHandler>, config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let jobs: Registry = Arc::new(DashMap::new());
        let concurrency = config.concurrency.max(1);

        let workers = (0..concurrency)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                let jobs = Arc::clone(&jobs);
                let config = config.clone();
                tokio::spawn(async move {
                    Self::run_worker(worker_id, receiver, handler, jobs, config).await;
                })
            })
            .collect();
        info!("Job queue started with {} worker(s)", concurrency);

        Self { sender, jobs, workers }
    }

    pub fn enqueue(&self, job: ConversationJob) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.jobs.insert(
            id.clone(),
            JobRecord {
                id: id.clone(),
                kind: job.kind,
                conversation_id: job.conversation_id.clone(),
                state: JobState::Queued,
                attempts: 0,
                report: None,
                error: None,
                enqueued_at: now,
                updated_at: now,
            },
        );

        match self.sender.try_send(QueuedJob { id: id.clone(), job }) {
            Ok(()) => {
                metrics::inc_queue();
                Ok(id)
            }
            Err(e) => {
                self.jobs.remove(&id);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => QueueError::Full,
                    mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
                })
            }
        }
    }

    /// Number of records currently in the registry, finished or not.
    pub fn tracked_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    /// Polls the registry until the job finishes or `timeout` elapses.
    pub async fn wait_for(&self, id: &str, timeout: Duration) -> Option<JobRecord> {
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.get(id)?;
            if record.state.is_finished() || Instant::now() >= deadline {
                return Some(record);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stops accepting jobs and waits for the workers to drain the channel.
    pub async fn shutdown(self) {
        drop(self.sender);
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                error!("Queue worker ended abnormally: {}", e);
            }
        }
        info!("Job queue stopped");
    }

    async fn run_worker(
        worker_id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
        handler: Arc<dyn JobHandler>,
        jobs: Registry,
        config: QueueConfig,
    ) {
        loop {
            let next = {
                let mut receiver = receiver.lock().await;
                receiver.recv().await
            };
            let Some(queued) = next else {
                break;
            };
            metrics::dec_queue();
            Self::run_job(worker_id, handler.as_ref(), &jobs, &config, queued).await;
            Self::prune(&jobs, &config);
        }
    }

    async fn run_job(
        worker_id: usize,
        handler: &dyn JobHandler,
        jobs: &Registry,
        config: &QueueConfig,
        queued: QueuedJob,
    ) {
        let QueuedJob { id, job } = queued;
        let max_attempts = config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            Self::update(jobs, &id, |record| {
                record.state = JobState::Running;
                record.attempts = attempt;
            });

            let started = Instant::now();
            let result = handler.handle(&job).await;
            metrics::observe_job_duration(started.elapsed().as_secs_f64());

            match result {
                Ok(report) => {
                    metrics::inc_job(job.kind.as_str(), report.status.as_str());
                    Self::update(jobs, &id, |record| {
                        record.state = JobState::Completed;
                        record.report = Some(report);
                        record.error = None;
                    });
                    return;
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(config.backoff, attempt);
                    warn!(
                        "[worker {}] job {} attempt {}/{} failed ({}), retrying in {:?}",
                        worker_id, id, attempt, max_attempts, e, delay
                    );
                    Self::update(jobs, &id, |record| record.error = Some(e.to_string()));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let state = if e.is_retryable() { JobState::Failed } else { JobState::DeadLettered };
                    error!(
                        "[worker {}] job {} for {} {:?} after {} attempt(s): {}",
                        worker_id, id, job.conversation_id, state, attempt, e
                    );
                    metrics::inc_job(job.kind.as_str(), "error");
                    Self::update(jobs, &id, |record| {
                        record.state = state;
                        record.error = Some(e.to_string());
                        record.report = Some(JobReport::error(e.kind()));
                    });
                    return;
                }
            }
        }
    }

    /// Drops finished records older than the retention window, then the
    /// oldest finished records beyond `max_finished`. Queued and running
    /// jobs are never dropped.
    fn prune(jobs: &Registry, config: &QueueConfig) {
        let before = jobs.len();
        let cutoff = chrono::Duration::from_std(config.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        if let Some(cutoff) = cutoff {
            jobs.retain(|_, record| !(record.state.is_finished() && record.updated_at <= cutoff));
        }

        let mut finished: Vec<(DateTime<Utc>, String)> = jobs
            .iter()
            .filter(|entry| entry.state.is_finished())
            .map(|entry| (entry.updated_at, entry.key().clone()))
            .collect();
        if finished.len() > config.max_finished {
            finished.sort();
            let excess = finished.len() - config.max_finished;
            for (_, id) in finished.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }

        let dropped = before.saturating_sub(jobs.len());
        if dropped > 0 {
            debug!("Pruned {} finished job(s) from the registry", dropped);
        }
    }

    fn update(jobs: &Registry, id: &str, apply: impl FnOnce(&mut JobRecord)) {
        if let Some(mut record) = jobs.get_mut(id) {
            apply(record.value_mut());
            record.updated_at = Utc::now();
        }
    }
}

/// `base * 2^(attempt - 1)` plus up to 10% jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let delay = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
    let jitter_ms = (delay.as_millis() / 10) as u64;
    if jitter_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, PipelineResult, UpstreamService};
    use crate::jobs::JobStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with `error`, then succeeds.
    struct FlakyHandler {
        failures: u32,
        retryable: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _: &ConversationJob) -> PipelineResult<JobReport> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.retryable {
                    PipelineError::UpstreamService {
                        service: UpstreamService::Transcript,
                        message: "503".into(),
                    }
                } else {
                    PipelineError::Validation("bad id".into())
                });
            }
            Ok(JobReport {
                status: JobStatus::Ok,
                reason: None,
                session_id: None,
                discussions: 0,
                outcomes: Vec::new(),
            })
        }
    }

    fn config(max_attempts: u32) -> QueueConfig {
        QueueConfig {
            concurrency: 2,
            max_attempts,
            backoff: Duration::from_millis(1),
            capacity: 8,
            retention: Duration::from_secs(3600),
            max_finished: 100,
        }
    }

    /// Waits until the registry holds at most `expected` records.
    async fn settle(queue: &JobQueue, expected: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.tracked_jobs() > expected && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        queue.tracked_jobs()
    }

    fn job() -> ConversationJob {
        ConversationJob::new(JobKind::ProcessNewConversation, "conv-1")
    }

    #[tokio::test]
    async fn test_retryable_errors_are_retried_until_success() {
        let handler = Arc::new(FlakyHandler { failures: 2, retryable: true, calls: AtomicU32::new(0) });
        let queue = JobQueue::start(handler.clone(), config(3));
        let id = queue.enqueue(job()).unwrap();

        let record = queue.wait_for(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.report.unwrap().status, JobStatus::Ok);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_fails_the_job() {
        let handler = Arc::new(FlakyHandler { failures: 10, retryable: true, calls: AtomicU32::new(0) });
        let queue = JobQueue::start(handler.clone(), config(2));
        let id = queue.enqueue(job()).unwrap();

        let record = queue.wait_for(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(record.error.unwrap().contains("503"));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_retryable_errors_are_dead_lettered_immediately() {
        let handler = Arc::new(FlakyHandler { failures: 1, retryable: false, calls: AtomicU32::new(0) });
        let queue = JobQueue::start(handler.clone(), config(3));
        let id = queue.enqueue(job()).unwrap();

        let record = queue.wait_for(&id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(record.state, JobState::DeadLettered);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.report.unwrap().reason.as_deref(), Some("validation"));
        queue.shutdown().await;
    }

    #[test]
    fn test_backoff_doubles_with_bounded_jitter() {
        let base = Duration::from_millis(1000);
        for (attempt, expected) in [(1, 1000u64), (2, 2000), (3, 4000)] {
            let delay = backoff_delay(base, attempt).as_millis() as u64;
            assert!(delay >= expected && delay <= expected + expected / 10, "attempt {attempt}: {delay}");
        }
        assert_eq!(backoff_delay(Duration::from_millis(5), 1), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_finished_jobs_past_retention_are_evicted() {
        let handler = Arc::new(FlakyHandler { failures: 0, retryable: true, calls: AtomicU32::new(0) });
        let queue = JobQueue::start(handler.clone(), QueueConfig { retention: Duration::ZERO, ..config(1) });
        let ids: Vec<String> = (0..5).map(|_| queue.enqueue(job()).unwrap()).collect();

        assert_eq!(settle(&queue, 0).await, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
        assert!(ids.iter().all(|id| queue.get(id).is_none()));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_registry_keeps_only_the_newest_finished_jobs() {
        let handler = Arc::new(FlakyHandler { failures: 0, retryable: true, calls: AtomicU32::new(0) });
        let queue = JobQueue::start(handler, QueueConfig { concurrency: 1, max_finished: 2, ..config(1) });

        let mut ids = Vec::new();
        for _ in 0..6 {
            let id = queue.enqueue(job()).unwrap();
            queue.wait_for(&id, Duration::from_secs(5)).await.unwrap();
            ids.push(id);
        }

        assert_eq!(settle(&queue, 2).await, 2);
        assert!(queue.get(&ids[0]).is_none());
        assert!(queue.get(&ids[5]).is_some());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_job_and_closed_queue() {
        let handler = Arc::new(FlakyHandler { failures: 0, retryable: true, calls: AtomicU32::new(0) });
        let queue = JobQueue::start(handler, config(1));
        assert!(queue.get("nope").is_none());
        assert!(queue.wait_for("nope", Duration::from_millis(10)).await.is_none());
        queue.shutdown().await;
    }
}
