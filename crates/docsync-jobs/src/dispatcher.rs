//! Bounded-concurrency job dispatcher.
//!
//! Producers (the change watcher and the work-queue poller) submit jobs
//! through a [`JobSubmitter`]. The dispatcher runs at most
//! `max_concurrent` jobs at a time, enforces a per-job timeout and re-queues
//! jobs whose handler asks for a retry with exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use docsync_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_MAX_ATTEMPTS, JOB_MAX_CONCURRENT, JOB_MAX_RETRY_BACKOFF_SECS,
    JOB_TIMEOUT_SECS,
};
use docsync_core::{Error, Job, JobPayload, JobType, Result};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Delay before retry `attempt` (1-based), doubling up to a cap.
#[inline]
pub fn compute_retry_backoff_seconds(attempt: u32) -> u64 {
    2_u64
        .checked_pow(attempt)
        .unwrap_or(u64::MAX)
        .min(JOB_MAX_RETRY_BACKOFF_SECS)
}

/// Configuration for the job dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of jobs running at once.
    pub max_concurrent: usize,
    /// Attempts before a retryable job fails for good.
    pub max_attempts: u32,
    /// Per-job execution timeout in seconds.
    pub job_timeout_secs: u64,
    /// Whether to run jobs at all.
    pub enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: JOB_MAX_CONCURRENT,
            max_attempts: JOB_MAX_ATTEMPTS,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl DispatcherConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_DISPATCHER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_MAX_ATTEMPTS` | `3` | Attempts before a job fails |
    /// | `JOB_TIMEOUT_SECS` | `300` | Per-job timeout |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_DISPATCHER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(JOB_MAX_CONCURRENT)
            .max(1);

        let max_attempts = std::env::var("JOB_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(JOB_MAX_ATTEMPTS)
            .max(1);

        let job_timeout_secs = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_TIMEOUT_SECS);

        Self {
            max_concurrent,
            max_attempts,
            job_timeout_secs,
            enabled,
        }
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Set the attempt budget per job.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the per-job timeout.
    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the dispatcher.
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    /// A job was accepted from a producer.
    JobQueued { job_id: Uuid, job_type: JobType },
    /// A job attempt was started.
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
        attempt: u32,
    },
    /// Job progress was updated.
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A job attempt failed and the job was scheduled again.
    JobRetrying {
        job_id: Uuid,
        job_type: JobType,
        attempt: u32,
        delay_secs: u64,
        error: String,
    },
    /// A job failed for good.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// Dispatcher started.
    DispatcherStarted,
    /// Dispatcher stopped.
    DispatcherStopped,
}

/// Cloneable handle producers use to queue jobs.
#[derive(Clone)]
pub struct JobSubmitter {
    job_tx: mpsc::Sender<Job>,
    event_tx: broadcast::Sender<DispatcherEvent>,
}

impl JobSubmitter {
    /// A submitter and the receiving end of its queue, without a dispatcher.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (job_tx, job_rx) = mpsc::channel(capacity.max(1));
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        (Self { job_tx, event_tx }, job_rx)
    }

    /// Queue a job. Waits while the queue is full.
    pub async fn submit(&self, payload: JobPayload) -> Result<Uuid> {
        let job = Job::new(payload);
        let (job_id, job_type) = (job.id, job.job_type());
        self.job_tx
            .send(job)
            .await
            .map_err(|_| Error::Internal("Job dispatcher is not accepting jobs".into()))?;
        debug!(%job_id, %job_type, "Queued job");
        let _ = self
            .event_tx
            .send(DispatcherEvent::JobQueued { job_id, job_type });
        Ok(job_id)
    }
}

/// Handle for controlling a running dispatcher.
///
/// Dropping the handle stops the dispatcher the same way [`Self::shutdown`]
/// does.
pub struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<DispatcherEvent>,
    submitter: JobSubmitter,
}

impl DispatcherHandle {
    /// Signal the dispatcher to stop taking jobs and drain running ones.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for dispatcher events.
    pub fn events(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.event_rx.resubscribe()
    }

    /// Submitter feeding this dispatcher.
    pub fn submitter(&self) -> JobSubmitter {
        self.submitter.clone()
    }
}

type HandlerMap = Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>;

/// Dispatcher that runs submitted jobs on a bounded pool.
pub struct JobDispatcher {
    config: DispatcherConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<DispatcherEvent>,
    job_tx: mpsc::Sender<Job>,
    job_rx: mpsc::Receiver<Job>,
}

impl JobDispatcher {
    /// Create a new dispatcher.
    pub fn new(config: DispatcherConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (job_tx, job_rx) = mpsc::channel(EVENT_BUS_CAPACITY);
        Self {
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            job_tx,
            job_rx,
        }
    }

    /// Register a handler for a job type.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let job_type = handler.job_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(job_type, Arc::new(handler));
        debug!(%job_type, "Registered job handler");
    }

    /// Submitter feeding this dispatcher. Jobs submitted before
    /// [`Self::start`] are kept until it runs.
    pub fn submitter(&self) -> JobSubmitter {
        JobSubmitter {
            job_tx: self.job_tx.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    /// Get a receiver for dispatcher events.
    pub fn events(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.event_tx.subscribe()
    }

    /// Start the dispatcher and return a handle for control.
    pub fn start(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let submitter = self.submitter();

        tokio::spawn(self.run(shutdown_rx));

        DispatcherHandle {
            shutdown_tx,
            event_rx,
            submitter,
        }
    }

    /// Take jobs off the queue while a pool slot is free.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job dispatcher is disabled, not starting");
            let _ = self.event_tx.send(DispatcherEvent::DispatcherStopped);
            return;
        }

        info!(
            max_concurrent = self.config.max_concurrent,
            max_attempts = self.config.max_attempts,
            job_timeout_secs = self.config.job_timeout_secs,
            "Job dispatcher started"
        );

        let _ = self.event_tx.send(DispatcherEvent::DispatcherStarted);

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Job dispatcher received shutdown signal");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Job dispatcher received shutdown signal");
                    break;
                }
                job = self.job_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = ?e, "Job task panicked");
                }
            }

            let runner = self.runner();
            tasks.spawn(async move {
                let _permit = permit;
                runner.execute_job(job).await;
            });
        }

        if !tasks.is_empty() {
            info!(running = tasks.len(), "Draining running jobs");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Job task panicked");
            }
        }

        let _ = self.event_tx.send(DispatcherEvent::DispatcherStopped);
        info!("Job dispatcher stopped");
    }

    /// Clone references needed for spawned job tasks.
    fn runner(&self) -> JobRunner {
        JobRunner {
            config: self.config.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            job_tx: self.job_tx.clone(),
        }
    }
}

/// Lightweight reference bundle for executing a single job in a spawned task.
struct JobRunner {
    config: DispatcherConfig,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<DispatcherEvent>,
    job_tx: mpsc::Sender<Job>,
}

impl JobRunner {
    /// Execute one attempt of a job.
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type();
        let attempt = job.attempt;

        info!(%job_id, %job_type, attempt, "Processing job");

        let _ = self.event_tx.send(DispatcherEvent::JobStarted {
            job_id,
            job_type,
            attempt,
        });

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job_type).cloned()
        };

        let result = match handler {
            Some(handler) => {
                let event_tx = self.event_tx.clone();
                let ctx = JobContext::new(job.clone())
                    .with_max_attempts(self.config.max_attempts)
                    .with_progress_callback(move |percent, message| {
                        let _ = event_tx.send(DispatcherEvent::JobProgress {
                            job_id,
                            percent,
                            message: message.map(String::from),
                        });
                    });

                let job_timeout = Duration::from_secs(self.config.job_timeout_secs);
                match tokio::time::timeout(job_timeout, handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            %job_id,
                            %job_type,
                            "Job exceeded timeout of {}s",
                            self.config.job_timeout_secs
                        );
                        JobResult::Failed(format!(
                            "Job exceeded timeout of {}s",
                            self.config.job_timeout_secs
                        ))
                    }
                }
            }
            None => {
                warn!(%job_type, "No handler registered for job type");
                JobResult::Failed(format!("No handler for job type: {}", job_type))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            JobResult::Success(_) => {
                info!(%job_id, %job_type, duration_ms, "Job completed successfully");
                let _ = self
                    .event_tx
                    .send(DispatcherEvent::JobCompleted { job_id, job_type });
            }
            JobResult::Retry(error) if attempt < self.config.max_attempts => {
                let delay_secs = compute_retry_backoff_seconds(attempt);
                warn!(
                    %job_id,
                    %job_type,
                    attempt,
                    delay_secs,
                    %error,
                    duration_ms,
                    "Job attempt failed, retrying"
                );
                let _ = self.event_tx.send(DispatcherEvent::JobRetrying {
                    job_id,
                    job_type,
                    attempt,
                    delay_secs,
                    error,
                });
                let job_tx = self.job_tx;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                    if job_tx.send(job.next_attempt()).await.is_err() {
                        debug!(%job_id, "Dispatcher gone, dropping retry");
                    }
                });
            }
            JobResult::Retry(error) => {
                let error = format!("{} (gave up after {} attempts)", error, attempt);
                self.fail(job_id, job_type, error, duration_ms);
            }
            JobResult::Failed(error) => {
                self.fail(job_id, job_type, error, duration_ms);
            }
        }
    }

    fn fail(&self, job_id: Uuid, job_type: JobType, error: String, duration_ms: u64) {
        error!(%job_id, %job_type, %error, duration_ms, "Job failed");
        let _ = self.event_tx.send(DispatcherEvent::JobFailed {
            job_id,
            job_type,
            error,
        });
    }
}

/// Builder for creating a dispatcher with handlers.
#[derive(Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    handlers: Vec<Box<dyn JobHandler>>,
}

impl DispatcherBuilder {
    /// Create a new dispatcher builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dispatcher configuration.
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Build and return the dispatcher.
    pub async fn build(self) -> JobDispatcher {
        let dispatcher = JobDispatcher::new(self.config);

        for handler in self.handlers {
            let job_type = handler.job_type();
            let mut handlers = dispatcher.handlers.write().await;
            handlers.insert(job_type, Arc::from(handler));
        }

        dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::SyncRequest;

    #[test]
    fn test_dispatcher_config_default() {
        let config = DispatcherConfig::default();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.job_timeout_secs, 300);
        assert!(config.enabled);
    }

    #[test]
    fn test_dispatcher_config_builder() {
        let config = DispatcherConfig::default()
            .with_max_concurrent(8)
            .with_max_attempts(5)
            .with_job_timeout(30)
            .with_enabled(false);

        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.job_timeout_secs, 30);
        assert!(!config.enabled);
    }

    #[test]
    fn test_dispatcher_config_floors() {
        let config = DispatcherConfig::default()
            .with_max_concurrent(0)
            .with_max_attempts(0);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn test_retry_backoff_doubles_then_caps() {
        assert_eq!(compute_retry_backoff_seconds(0), 1);
        assert_eq!(compute_retry_backoff_seconds(1), 2);
        assert_eq!(compute_retry_backoff_seconds(2), 4);
        assert_eq!(compute_retry_backoff_seconds(8), 256);
        assert_eq!(compute_retry_backoff_seconds(9), JOB_MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(200), JOB_MAX_RETRY_BACKOFF_SECS);
    }

    #[test]
    fn test_dispatcher_event_retrying() {
        let job_id = Uuid::new_v4();
        let event = DispatcherEvent::JobRetrying {
            job_id,
            job_type: JobType::ArchiveWork,
            attempt: 2,
            delay_secs: 4,
            error: "502".into(),
        };

        match event {
            DispatcherEvent::JobRetrying {
                job_id: id,
                attempt,
                delay_secs,
                ..
            } => {
                assert_eq!(id, job_id);
                assert_eq!(attempt, 2);
                assert_eq!(delay_secs, 4);
            }
            _ => panic!("Wrong event variant"),
        }
    }

    #[tokio::test]
    async fn test_submitter_channel() {
        let (submitter, mut rx) = JobSubmitter::channel(4);
        let payload = JobPayload::SyncDocument(SyncRequest::new("resources/doc1"));
        let job_id = submitter.submit(payload.clone()).await.unwrap();

        let job = rx.recv().await.unwrap();
        assert_eq!(job.id, job_id);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.payload, payload);
    }

    #[tokio::test]
    async fn test_submit_after_receiver_dropped_fails() {
        let (submitter, rx) = JobSubmitter::channel(1);
        drop(rx);
        let err = submitter
            .submit(JobPayload::SyncDocument(SyncRequest::new("resources/doc1")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_builder_registers_handlers() {
        let dispatcher = DispatcherBuilder::new()
            .with_handler(crate::handler::NoOpHandler::new(JobType::SyncDocument))
            .build()
            .await;
        let handlers = dispatcher.handlers.read().await;
        assert!(handlers.contains_key(&JobType::SyncDocument));
        assert!(!handlers.contains_key(&JobType::ArchiveWork));
    }
}
