//! Job handlers for each job type.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use docsync_core::{Job, JobPayload, JobType};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
    /// Attempts the dispatcher allows before failing the job for good.
    max_attempts: u32,
    /// Progress callback for updating job progress.
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job) -> Self {
        Self {
            job,
            max_attempts: 1,
            progress_callback: None,
        }
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    /// Get the job payload.
    pub fn payload(&self) -> &JobPayload {
        &self.job.payload
    }

    /// Whether a [`JobResult::Retry`] from this attempt would still be retried.
    pub fn is_final_attempt(&self) -> bool {
        self.job.attempt >= self.max_attempts
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed with an error message.
    Failed(String),
    /// Job should be retried after a delay.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(50, Some("Processing..."));
        ctx.report_progress(100, Some("Done"));
        JobResult::Success(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::SyncRequest;
    use std::sync::{Arc, Mutex};

    fn sync_job() -> Job {
        Job::new(JobPayload::SyncDocument(SyncRequest::new("resources/doc1")))
    }

    #[test]
    fn test_job_context_payload() {
        let ctx = JobContext::new(sync_job());
        match ctx.payload() {
            JobPayload::SyncDocument(req) => assert_eq!(req.document_id, "resources/doc1"),
            other => panic!("Wrong payload: {:?}", other),
        }
    }

    #[test]
    fn test_final_attempt() {
        let ctx = JobContext::new(sync_job()).with_max_attempts(3);
        assert!(!ctx.is_final_attempt());

        let job = sync_job().next_attempt().next_attempt();
        let ctx = JobContext::new(job).with_max_attempts(3);
        assert!(ctx.is_final_attempt());

        // Without a budget every attempt is the last one
        assert!(JobContext::new(sync_job()).is_final_attempt());
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new(JobType::SyncDocument);
        assert_eq!(handler.job_type(), JobType::SyncDocument);
        assert!(handler.can_handle(JobType::SyncDocument));
        assert!(!handler.can_handle(JobType::ArchiveWork));

        let progress = Arc::new(Mutex::new(Vec::new()));
        let sink = progress.clone();
        let ctx = JobContext::new(sync_job()).with_progress_callback(move |percent, _| {
            sink.lock().unwrap().push(percent);
        });

        let result = handler.execute(ctx).await;
        assert!(matches!(result, JobResult::Success(None)));
        assert_eq!(*progress.lock().unwrap(), vec![50, 100]);
    }
}
