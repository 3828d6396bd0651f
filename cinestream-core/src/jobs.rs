use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::ErrorKind;
use crate::media::{MediaError, TranscodeOutcome, Transcoder};
use crate::store::{SqliteStore, StoreError, TranscodeJob};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("transcode job {job_id} failed: {source}")]
    Media {
        job_id: i64,
        #[source]
        source: MediaError,
    },
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Store(err) => err.kind(),
            JobError::Media { source, .. } => source.kind(),
        }
    }
}

pub type JobResult<T> = std::result::Result<T, JobError>;

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: TranscodeJob,
    pub outcome: Option<TranscodeOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Drains the transcode queue. Failures are recorded on the job row and
/// logged; they never propagate to whoever enqueued the job.
pub struct TranscodeWorker {
    store: SqliteStore,
    transcoder: Arc<Transcoder>,
    wakeup: Arc<Notify>,
    stale_after: Duration,
}

const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(2 * 60 * 60);

impl TranscodeWorker {
    pub fn new(store: SqliteStore, transcoder: Arc<Transcoder>) -> Self {
        Self {
            store,
            transcoder,
            wakeup: Arc::new(Notify::new()),
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// How long a `running` job may go untouched before the loop re-arms it.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Puts jobs orphaned by a dead worker back in the queue.
    pub fn recover_stale(&self) -> JobResult<usize> {
        let cutoff = chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or_else(Utc::now);
        let recovered = self.store.requeue_stale(cutoff, None)?;
        if recovered > 0 {
            warn!(recovered, "re-queued stale transcode jobs");
        }
        Ok(recovered)
    }

    /// Handle used by the write path to wake an idle worker after enqueuing.
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    pub async fn run_once(&self) -> JobResult<Option<JobReport>> {
        let Some(job) = self.store.claim_next_job()? else {
            debug!("transcode queue empty");
            return Ok(None);
        };
        info!(job_id = job.id, content_id = job.content_id, attempt = job.attempts, "transcode job started");

        match self.transcoder.transcode_content(job.content_id).await {
            Ok(outcome) => {
                self.store.complete_job(job.id)?;
                Ok(Some(JobReport {
                    job,
                    outcome: Some(outcome),
                    error: None,
                }))
            }
            Err(err) => {
                let message = err.to_string();
                error!(job_id = job.id, content_id = job.content_id, error = %message, "transcode job failed");
                self.store.fail_job(job.id, &message)?;
                Ok(Some(JobReport {
                    job,
                    outcome: None,
                    error: Some(message),
                }))
            }
        }
    }

    pub async fn run_pending(&self) -> JobResult<WorkerSummary> {
        let mut summary = WorkerSummary::default();
        while let Some(report) = self.run_once().await? {
            summary.processed += 1;
            if report.error.is_some() {
                summary.failed += 1;
            } else {
                summary.succeeded += 1;
            }
        }
        Ok(summary)
    }

    /// Runs until `shutdown` resolves, sleeping between empty polls.
    pub async fn run_forever<F>(&self, poll: Duration, shutdown: F)
    where
        F: std::future::Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            if let Err(err) = self.recover_stale() {
                warn!(error = %err, "stale job recovery failed");
            }
            match self.run_pending().await {
                Ok(summary) if summary.processed > 0 => {
                    info!(processed = summary.processed, failed = summary.failed, "transcode batch finished");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "transcode worker error"),
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}
