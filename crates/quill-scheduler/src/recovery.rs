//! Stuck-job recovery.
//!
//! Runs at the start of every tick. Jobs left `running` past the staleness
//! threshold and jobs that failed transiently go back to `pending` until
//! their retry budget is spent.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use quill_store::{Job, JobId, JobPatch, JobStatus, Store};

use crate::{AutopilotConfig, Clock, SchedulerError};

/// What one recovery pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Stale `running` jobs returned to `pending`.
    pub reclaimed: usize,
    /// `failed` jobs returned to `pending`.
    pub retried: usize,
    /// Jobs that ran out of retries during this pass.
    pub abandoned: usize,
}

/// Resets stuck and failed jobs.
pub struct Recovery {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: AutopilotConfig,
}

impl Recovery {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: AutopilotConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Whether recovery has given up on `job`.
    pub fn is_abandoned(&self, job: &Job) -> bool {
        job.retries > self.config.max_retries
    }

    /// Run both passes: timeout reclaim, then failed-job retry.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        let mut report = RecoveryReport::default();
        self.reclaim_stale(&mut report).await?;
        self.retry_failed(&mut report).await?;

        if report != RecoveryReport::default() {
            info!(
                reclaimed = report.reclaimed,
                retried = report.retried,
                abandoned = report.abandoned,
                "recovered jobs"
            );
        }
        Ok(report)
    }

    async fn reclaim_stale(&self, report: &mut RecoveryReport) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        let running = self.store.list_jobs_by_status(JobStatus::Running).await?;

        for job in running {
            if self.is_abandoned(&job) || !job.is_stale(now, self.config.stale_after) {
                continue;
            }

            let retries = job.retries + 1;
            let minutes = (now - job.updated_at).num_minutes();
            if retries <= self.config.max_retries {
                self.store
                    .patch_job(
                        job.id,
                        JobPatch::at(now)
                            .status(JobStatus::Pending)
                            .retries(retries)
                            .error(format!(
                                "reclaimed after {} minutes without progress (retry {}/{})",
                                minutes, retries, self.config.max_retries
                            )),
                    )
                    .await?;
                debug!(job_id = %job.id, kind = %job.kind(), retries, "reclaimed stale job");
                report.reclaimed += 1;
            } else {
                // Stays running so the operator can see where it died
                self.store
                    .patch_job(
                        job.id,
                        JobPatch::at(now).retries(retries).error(format!(
                            "abandoned after {} stale runs; requeue manually",
                            retries
                        )),
                    )
                    .await?;
                warn!(job_id = %job.id, kind = %job.kind(), retries, "abandoned stale job");
                report.abandoned += 1;
            }
        }
        Ok(())
    }

    async fn retry_failed(&self, report: &mut RecoveryReport) -> Result<(), SchedulerError> {
        let now = self.clock.now();
        let failed = self.store.list_jobs_by_status(JobStatus::Failed).await?;

        for job in failed {
            // Rows without a failure kind predate the tag and count as transient
            let retryable = job.failure.is_none_or(|kind| kind.should_retry());
            if !retryable || self.is_abandoned(&job) {
                continue;
            }

            let retries = job.retries + 1;
            if retries <= self.config.max_retries {
                self.store
                    .patch_job(
                        job.id,
                        JobPatch::at(now).status(JobStatus::Pending).retries(retries),
                    )
                    .await?;
                debug!(job_id = %job.id, kind = %job.kind(), retries, "retrying failed job");
                report.retried += 1;
            } else {
                self.store
                    .patch_job(job.id, JobPatch::at(now).retries(retries))
                    .await?;
                warn!(
                    job_id = %job.id,
                    kind = %job.kind(),
                    error = job.error.as_deref().unwrap_or(""),
                    "job failed permanently after retries"
                );
                report.abandoned += 1;
            }
        }
        Ok(())
    }

    /// Put a failed or abandoned job back in the queue with a fresh retry budget.
    ///
    /// Returns `false` if the job is not in a state an operator should reset.
    #[tracing::instrument(skip(self))]
    pub async fn requeue(&self, id: JobId) -> Result<bool, SchedulerError> {
        let job = self
            .store
            .get_job(id)
            .await?
            .ok_or(SchedulerError::JobNotFound(id))?;

        let resettable = match job.status {
            JobStatus::Failed => true,
            JobStatus::Running => self.is_abandoned(&job),
            JobStatus::Pending | JobStatus::Done => false,
        };
        if !resettable {
            return Ok(false);
        }

        self.store
            .patch_job(
                id,
                JobPatch::at(self.clock.now())
                    .status(JobStatus::Pending)
                    .retries(0)
                    .clear_error()
                    .clear_failure(),
            )
            .await?;
        info!(job_id = %id, "requeued job");
        Ok(true)
    }
}
