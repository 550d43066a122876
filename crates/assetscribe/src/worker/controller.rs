//! Job lifecycle: claim, process, heartbeat, finalize, clean up.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::WorkerConfig;
use crate::pipeline::{
    BroadcastProgress, JobPhase, JobProgressEvent, Pipeline, PipelineContext, PipelineError,
    PipelineOutcome, ProgressEvent, ProgressReporter,
};
use crate::store::{JobStore, StoreError};
use crate::workspace::WorkspaceManager;

use super::heartbeat::Heartbeat;
use super::job::{JobStatus, ProcessingJob};

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Tries at recording a terminal status before the job is abandoned.
const FINISH_ATTEMPTS: u32 = 3;
const FINISH_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// How a single job run ended, from this worker's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Transcript saved and job marked completed.
    Completed,
    /// Unsupported asset; job marked completed without content.
    Skipped,
    /// Job marked failed with this message.
    Failed(String),
    /// Another worker claimed the job first.
    ClaimConflict,
    /// The job left processing while it was running; nothing was written.
    LeaseLost,
    /// A store error left the job as it was.
    Abandoned(String),
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub max_job_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl From<&WorkerConfig> for ControllerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            max_job_attempts: config.max_job_attempts,
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

/// Runs one job from claim to terminal state.
#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<Pipeline>,
    workspaces: Arc<WorkspaceManager>,
    max_job_attempts: u32,
    heartbeat_interval: Duration,
    progress: broadcast::Sender<JobProgressEvent>,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<Pipeline>,
        workspaces: Arc<WorkspaceManager>,
        settings: &ControllerSettings,
        progress: broadcast::Sender<JobProgressEvent>,
    ) -> Self {
        Self {
            jobs,
            pipeline,
            workspaces,
            max_job_attempts: settings.max_job_attempts,
            heartbeat_interval: settings.heartbeat_interval,
            progress,
        }
    }

    pub async fn run_job(&self, job: ProcessingJob) -> JobOutcome {
        let span = info_span!("job", job_id = %job.id, asset_id = %job.asset_id);
        self.run_job_inner(job).instrument(span).await
    }

    async fn run_job_inner(&self, job: ProcessingJob) -> JobOutcome {
        let job = match self.jobs.claim(&job, Utc::now()).await {
            Ok(claimed) => claimed,
            Err(StoreError::ClaimConflict { .. }) => {
                debug!("Job already claimed elsewhere, skipping");
                return JobOutcome::ClaimConflict;
            }
            Err(e) => {
                warn!("Failed to claim job: {}", e);
                return JobOutcome::Abandoned(e.to_string());
            }
        };

        let progress = BroadcastProgress::new(&job.id, &job.asset_id, self.progress.clone());
        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Claimed,
            message: format!("Claimed (attempt {})", job.attempts),
        });
        info!(attempt = job.attempts, "Claimed job");

        if job.attempts > self.max_job_attempts {
            let message = format!(
                "exceeded maximum attempts ({} of {})",
                job.attempts, self.max_job_attempts
            );
            warn!("{}", message);
            progress.report(ProgressEvent::Failed {
                error: message.clone(),
            });
            return self.finish(&job.id, JobStatus::Failed, Some(message)).await;
        }

        let workspace = match self.workspaces.acquire(&job.id).await {
            Ok(ws) => ws,
            Err(e) => {
                let message = PipelineError::Workspace(e).to_string();
                error!("{}", message);
                progress.report(ProgressEvent::Failed {
                    error: message.clone(),
                });
                return self.finish(&job.id, JobStatus::Failed, Some(message)).await;
            }
        };

        let (heartbeat, mut lease_lost) =
            Heartbeat::start(self.jobs.clone(), &job.id, self.heartbeat_interval);

        let mut ctx = PipelineContext::new(job.clone());
        let result = tokio::select! {
            result = self.pipeline.run(&mut ctx, &workspace, &progress) => Ok(result),
            Ok(lost) = &mut lease_lost => Err(lost),
        };

        // In-flight work is gone by now; stop the lease and clean up first.
        heartbeat.stop();
        if let Err(e) = workspace.release().await {
            warn!("Failed to release workspace: {}", e);
        }

        match result {
            Err(lost) => {
                warn!("Abandoned job after losing its lease: {}", lost.reason);
                progress.report(ProgressEvent::Failed { error: lost.reason });
                JobOutcome::LeaseLost
            }
            Ok(Ok(PipelineOutcome::Transcribed { .. })) => {
                self.finish(&job.id, JobStatus::Completed, None).await
            }
            Ok(Ok(PipelineOutcome::Skipped { .. })) => {
                match self.finish(&job.id, JobStatus::Completed, None).await {
                    JobOutcome::Completed => JobOutcome::Skipped,
                    other => other,
                }
            }
            Ok(Err(e)) => {
                error!("Job failed: {}", e);
                self.finish(&job.id, JobStatus::Failed, Some(e.to_string())).await
            }
        }
    }

    /// Marks a job whose task panicked as failed.
    pub async fn fail_after_panic(&self, job_id: &str, panic: &str) -> JobOutcome {
        let span = info_span!("job", job_id = %job_id);
        let message = format!("Job task panicked: {}", panic);
        self.finish(job_id, JobStatus::Failed, Some(message))
            .instrument(span)
            .await
    }

    /// Moves the job to a terminal status and maps the store's answer.
    /// Transient store errors are retried with a doubling backoff.
    async fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<String>,
    ) -> JobOutcome {
        let mut backoff = FINISH_RETRY_BACKOFF;
        let mut attempt = 1;
        loop {
            match self
                .jobs
                .finish(job_id, status, error_message.as_deref())
                .await
            {
                Ok(()) => {
                    info!(status = %status, "Job finished");
                    return match (status, error_message) {
                        (JobStatus::Failed, message) => {
                            JobOutcome::Failed(message.unwrap_or_default())
                        }
                        _ => JobOutcome::Completed,
                    };
                }
                Err(e @ (StoreError::Conflict { .. } | StoreError::NotFound { .. })) => {
                    warn!("Job moved on before it could be finished: {}", e);
                    return JobOutcome::LeaseLost;
                }
                Err(e) if e.is_transient() && attempt < FINISH_ATTEMPTS => {
                    warn!(
                        attempt,
                        "Failed to record job status {}, retrying in {:?}: {}", status, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    error!("Failed to record job status {}: {}", status, e);
                    return JobOutcome::Abandoned(e.to_string());
                }
            }
        }
    }
}

/// Polls the job store and runs pending jobs concurrently.
pub struct JobController {
    jobs: Arc<dyn JobStore>,
    runner: JobRunner,
    settings: ControllerSettings,
    shutdown: Arc<AtomicBool>,
    progress: broadcast::Sender<JobProgressEvent>,
}

type JobTaskResult = (String, Result<JobOutcome, String>);

impl JobController {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<Pipeline>,
        workspaces: WorkspaceManager,
        settings: ControllerSettings,
    ) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        let runner = JobRunner::new(
            jobs.clone(),
            pipeline,
            Arc::new(workspaces),
            &settings,
            progress.clone(),
        );
        Self {
            jobs,
            runner,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
            progress,
        }
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Receives progress events of every job this controller runs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.progress.subscribe()
    }

    /// Flag that stops the loop when set; shareable with signal handlers.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        info!("Shutting down job controller...");
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Polls until shutdown, then waits for running jobs.
    pub async fn run(&self) {
        info!(
            max_concurrent_jobs = self.settings.max_concurrent_jobs,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Job controller started"
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tasks: JoinSet<JobTaskResult> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();

        loop {
            if self.is_shutdown() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if !self.is_shutdown() {
                        self.dispatch(&mut tasks, &mut in_flight).await;
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    self.reap(joined, &mut in_flight).await;
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} running jobs", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            self.reap(joined, &mut in_flight).await;
        }
        info!("Job controller stopped");
    }

    /// One poll: runs the currently pending jobs (up to the concurrency
    /// limit) and waits for them.
    pub async fn run_once(&self) -> Vec<JobOutcome> {
        let mut tasks: JoinSet<JobTaskResult> = JoinSet::new();
        let mut in_flight = HashSet::new();
        self.dispatch(&mut tasks, &mut in_flight).await;

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Some(outcome) = self.reap(joined, &mut in_flight).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    async fn dispatch(&self, tasks: &mut JoinSet<JobTaskResult>, in_flight: &mut HashSet<String>) {
        // Finished tasks still count toward `len()` until joined.
        while let Some(joined) = tasks.try_join_next() {
            self.reap(joined, in_flight).await;
        }

        let jobs = match self.jobs.list_active().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Failed to list jobs: {}", e);
                return;
            }
        };

        for job in jobs.into_iter().filter(|j| j.status == JobStatus::Pending) {
            if tasks.len() >= self.settings.max_concurrent_jobs {
                break;
            }
            if !in_flight.insert(job.id.clone()) {
                continue;
            }

            debug!(job_id = %job.id, "Dispatching job");
            let runner = self.runner.clone();
            let job_id = job.id.clone();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(runner.run_job(job))
                    .catch_unwind()
                    .await
                    .map_err(panic_message);
                (job_id, outcome)
            });
        }
    }

    async fn reap(
        &self,
        joined: Result<JobTaskResult, JoinError>,
        in_flight: &mut HashSet<String>,
    ) -> Option<JobOutcome> {
        match joined {
            Ok((job_id, Ok(outcome))) => {
                in_flight.remove(&job_id);
                debug!(job_id = %job_id, ?outcome, "Job task finished");
                Some(outcome)
            }
            Ok((job_id, Err(panic))) => {
                error!(job_id = %job_id, "Job task panicked: {}", panic);
                let outcome = self.runner.fail_after_panic(&job_id, &panic).await;
                in_flight.remove(&job_id);
                Some(outcome)
            }
            Err(e) => {
                error!("Job task did not complete: {}", e);
                None
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
