use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::command::build_tool_command;
use crate::errors::GenoflowError;
use crate::models::{
    AnalysisJob, AnalysisKind, AnalysisReport, InputFile, JobStatus, JobSummary,
    OrchestratorConfig,
};
use crate::parser::{self, ParseOptions};
use crate::pool::{PoolStatus, WorkerPool};
use crate::storage::{InputStore, JobStore};
use crate::supervisor::{ProcessSupervisor, ToolRunner};

/// Result payload for a completed job: the stored summary, the re-parsed
/// report, and a human-readable wall-clock duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub summary: JobSummary,
    pub report: AnalysisReport,
    pub duration: Option<String>,
}

/// Drives jobs through `PENDING -> RUNNING -> {COMPLETED, FAILED, CANCELLED}`.
///
/// Owns the worker pool; the stores and the tool runner are shared seams so
/// hosts can plug in their own persistence and tests can script the tool.
/// Execution errors are captured into the job record, never surfaced to the
/// submitter.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    jobs: Arc<dyn JobStore>,
    inputs: Arc<dyn InputStore>,
    runner: Arc<dyn ToolRunner>,
    pool: Arc<WorkerPool>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        jobs: Arc<dyn JobStore>,
        inputs: Arc<dyn InputStore>,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(&config.pool));
        Self {
            config: Arc::new(config),
            jobs,
            inputs,
            runner,
            pool,
        }
    }

    /// Construct with a [`ProcessSupervisor`] whose grace period comes from
    /// `config.cancel_grace_secs`.
    pub fn with_process_supervisor(
        config: OrchestratorConfig,
        jobs: Arc<dyn JobStore>,
        inputs: Arc<dyn InputStore>,
    ) -> Self {
        let runner = Arc::new(ProcessSupervisor::from_config(&config));
        Self::new(config, jobs, inputs, runner)
    }

    /// Create a PENDING job for `input_file_id` and enqueue its execution.
    ///
    /// Every call creates a fresh job id, including repeat submissions of
    /// the same input by the same owner.
    pub async fn submit_job(
        &self,
        input_file_id: Uuid,
        owner_id: Uuid,
        kind: AnalysisKind,
        parameters: Option<serde_json::Value>,
    ) -> Result<JobSummary, GenoflowError> {
        let input = self.resolve_input(input_file_id, owner_id).await?;

        let name = format!("{} - {}", kind.display_name(), input.original_filename);
        let mut job = AnalysisJob::new(
            owner_id,
            input_file_id,
            kind,
            name,
            parameters,
            std::path::PathBuf::new(),
        );
        job.output_dir = self
            .config
            .output_base_dir
            .join(format!("task_{}", job.id));
        self.jobs.insert(job.clone()).await?;

        tracing::info!("Submitted job {} ({})", job.id, job.name);

        let config = Arc::clone(&self.config);
        let jobs = Arc::clone(&self.jobs);
        let inputs = Arc::clone(&self.inputs);
        let runner = Arc::clone(&self.runner);
        let job_id = job.id;
        self.pool
            .submit(job_id, move |cancel| {
                execute_job(config, jobs, inputs, runner, job_id, cancel)
            })
            .await;

        Ok(JobSummary::from(&job))
    }

    pub async fn get_job(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
    ) -> Result<JobSummary, GenoflowError> {
        let job = self.resolve_job(job_id, owner_id).await?;
        Ok(JobSummary::from(&job))
    }

    pub async fn get_job_status(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
    ) -> Result<JobStatus, GenoflowError> {
        Ok(self.resolve_job(job_id, owner_id).await?.status)
    }

    pub async fn list_jobs(
        &self,
        owner_id: Uuid,
        status: Option<JobStatus>,
    ) -> Result<Vec<JobSummary>, GenoflowError> {
        let jobs = self.jobs.find_by_owner(owner_id, status).await?;
        Ok(jobs.iter().map(JobSummary::from).collect())
    }

    /// Case-insensitive keyword lookup over the owner's job names.
    pub async fn search_jobs(
        &self,
        owner_id: Uuid,
        keyword: &str,
    ) -> Result<Vec<JobSummary>, GenoflowError> {
        let needle = keyword.to_lowercase();
        let jobs = self.jobs.find_by_owner(owner_id, None).await?;
        Ok(jobs
            .iter()
            .filter(|job| job.name.to_lowercase().contains(&needle))
            .map(JobSummary::from)
            .collect())
    }

    /// Cancel a non-terminal job. The pool token always fires; the supervisor
    /// is only involved when the job was actually RUNNING.
    pub async fn cancel_job(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
    ) -> Result<JobSummary, GenoflowError> {
        let job = self.resolve_job(job_id, owner_id).await?;
        if job.status.is_terminal() {
            return Err(GenoflowError::InvalidState(format!(
                "Job {} already finished, cannot cancel",
                job_id
            )));
        }
        let was_running = job.status == JobStatus::Running;

        // The terminal write goes through the same fetch-check-store path
        // as the execution body, so a completion that landed since the read
        // above cannot be overwritten.
        let updated = advance(&self.jobs, job_id, |job| {
            job.status = JobStatus::Cancelled;
            job.completed_at = Some(Utc::now());
        })
        .await?;
        let Some(updated) = updated else {
            return Err(GenoflowError::InvalidState(format!(
                "Job {} already finished, cannot cancel",
                job_id
            )));
        };

        self.pool.cancel(job_id);
        if was_running && self.runner.cancel(job_id).await {
            tracing::info!("Terminate requested for job {} process", job_id);
        }
        tracing::info!("Job {} cancelled", job_id);
        Ok(JobSummary::from(&updated))
    }

    /// Re-parse the preserved output directory of a COMPLETED job.
    pub async fn get_job_result(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
    ) -> Result<JobResult, GenoflowError> {
        let job = self.resolve_job(job_id, owner_id).await?;
        if job.status != JobStatus::Completed {
            return Err(GenoflowError::InvalidState(format!(
                "Job {} is not completed (status {})",
                job_id, job.status
            )));
        }
        let input = self.resolve_input(job.input_file_id, owner_id).await?;
        let report =
            parse_in_background(&job, input.original_filename, self.config.parse.clone()).await?;
        let duration = format_duration(job.started_at, job.completed_at);
        Ok(JobResult {
            summary: JobSummary::from(&job),
            report,
            duration,
        })
    }

    /// Delete the job's output directory. Called when the owning record is
    /// removed externally; missing directories are fine.
    pub async fn remove_job_output(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
    ) -> Result<(), GenoflowError> {
        let job = self.resolve_job(job_id, owner_id).await?;
        match tokio::fs::remove_dir_all(&job.output_dir).await {
            Ok(()) => {
                tracing::info!("Removed output directory for job {}", job_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn queue_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Stop accepting work and wait up to `grace` for in-flight jobs.
    pub async fn shutdown(&self, grace: Duration) {
        self.pool.shutdown(grace).await;
    }

    async fn resolve_job(
        &self,
        job_id: Uuid,
        owner_id: Uuid,
    ) -> Result<AnalysisJob, GenoflowError> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| GenoflowError::NotFound(format!("Job {}", job_id)))?;
        if job.owner_id != owner_id {
            return Err(GenoflowError::Authorization(format!(
                "Job {} does not belong to the requesting user",
                job_id
            )));
        }
        Ok(job)
    }

    async fn resolve_input(
        &self,
        input_file_id: Uuid,
        owner_id: Uuid,
    ) -> Result<InputFile, GenoflowError> {
        let input = self
            .inputs
            .get(input_file_id)
            .await?
            .ok_or_else(|| GenoflowError::NotFound(format!("Input file {}", input_file_id)))?;
        if input.owner_id != owner_id {
            return Err(GenoflowError::Authorization(format!(
                "Input file {} does not belong to the requesting user",
                input_file_id
            )));
        }
        Ok(input)
    }
}

/// Execution body enqueued on the pool. Every error lands in the job record.
async fn execute_job(
    config: Arc<OrchestratorConfig>,
    jobs: Arc<dyn JobStore>,
    inputs: Arc<dyn InputStore>,
    runner: Arc<dyn ToolRunner>,
    job_id: Uuid,
    cancel: CancellationToken,
) {
    if let Err(e) = run_to_completion(&config, &jobs, &inputs, &runner, job_id, &cancel).await {
        capture_failure(&config, &jobs, job_id, e).await;
    }
}

async fn run_to_completion(
    config: &Arc<OrchestratorConfig>,
    jobs: &Arc<dyn JobStore>,
    inputs: &Arc<dyn InputStore>,
    runner: &Arc<dyn ToolRunner>,
    job_id: Uuid,
    cancel: &CancellationToken,
) -> Result<(), GenoflowError> {
    let Some(mut job) = advance(jobs, job_id, |job| {
        job.status = JobStatus::Running;
        job.progress = 10;
        job.started_at = Some(Utc::now());
    })
    .await?
    else {
        return Ok(());
    };
    tracing::info!("Job {} started", job_id);

    let input = inputs
        .get(job.input_file_id)
        .await?
        .ok_or_else(|| GenoflowError::NotFound(format!("Input file {}", job.input_file_id)))?;

    tokio::fs::create_dir_all(&job.output_dir).await?;
    if advance(jobs, job_id, |job| job.progress = 20).await?.is_none() {
        return Ok(());
    }

    let command = build_tool_command(
        job.kind,
        config,
        &input,
        &job.output_dir,
        job.parameters.as_ref(),
    )?;
    // A cancel that landed after the last store check has already marked the
    // job CANCELLED; do not launch the tool for it.
    if cancel.is_cancelled() {
        tracing::info!("Job {} cancelled before the tool launched", job_id);
        return Ok(());
    }

    let timeout = Duration::from_secs(config.timeout_secs);
    let output = runner.run(job_id, command, timeout).await?;
    if !output.success() {
        let stderr_tail: String = output.stderr.chars().rev().take(500).collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return Err(GenoflowError::Internal(format!(
            "Analysis tool exited with code {}: {}",
            output.exit_code,
            stderr_tail.trim()
        )));
    }

    if advance(jobs, job_id, |job| job.progress = 90).await?.is_none() {
        return Ok(());
    }

    let report =
        parse_in_background(&job, input.original_filename, config.parse.clone()).await?;

    // Terminal write re-checks the stored status: a cancel that landed after
    // the process exited still wins, and the parsed results are discarded.
    let written = advance(jobs, job_id, |fresh| {
        fresh.status = JobStatus::Completed;
        fresh.progress = 100;
        fresh.completed_at = Some(Utc::now());
        fresh.genome_length = report.genome_length();
        fresh.region_count = Some(report.record_count());
    })
    .await?;
    match written {
        Some(updated) => {
            job = updated;
            tracing::info!(
                "Job {} completed with {} result records",
                job_id,
                job.region_count.unwrap_or(0)
            );
        }
        None => {
            tracing::info!("Job {} was cancelled before the final write", job_id);
        }
    }
    Ok(())
}

/// Fetch-check-mutate-store: applies `mutate` and persists unless the job is
/// already terminal, in which case nothing is written and `None` signals the
/// caller to stop.
async fn advance(
    jobs: &Arc<dyn JobStore>,
    job_id: Uuid,
    mutate: impl FnOnce(&mut AnalysisJob),
) -> Result<Option<AnalysisJob>, GenoflowError> {
    let Some(mut job) = jobs.get(job_id).await? else {
        return Ok(None);
    };
    if job.status.is_terminal() {
        return Ok(None);
    }
    mutate(&mut job);
    let job = jobs.update(job).await?;
    Ok(Some(job))
}

async fn capture_failure(
    config: &Arc<OrchestratorConfig>,
    jobs: &Arc<dyn JobStore>,
    job_id: Uuid,
    error: GenoflowError,
) {
    tracing::error!("Job {} failed: {}", job_id, error);
    let message: String = error.to_string().chars().take(config.max_error_len).collect();
    let result = advance(jobs, job_id, |job| {
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.error_message = Some(message);
    })
    .await;
    if let Err(e) = result {
        tracing::error!("Could not record failure of job {}: {}", job_id, e);
    }
}

async fn parse_in_background(
    job: &AnalysisJob,
    input_file_name: String,
    options: ParseOptions,
) -> Result<AnalysisReport, GenoflowError> {
    let kind = job.kind;
    let output_dir = job.output_dir.clone();
    tokio::task::spawn_blocking(move || {
        parser::parse_output(kind, &output_dir, &input_file_name, &options)
    })
    .await
    .map_err(|e| GenoflowError::Internal(format!("Parser task failed: {}", e)))?
}

fn format_duration(
    started: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
) -> Option<String> {
    let (started, completed) = (started?, completed?);
    let secs = (completed - started).num_seconds().max(0);
    Some(format!("{}m {}s", secs / 60, secs % 60))
}
