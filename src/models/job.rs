use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of an analysis job.
///
/// `Pending -> Running -> {Completed, Failed, Cancelled}`, with a direct
/// `Pending -> Cancelled` shortcut for jobs cancelled before pickup.
/// The three terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(next, JobStatus::Running | JobStatus::Cancelled),
            JobStatus::Running => matches!(
                next,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// The kind of analysis a job runs, selected once at submission time.
/// Each kind maps to one command builder and one parser branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Prophage,
    ResistanceGene,
}

impl AnalysisKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            AnalysisKind::Prophage => "prophage detection",
            AnalysisKind::ResistanceGene => "resistance gene detection",
        }
    }
}

/// One request to run the external analysis tool against one input file.
///
/// Mutated only by the orchestrator; the worker pool and parser never touch
/// the record directly. The output directory is unique per job and created
/// lazily when execution starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub input_file_id: Uuid,
    pub name: String,
    pub kind: AnalysisKind,
    pub status: JobStatus,
    /// 0-100, non-decreasing while the job is running.
    pub progress: u8,
    pub parameters: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output_dir: PathBuf,
    pub error_message: Option<String>,
    pub genome_length: Option<u64>,
    pub region_count: Option<usize>,
}

impl AnalysisJob {
    /// Create a fresh job in `Pending` with progress 0.
    pub fn new(
        owner_id: Uuid,
        input_file_id: Uuid,
        kind: AnalysisKind,
        name: String,
        parameters: Option<serde_json::Value>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            input_file_id,
            name,
            kind,
            status: JobStatus::Pending,
            progress: 0,
            parameters,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output_dir,
            error_message: None,
            genome_length: None,
            region_count: None,
        }
    }
}

/// Caller-facing view of a job, returned from submission and listing calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub owner_id: Uuid,
    pub input_file_id: Uuid,
    pub name: String,
    pub kind: AnalysisKind,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub genome_length: Option<u64>,
    pub region_count: Option<usize>,
}

impl From<&AnalysisJob> for JobSummary {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            job_id: job.id,
            owner_id: job.owner_id,
            input_file_id: job.input_file_id,
            name: job.name.clone(),
            kind: job.kind,
            status: job.status,
            progress: job.progress,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message.clone(),
            genome_length: job.genome_length,
            region_count: job.region_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_job() -> AnalysisJob {
        AnalysisJob::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            AnalysisKind::Prophage,
            "prophage detection - genome.fna".to_string(),
            Some(serde_json::json!({"min_score": 0.7})),
            PathBuf::from("/tmp/outputs/task_x"),
        )
    }

    #[test]
    fn test_new_job_is_pending_with_zero_progress() {
        let job = make_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_pending_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_running_transitions() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for terminal in [
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} should be rejected",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn test_status_serde_uses_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
        let status: JobStatus = serde_json::from_str("\"RUNNING\"").unwrap();
        assert_eq!(status, JobStatus::Running);
    }

    #[test]
    fn test_job_serde_roundtrip() {
        let job = make_job();
        let json = serde_json::to_string(&job).expect("serialize");
        let back: AnalysisJob = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.id, job.id);
        assert_eq!(back.status, job.status);
        assert_eq!(back.kind, job.kind);
        assert_eq!(back.output_dir, job.output_dir);
        assert_eq!(back.parameters, job.parameters);
    }

    #[test]
    fn test_summary_carries_job_fields() {
        let job = make_job();
        let summary = JobSummary::from(&job);
        assert_eq!(summary.job_id, job.id);
        assert_eq!(summary.owner_id, job.owner_id);
        assert_eq!(summary.status, JobStatus::Pending);
        assert_eq!(summary.name, job.name);
    }

    #[test]
    fn test_kind_display_names() {
        assert_eq!(AnalysisKind::Prophage.display_name(), "prophage detection");
        assert_eq!(
            AnalysisKind::ResistanceGene.display_name(),
            "resistance gene detection"
        );
    }
}
