//! Genoflow: a bounded orchestration engine for containerized
//! genomic-analysis jobs.
//!
//! Hosts construct an [`Orchestrator`] with a [`JobStore`], an
//! [`InputStore`], and a [`ToolRunner`], then drive it through `submit_job`,
//! `get_job_status`, `cancel_job`, and `get_job_result`. Each job runs one
//! external tool invocation (prophage detection or resistance-gene
//! prediction) inside a docker container, bounded by a fixed worker pool,
//! and its tab-separated output is parsed into typed reports.

pub mod command;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod pool;
pub mod storage;
pub mod supervisor;

pub use errors::GenoflowError;
pub use models::{
    AnalysisJob, AnalysisKind, AnalysisReport, ArgPrediction, Completeness, Gene, InputFile,
    JobStatus, JobSummary, OrchestratorConfig, ProphageToolConfig, ResistanceToolConfig,
    ResultRegion,
};
pub use orchestrator::{JobResult, Orchestrator};
pub use parser::ParseOptions;
pub use pool::{PoolStatus, WorkerPool, WorkerPoolConfig};
pub use storage::{InputStore, JobStore, MemoryInputStore, MemoryJobStore};
pub use supervisor::{MockToolRunner, ProcessOutput, ProcessSupervisor, ToolCommand, ToolRunner};
