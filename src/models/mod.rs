pub mod config;
pub mod input;
pub mod job;
pub mod region;

pub use config::{OrchestratorConfig, ProphageToolConfig, ResistanceToolConfig};
pub use input::InputFile;
pub use job::{AnalysisJob, AnalysisKind, JobStatus, JobSummary};
pub use region::{AnalysisReport, ArgPrediction, Completeness, Gene, ResultRegion};
