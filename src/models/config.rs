use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::parser::ParseOptions;
use crate::pool::WorkerPoolConfig;

/// Top-level configuration for the orchestration engine.
///
/// Every field has a serde default so hosts can supply a partial document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Base directory under which each job gets its own `task_{id}` output dir.
    #[serde(default = "default_output_base_dir")]
    pub output_base_dir: PathBuf,
    /// Wall-clock budget for one external tool invocation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How long a cancelled process gets to exit after the terminate signal
    /// before it is force-killed.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    /// Error messages longer than this are truncated before storage.
    #[serde(default = "default_max_error_len")]
    pub max_error_len: usize,
    #[serde(default)]
    pub pool: WorkerPoolConfig,
    /// Tunables applied when interpreting tool output tables.
    #[serde(default)]
    pub parse: ParseOptions,
    #[serde(default)]
    pub prophage: ProphageToolConfig,
    #[serde(default)]
    pub resistance: ResistanceToolConfig,
}

fn default_output_base_dir() -> PathBuf {
    PathBuf::from("./genome_outputs")
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_cancel_grace_secs() -> u64 {
    5
}

fn default_max_error_len() -> usize {
    2000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            output_base_dir: default_output_base_dir(),
            timeout_secs: default_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            max_error_len: default_max_error_len(),
            pool: WorkerPoolConfig::default(),
            parse: ParseOptions::default(),
            prophage: ProphageToolConfig::default(),
            resistance: ResistanceToolConfig::default(),
        }
    }
}

/// Command template for the containerized prophage-detection tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProphageToolConfig {
    #[serde(default = "default_prophage_image")]
    pub image: String,
    /// Container mount point for the (read-only) input directory.
    #[serde(default = "default_input_mount")]
    pub input_mount: String,
    /// Container mount point for the output parent directory.
    #[serde(default = "default_output_mount")]
    pub output_mount: String,
    /// Host path of the tool's reference database directory. Its parent is
    /// mounted so the tool can write version metadata next to it.
    #[serde(default = "default_database_dir")]
    pub database_dir: PathBuf,
    /// Container mount point for the database parent directory.
    #[serde(default = "default_database_mount")]
    pub database_mount: String,
    /// Workload split factor passed when the caller does not override it;
    /// keeps the memory-hungry tool within budget.
    #[serde(default = "default_splits")]
    pub default_splits: u32,
}

fn default_prophage_image() -> String {
    "antoniopcamargo/genomad:latest".to_string()
}

fn default_input_mount() -> String {
    "/input".to_string()
}

fn default_output_mount() -> String {
    "/output".to_string()
}

fn default_database_dir() -> PathBuf {
    PathBuf::from("./genomad_db")
}

fn default_database_mount() -> String {
    "/genomad_db".to_string()
}

fn default_splits() -> u32 {
    8
}

impl Default for ProphageToolConfig {
    fn default() -> Self {
        Self {
            image: default_prophage_image(),
            input_mount: default_input_mount(),
            output_mount: default_output_mount(),
            database_dir: default_database_dir(),
            database_mount: default_database_mount(),
            default_splits: default_splits(),
        }
    }
}

/// Command template for the containerized resistance-gene predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResistanceToolConfig {
    #[serde(default = "default_resistance_image")]
    pub image: String,
    #[serde(default = "default_input_mount")]
    pub input_mount: String,
    #[serde(default = "default_output_mount")]
    pub output_mount: String,
    /// Model directory inside the image.
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_use_gpu")]
    pub use_gpu: bool,
}

fn default_resistance_image() -> String {
    "arg-predictor:latest".to_string()
}

fn default_model_path() -> String {
    "/app/models".to_string()
}

fn default_use_gpu() -> bool {
    true
}

impl Default for ResistanceToolConfig {
    fn default() -> Self {
        Self {
            image: default_resistance_image(),
            input_mount: default_input_mount(),
            output_mount: default_output_mount(),
            model_path: default_model_path(),
            use_gpu: default_use_gpu(),
        }
    }
}
