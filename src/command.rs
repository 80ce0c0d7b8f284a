use std::path::Path;

use crate::errors::GenoflowError;
use crate::models::{AnalysisKind, InputFile, OrchestratorConfig};
use crate::supervisor::ToolCommand;

/// Build the container invocation for one job.
///
/// The input file's parent directory is mounted read-only, the job's output
/// directory is mounted writable, and everything is passed as argv. No shell
/// is involved anywhere.
pub fn build_tool_command(
    kind: AnalysisKind,
    config: &OrchestratorConfig,
    input: &InputFile,
    output_dir: &Path,
    parameters: Option<&serde_json::Value>,
) -> Result<ToolCommand, GenoflowError> {
    match kind {
        AnalysisKind::Prophage => build_prophage_command(config, input, output_dir, parameters),
        AnalysisKind::ResistanceGene => build_resistance_command(config, input, output_dir),
    }
}

fn input_mount_paths(
    input: &InputFile,
    mount: &str,
) -> Result<(String, String), GenoflowError> {
    let parent = input.path.parent().ok_or_else(|| {
        GenoflowError::Internal(format!(
            "Input file path '{}' has no parent directory",
            input.path.display()
        ))
    })?;
    let file_name = input.path.file_name().ok_or_else(|| {
        GenoflowError::Internal(format!(
            "Input file path '{}' has no file name",
            input.path.display()
        ))
    })?;
    let host_dir = parent.display().to_string();
    let container_file = format!("{}/{}", mount, file_name.to_string_lossy());
    Ok((host_dir, container_file))
}

fn build_prophage_command(
    config: &OrchestratorConfig,
    input: &InputFile,
    output_dir: &Path,
    parameters: Option<&serde_json::Value>,
) -> Result<ToolCommand, GenoflowError> {
    let tool = &config.prophage;
    let (input_dir, container_input) = input_mount_paths(input, &tool.input_mount)?;

    let mut cmd = ToolCommand::new("docker")
        .arg("run")
        .arg("--rm")
        .arg("-v")
        .arg(format!("{}:{}:ro", input_dir, tool.input_mount))
        .arg("-v")
        .arg(format!("{}:{}", output_dir.display(), tool.output_mount))
        .arg("-v")
        .arg(format!(
            "{}:{}",
            tool.database_dir.display(),
            tool.database_mount
        ))
        .arg(&tool.image)
        .arg("end-to-end");

    if let Some(min_score) = parameters.and_then(|p| p.get("min_score")).and_then(|v| v.as_f64()) {
        cmd = cmd.arg("--min-score").arg(min_score.to_string());
    }
    if let Some(min_length) = parameters
        .and_then(|p| p.get("min_length"))
        .and_then(|v| v.as_u64())
    {
        cmd = cmd.arg("--min-length").arg(min_length.to_string());
    }
    let splits = parameters
        .and_then(|p| p.get("splits"))
        .and_then(|v| v.as_u64())
        .unwrap_or(tool.default_splits as u64);
    cmd = cmd.arg("--splits").arg(splits.to_string());

    Ok(cmd
        .arg(container_input)
        .arg(&tool.output_mount)
        .arg(&tool.database_mount))
}

fn build_resistance_command(
    config: &OrchestratorConfig,
    input: &InputFile,
    output_dir: &Path,
) -> Result<ToolCommand, GenoflowError> {
    let tool = &config.resistance;
    let (input_dir, container_input) = input_mount_paths(input, &tool.input_mount)?;

    let mut cmd = ToolCommand::new("docker").arg("run").arg("--rm");
    if tool.use_gpu {
        cmd = cmd.arg("--gpus").arg("all");
    }
    Ok(cmd
        .arg("-v")
        .arg(format!("{}:{}:ro", input_dir, tool.input_mount))
        .arg("-v")
        .arg(format!("{}:{}", output_dir.display(), tool.output_mount))
        .arg(&tool.image)
        .arg("predict")
        .arg("--input")
        .arg(container_input)
        .arg("--output")
        .arg(&tool.output_mount)
        .arg("--model-dir")
        .arg(&tool.model_path))
}
