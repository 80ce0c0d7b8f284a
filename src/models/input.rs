use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An uploaded genome file that jobs run against.
///
/// The engine never writes to the file; it only resolves the path and
/// original name when building the tool command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFile {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Host path of the stored file.
    pub path: PathBuf,
    /// Name the file was uploaded under, e.g. `genome.fna`. Used for the
    /// in-container path and for locating tool output subdirectories.
    pub original_filename: String,
    pub uploaded_at: DateTime<Utc>,
}

impl InputFile {
    pub fn new(owner_id: Uuid, path: PathBuf, original_filename: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            path,
            original_filename,
            uploaded_at: Utc::now(),
        }
    }

    /// Filename with any recognized FASTA extension stripped. Tool output
    /// directories are named after this stem.
    pub fn stem(&self) -> &str {
        for ext in [".fna", ".fasta", ".fa"] {
            if let Some(stripped) = self.original_filename.strip_suffix(ext) {
                return stripped;
            }
        }
        &self.original_filename
    }
}
