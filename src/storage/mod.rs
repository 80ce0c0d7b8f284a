pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{AnalysisJob, InputFile, JobStatus};

pub use memory::{MemoryInputStore, MemoryJobStore};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>>;
    async fn insert(&self, job: AnalysisJob) -> Result<()>;
    /// Replace the stored record wholesale, matched by `job.id`.
    async fn update(&self, job: AnalysisJob) -> Result<AnalysisJob>;
    async fn find_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<JobStatus>,
    ) -> Result<Vec<AnalysisJob>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait InputStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<InputFile>>;
}
