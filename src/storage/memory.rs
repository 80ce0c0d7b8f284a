use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::GenoflowError;
use crate::models::{AnalysisJob, InputFile, JobStatus};
use crate::storage::{InputStore, JobStore};

/// In-memory job store backed by an RwLock'd vec.
///
/// Suitable for embedding hosts that keep their own durable record and for
/// tests. Jobs are returned newest-first from listing calls.
#[derive(Default)]
pub struct MemoryJobStore {
    cache: RwLock<Vec<AnalysisJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: Uuid) -> Result<Option<AnalysisJob>> {
        let cache = self.cache.read().await;
        Ok(cache.iter().find(|j| j.id == id).cloned())
    }

    async fn insert(&self, job: AnalysisJob) -> Result<()> {
        let mut cache = self.cache.write().await;
        if cache.iter().any(|j| j.id == job.id) {
            return Err(GenoflowError::Storage(format!(
                "Job with id '{}' already stored",
                job.id
            ))
            .into());
        }
        cache.push(job);
        Ok(())
    }

    async fn update(&self, job: AnalysisJob) -> Result<AnalysisJob> {
        let mut cache = self.cache.write().await;
        let idx = cache
            .iter()
            .position(|j| j.id == job.id)
            .ok_or_else(|| GenoflowError::NotFound(format!("Job with id '{}'", job.id)))?;
        cache[idx] = job.clone();
        Ok(job)
    }

    async fn find_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<JobStatus>,
    ) -> Result<Vec<AnalysisJob>> {
        let cache = self.cache.read().await;
        let mut jobs: Vec<AnalysisJob> = cache
            .iter()
            .filter(|j| j.owner_id == owner_id)
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut cache = self.cache.write().await;
        let idx = cache
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| GenoflowError::NotFound(format!("Job with id '{}'", id)))?;
        cache.remove(idx);
        Ok(())
    }
}

/// In-memory lookup table of uploaded genome files.
#[derive(Default)]
pub struct MemoryInputStore {
    cache: RwLock<Vec<InputFile>>,
}

impl MemoryInputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, file: InputFile) {
        let mut cache = self.cache.write().await;
        cache.push(file);
    }
}

#[async_trait]
impl InputStore for MemoryInputStore {
    async fn get(&self, id: Uuid) -> Result<Option<InputFile>> {
        let cache = self.cache.read().await;
        Ok(cache.iter().find(|f| f.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisKind;
    use std::path::PathBuf;

    fn make_job(owner_id: Uuid) -> AnalysisJob {
        AnalysisJob::new(
            owner_id,
            Uuid::now_v7(),
            AnalysisKind::Prophage,
            "prophage detection - genome.fna".to_string(),
            None,
            PathBuf::from("/tmp/outputs/task_x"),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryJobStore::new();
        let job = make_job(Uuid::now_v7());
        store.insert(job.clone()).await.expect("insert");
        let fetched = store.get(job.id).await.expect("get").expect("found");
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.name, job.name);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MemoryJobStore::new();
        let result = store.get(Uuid::now_v7()).await.expect("get");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let store = MemoryJobStore::new();
        let job = make_job(Uuid::now_v7());
        store.insert(job.clone()).await.expect("first insert");
        let result = store.insert(job).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_replaces_record() {
        let store = MemoryJobStore::new();
        let mut job = make_job(Uuid::now_v7());
        store.insert(job.clone()).await.expect("insert");

        job.status = JobStatus::Running;
        job.progress = 10;
        store.update(job.clone()).await.expect("update");

        let fetched = store.get(job.id).await.expect("get").expect("found");
        assert_eq!(fetched.status, JobStatus::Running);
        assert_eq!(fetched.progress, 10);
    }

    #[tokio::test]
    async fn test_update_missing_fails() {
        let store = MemoryJobStore::new();
        let job = make_job(Uuid::now_v7());
        let result = store.update(job).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_find_by_owner_filters_and_sorts() {
        let store = MemoryJobStore::new();
        let owner = Uuid::now_v7();
        let other = Uuid::now_v7();

        let first = make_job(owner);
        let second = make_job(owner);
        let foreign = make_job(other);
        store.insert(first.clone()).await.expect("insert");
        store.insert(second.clone()).await.expect("insert");
        store.insert(foreign).await.expect("insert");

        let jobs = store.find_by_owner(owner, None).await.expect("find");
        assert_eq!(jobs.len(), 2);
        // Newest first.
        assert!(jobs[0].created_at >= jobs[1].created_at);
        assert!(jobs.iter().all(|j| j.owner_id == owner));
    }

    #[tokio::test]
    async fn test_find_by_owner_with_status_filter() {
        let store = MemoryJobStore::new();
        let owner = Uuid::now_v7();

        let pending = make_job(owner);
        let mut running = make_job(owner);
        running.status = JobStatus::Running;
        store.insert(pending).await.expect("insert");
        store.insert(running.clone()).await.expect("insert");

        let jobs = store
            .find_by_owner(owner, Some(JobStatus::Running))
            .await
            .expect("find");
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, running.id);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryJobStore::new();
        let job = make_job(Uuid::now_v7());
        store.insert(job.clone()).await.expect("insert");
        store.delete(job.id).await.expect("delete");
        assert!(store.get(job.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_fails() {
        let store = MemoryJobStore::new();
        let result = store.delete(Uuid::now_v7()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_input_store_get() {
        let store = MemoryInputStore::new();
        let file = InputFile::new(
            Uuid::now_v7(),
            PathBuf::from("/data/uploads/genome.fna"),
            "genome.fna".to_string(),
        );
        store.add(file.clone()).await;

        let fetched = store.get(file.id).await.expect("get").expect("found");
        assert_eq!(fetched.original_filename, "genome.fna");
        assert!(store.get(Uuid::now_v7()).await.expect("get").is_none());
    }
}
