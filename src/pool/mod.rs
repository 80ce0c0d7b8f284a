use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks, i.e. jobs executing at once. The external
    /// tool is memory-hungry so the default is a single worker.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Bounded FIFO admission queue; a submit against a full queue runs the
    /// unit on the submitting task instead (caller-runs backpressure).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_max_concurrent() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    100
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Non-blocking snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub active: usize,
    pub queued: usize,
    pub completed: usize,
    pub total_submitted: usize,
}

type UnitFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Unit {
    job_id: Uuid,
    token: CancellationToken,
    work: UnitFuture,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

struct Shared {
    /// Job ids currently queued or running, with their cancellation tokens.
    /// Entries are removed unconditionally when a unit stops being
    /// processed, whatever the outcome.
    tracking: Mutex<HashMap<Uuid, CancellationToken>>,
    active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicUsize,
    total_submitted: AtomicUsize,
}

/// Bounded worker pool executing one future per job id.
///
/// An owned value with an explicit lifecycle: hosts construct it, share it
/// behind an `Arc`, and call [`WorkerPool::shutdown`] when done.
pub struct WorkerPool {
    tx: mpsc::Sender<Unit>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(config: &WorkerPoolConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Unit>(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            tracking: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            total_submitted: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();

        tracing::info!(
            "Starting worker pool: {} workers, queue capacity {}",
            config.max_concurrent,
            config.queue_capacity
        );

        let mut workers = JoinSet::new();
        for i in 0..config.max_concurrent.max(1) {
            let rx = Arc::clone(&rx);
            let shared = Arc::clone(&shared);
            let shutdown = shutdown.clone();
            workers.spawn(async move {
                tracing::debug!("Worker {} started", i);
                loop {
                    let unit = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => None,
                            unit = rx.recv() => unit,
                        }
                    };
                    let Some(unit) = unit else {
                        break;
                    };
                    shared.queued.fetch_sub(1, Ordering::SeqCst);
                    run_unit(unit, &shared).await;
                }
                tracing::debug!("Worker {} shutting down", i);
            });
        }

        Self {
            tx,
            shared,
            shutdown,
            workers: Mutex::new(Some(workers)),
        }
    }

    /// Enqueue work for `job_id`, built from the unit's cancellation token.
    /// A job id already queued or running is silently dropped (logged at
    /// warn). When the queue is full the unit runs inline on the calling
    /// task before this returns.
    pub async fn submit<F, Fut>(&self, job_id: Uuid, make_work: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        {
            let mut tracking = lock(&self.shared.tracking);
            if tracking.contains_key(&job_id) {
                tracing::warn!("Job {} is already queued or running, ignoring", job_id);
                return;
            }
            tracking.insert(job_id, token.clone());
        }
        self.shared.total_submitted.fetch_add(1, Ordering::SeqCst);
        self.shared.queued.fetch_add(1, Ordering::SeqCst);

        let unit = Unit {
            job_id,
            token: token.clone(),
            work: Box::pin(make_work(token)),
        };
        match self.tx.try_send(unit) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(unit)) => {
                tracing::warn!(
                    "Admission queue full, running job {} on the submitting task",
                    job_id
                );
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                run_unit(unit, &self.shared).await;
            }
            Err(mpsc::error::TrySendError::Closed(unit)) => {
                tracing::warn!("Pool is shut down, dropping job {}", unit.job_id);
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                let mut tracking = lock(&self.shared.tracking);
                tracking.remove(&unit.job_id);
            }
        }
    }

    /// Fire the cancellation token for `job_id`. A queued unit is skipped by
    /// its worker; a running unit holds a clone of the token and is expected
    /// to observe it and unwind on its own, it is never dropped mid-flight.
    /// Returns false for ids not currently tracked.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let tracking = lock(&self.shared.tracking);
        match tracking.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            active: self.shared.active.load(Ordering::SeqCst),
            queued: self.shared.queued.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
            total_submitted: self.shared.total_submitted.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting work and wait up to `grace` for in-flight units;
    /// workers still running after that are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!("Shutting down worker pool");
        self.shutdown.cancel();

        let workers = {
            let mut guard = lock(&self.workers);
            guard.take()
        };
        let Some(mut workers) = workers else {
            return;
        };

        let drain = async {
            while workers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!("Workers did not stop within grace period, aborting");
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
    }
}

/// Execute one unit and settle the counters. The tracking entry is removed
/// on every path out of here.
///
/// A running unit is awaited to completion even after its token fires: the
/// work owns a clone of the token and handles cancellation itself, so any
/// in-flight child process gets its graceful-termination path instead of
/// being killed by a dropped future.
async fn run_unit(unit: Unit, shared: &Shared) {
    if unit.token.is_cancelled() {
        tracing::info!("Job {} was cancelled before execution, skipping", unit.job_id);
    } else {
        shared.active.fetch_add(1, Ordering::SeqCst);
        unit.work.await;
        shared.active.fetch_sub(1, Ordering::SeqCst);
    }

    {
        let mut tracking = lock(&shared.tracking);
        tracking.remove(&unit.job_id);
    }
    shared.completed.fetch_add(1, Ordering::SeqCst);
}
