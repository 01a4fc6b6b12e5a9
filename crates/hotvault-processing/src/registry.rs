//! Job progress records, keyed by job id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hotvault_core::models::{JobUpdate, UploadJob};
use hotvault_core::Clock;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::sweep::Sweeper;

/// Store of upload jobs. Status readers and pipeline tasks share one instance.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    async fn insert(&self, job: UploadJob);

    async fn get(&self, job_id: Uuid) -> Option<UploadJob>;

    /// Apply `update` and return the job as stored afterwards.
    ///
    /// Updates to a terminal job are ignored; progress and stage never move backwards.
    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Option<UploadJob>;

    async fn remove(&self, job_id: Uuid) -> Option<UploadJob>;

    /// Drop terminal jobs that finished before `cutoff`. Returns how many were removed.
    async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize;
}

pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<Uuid, UploadJob>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJobRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn insert(&self, job: UploadJob) {
        self.jobs.write().await.insert(job.job_id, job);
    }

    async fn get(&self, job_id: Uuid) -> Option<UploadJob> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Option<UploadJob> {
        let now = self.clock.now();
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&job_id)?;
        if !job.apply(update, now) {
            tracing::debug!(job_id = %job_id, stage = %job.stage, "Ignoring update to finished job");
        }
        Some(job.clone())
    }

    async fn remove(&self, job_id: Uuid) -> Option<UploadJob> {
        self.jobs.write().await.remove(&job_id)
    }

    async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| match job.finished_at {
            Some(finished_at) => finished_at >= cutoff,
            None => true,
        });
        before - jobs.len()
    }
}

/// Periodically evicts finished jobs once their retention window has passed.
pub struct JobEvictionSweep {
    registry: Arc<dyn JobRegistry>,
    retention: Duration,
}

impl JobEvictionSweep {
    pub fn new(registry: Arc<dyn JobRegistry>, retention: Duration) -> Self {
        Self {
            registry,
            retention,
        }
    }
}

#[async_trait]
impl Sweeper for JobEvictionSweep {
    fn name(&self) -> &'static str {
        "job_eviction"
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        self.registry.evict_finished_before(now - retention).await
    }
}
