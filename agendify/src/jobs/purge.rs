use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::queue::{JobHandler, JobStore, ScheduledJob};

pub const PURGE_FINISHED_JOBS: &str = "purge finished jobs";

/// Deletes completed and failed one-time jobs older than the retention window.
pub struct PurgeFinishedJobs {
    store: JobStore,
    retention: Duration,
}

impl PurgeFinishedJobs {
    pub fn new(store: JobStore, retention_days: u32) -> Self {
        Self {
            store,
            retention: Duration::days(i64::from(retention_days)),
        }
    }
}

#[async_trait]
impl JobHandler for PurgeFinishedJobs {
    async fn run(&self, _job: ScheduledJob) -> anyhow::Result<()> {
        let cutoff = Utc::now() - self.retention;
        let purged = self.store.purge_finished(cutoff).await?;
        tracing::info!(purged, cutoff = %cutoff, "Purged finished jobs");
        Ok(())
    }
}
