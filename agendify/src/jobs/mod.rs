//! Named jobs run by the queue.

mod publish;
mod purge;

pub use publish::{PostPublisher, PublishError, PublishPost, PublishPostJob, XPublisher, PUBLISH_POST};
pub use purge::{PurgeFinishedJobs, PURGE_FINISHED_JOBS};

use agendify_auth::TokenStore;
use std::sync::Arc;

use crate::queue::{JobQueue, QueueResult, Recurrence};

const PURGE_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

/// Define every job handler and register the built-in recurring jobs.
/// Must run before `JobQueue::start`.
pub async fn register(
    queue: &JobQueue,
    tokens: Arc<TokenStore>,
    publisher: Arc<dyn PostPublisher>,
    retention_days: u32,
) -> QueueResult<()> {
    queue.define(PUBLISH_POST, PublishPostJob::new(tokens, publisher));
    queue.define(
        PURGE_FINISHED_JOBS,
        PurgeFinishedJobs::new(queue.store().clone(), retention_days),
    );

    queue
        .every(
            PURGE_FINISHED_JOBS,
            Recurrence::interval(PURGE_INTERVAL_SECONDS),
            serde_json::json!({}),
        )
        .await?;

    Ok(())
}
