//! Durable, time-based job queue.
//!
//! Jobs live in SQLite and survive restarts. A poll loop claims due jobs
//! whose name has a registered handler and runs each one in its own task.
//! Execution is at-least-once: a job interrupted by a crash is run again
//! after the next `start`, so handlers must tolerate repeats.

mod error;
mod models;
mod store;

pub use error::{QueueError, QueueResult};
pub use models::{JobStatus, Recurrence, ScheduledJob};
pub use store::JobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Work performed for a named job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: ScheduledJob) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub job_timeout: Duration,
    /// Zone used to evaluate cron recurrences.
    pub timezone: Tz,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 10,
            job_timeout: Duration::from_secs(300),
            timezone: Tz::UTC,
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    store: JobStore,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    settings: QueueSettings,
    shutdown: CancellationToken,
    started: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(store: JobStore, settings: QueueSettings) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                store,
                handlers: RwLock::new(HashMap::new()),
                settings,
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    /// Register the handler for `name`, replacing any previous one.
    pub fn define<H>(&self, name: impl Into<String>, handler: H)
    where
        H: JobHandler + 'static,
    {
        let name = name.into();
        let replaced = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), Arc::new(handler))
            .is_some();

        if replaced {
            tracing::info!(job_name = %name, "Job handler replaced");
        } else {
            tracing::debug!(job_name = %name, "Job handler defined");
        }
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Persist a one-time job to run at `at`.
    pub async fn schedule<T: Serialize>(
        &self,
        name: &str,
        at: DateTime<Utc>,
        data: T,
    ) -> QueueResult<ScheduledJob> {
        let data = serde_json::to_value(data)?;
        if !self.is_defined(name) {
            tracing::warn!(job_name = %name, "Scheduling job with no handler defined yet");
        }

        let job = self.inner.store.insert(name, &data, at).await?;
        tracing::info!(job_id = %job.id, job_name = %name, run_at = %at, "Job scheduled");
        Ok(job)
    }

    /// Persist a one-time job that is due immediately.
    pub async fn now<T: Serialize>(&self, name: &str, data: T) -> QueueResult<ScheduledJob> {
        self.schedule(name, Utc::now(), data).await
    }

    /// Create or update the recurring job called `name`. There is at most
    /// one recurring job per name.
    pub async fn every<T: Serialize>(
        &self,
        name: &str,
        recurrence: Recurrence,
        data: T,
    ) -> QueueResult<ScheduledJob> {
        let data = serde_json::to_value(data)?;
        let first_run = recurrence.first_run(Utc::now(), self.inner.settings.timezone)?;

        let job = self
            .inner
            .store
            .upsert_recurring(name, &data, &recurrence, first_run)
            .await?;
        tracing::info!(
            job_id = %job.id,
            job_name = %name,
            next_run = %job.next_run_at,
            "Recurring job registered"
        );
        Ok(job)
    }

    /// Remove a job that is not running. Returns whether it was removed.
    pub async fn cancel(&self, id: &str) -> QueueResult<bool> {
        let cancelled = self.inner.store.cancel(id).await?;
        if cancelled {
            tracing::info!(job_id = %id, "Job cancelled");
        }
        Ok(cancelled)
    }

    pub async fn get(&self, id: &str) -> QueueResult<Option<ScheduledJob>> {
        self.inner.store.get(id).await
    }

    pub async fn jobs(&self, name: Option<&str>) -> QueueResult<Vec<ScheduledJob>> {
        self.inner.store.list(name).await
    }

    pub async fn purge_finished(&self, older_than: DateTime<Utc>) -> QueueResult<u64> {
        self.inner.store.purge_finished(older_than).await
    }

    /// Recover interrupted jobs and begin polling. Call once, after all
    /// handlers are defined.
    pub async fn start(&self) -> QueueResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyStarted);
        }

        for job in self.inner.store.recover_interrupted().await? {
            tracing::warn!(
                job_id = %job.id,
                job_name = %job.name,
                "Job was interrupted by a previous shutdown and will run again"
            );
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.poll_loop());
        *self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!(
            poll_interval_ms = self.inner.settings.poll_interval.as_millis() as u64,
            "Job queue started"
        );
        Ok(())
    }

    /// Stop polling and wait for in-flight jobs to finish.
    pub async fn stop(&self) -> QueueResult<()> {
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(QueueError::NotStarted)?;

        self.inner.shutdown.cancel();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Job queue worker ended abnormally");
        }
        tracing::info!("Job queue stopped");
        Ok(())
    }

    /// Claim everything due at `now` and run it to completion. Returns the
    /// number of jobs run.
    pub async fn run_pending_at(&self, now: DateTime<Utc>) -> QueueResult<usize> {
        let jobs = self.inner.claim(now).await?;
        let count = jobs.len();

        let mut running = JoinSet::new();
        for job in jobs {
            running.spawn(self.inner.clone().execute(job));
        }
        while running.join_next().await.is_some() {}

        Ok(count)
    }
}

impl QueueInner {
    fn defined_names(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    async fn claim(&self, now: DateTime<Utc>) -> QueueResult<Vec<ScheduledJob>> {
        self.store
            .claim_due(&self.defined_names(), now, self.settings.batch_size)
            .await
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    while in_flight.try_join_next().is_some() {}

                    match self.claim(Utc::now()).await {
                        Ok(jobs) => {
                            for job in jobs {
                                in_flight.spawn(self.clone().execute(job));
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to claim due jobs"),
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            tracing::info!(count = in_flight.len(), "Waiting for running jobs");
        }
        while in_flight.join_next().await.is_some() {}
    }

    async fn execute(self: Arc<Self>, job: ScheduledJob) {
        let span = tracing::info_span!("job", job_id = %job.id, job_name = %job.name);
        async move {
            let started_at = job.last_run_at.unwrap_or_else(Utc::now);
            tracing::info!("Job started");

            let outcome = self.invoke(&job).await;
            let finished_at = Utc::now();
            let next_run = self.next_run(&job, started_at, finished_at);

            let recorded = match &outcome {
                Ok(()) => {
                    tracing::info!(
                        elapsed_ms = (finished_at - started_at).num_milliseconds(),
                        "Job completed"
                    );
                    self.store.mark_completed(&job.id, finished_at, next_run).await
                }
                Err(message) => {
                    tracing::error!(error = %message, "Job failed");
                    self.store
                        .mark_failed(&job.id, finished_at, message, next_run)
                        .await
                }
            };

            if let Err(e) = recorded {
                tracing::error!(error = %e, "Failed to record job outcome");
            }
        }
        .instrument(span)
        .await
    }

    /// Run the handler in its own task so a panic or timeout is contained.
    async fn invoke(&self, job: &ScheduledJob) -> Result<(), String> {
        let handler = self
            .handler(&job.name)
            .ok_or_else(|| format!("no handler defined for '{}'", job.name))?;

        let payload = job.clone();
        let mut task = tokio::spawn(async move { handler.run(payload).await });

        match tokio::time::timeout(self.settings.job_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
            Ok(Err(e)) if e.is_panic() => Err("job handler panicked".to_string()),
            Ok(Err(e)) => Err(format!("job handler was cancelled: {}", e)),
            Err(_) => {
                task.abort();
                Err(format!(
                    "job timed out after {}s",
                    self.settings.job_timeout.as_secs_f64()
                ))
            }
        }
    }

    /// Next run for a recurring job, whatever the outcome of this one.
    fn next_run(
        &self,
        job: &ScheduledJob,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let recurrence = job.recurrence.as_ref()?;
        let tz = self.settings.timezone;

        let next = recurrence.next_after(started_at, tz).and_then(|next| {
            if next > finished_at {
                Ok(next)
            } else {
                recurrence.next_after(finished_at, tz)
            }
        });

        match next {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::error!(error = %e, "Recurring job cannot be rescheduled");
                None
            }
        }
    }
}
