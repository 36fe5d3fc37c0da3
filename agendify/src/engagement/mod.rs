//! Engagement-metrics trigger.
//!
//! Fires at fixed wall-clock times in one timezone and runs the maintenance
//! procedure in a detached task. Nothing is persisted: the timer is armed
//! fresh at every start, so a restart close to a fire time can skip or
//! repeat that fire.

mod error;
mod procedure;

pub use error::{TriggerError, TriggerResult};
pub use procedure::CommandProcedure;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Default fire times: 13:30 and 20:00 every day.
pub const DEFAULT_SCHEDULES: [&str; 2] = ["0 30 13 * * *", "0 0 20 * * *"];

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The external update the trigger invokes.
#[async_trait]
pub trait MaintenanceProcedure: Send + Sync {
    fn name(&self) -> String;

    /// Run to completion and return the procedure's output.
    async fn run(&self) -> TriggerResult<String>;
}

/// Wall-clock source for the timer.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Set of cron expressions evaluated in a single timezone.
#[derive(Debug, Clone)]
pub struct EngagementSchedule {
    schedules: Vec<Schedule>,
    timezone: Tz,
}

impl EngagementSchedule {
    pub fn new<S: AsRef<str>>(expressions: &[S], timezone: Tz) -> TriggerResult<Self> {
        if expressions.is_empty() {
            return Err(TriggerError::InvalidSchedule(
                "at least one fire time is required".to_string(),
            ));
        }

        let schedules = expressions
            .iter()
            .map(|expression| {
                let expression = expression.as_ref();
                Schedule::from_str(expression).map_err(|e| {
                    TriggerError::InvalidSchedule(format!("'{}': {}", expression, e))
                })
            })
            .collect::<TriggerResult<Vec<_>>>()?;

        Ok(Self {
            schedules,
            timezone,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Earliest fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&local).next())
            .min()
            .map(|next| next.with_timezone(&Utc))
    }
}

pub struct EngagementTrigger {
    schedule: Arc<EngagementSchedule>,
    procedure: Arc<dyn MaintenanceProcedure>,
    clock: Arc<dyn Clock>,
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl EngagementTrigger {
    pub fn new(schedule: EngagementSchedule, procedure: Arc<dyn MaintenanceProcedure>) -> Self {
        Self {
            schedule: Arc::new(schedule),
            procedure,
            clock: Arc::new(SystemClock),
            cancellation: CancellationToken::new(),
            handle: None,
        }
    }

    /// Read fire times against `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) -> TriggerResult<()> {
        if self.is_running() {
            return Err(TriggerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();
        let handle = tokio::spawn(timer_loop(
            self.schedule.clone(),
            self.procedure.clone(),
            self.clock.clone(),
            self.cancellation.clone(),
        ));
        self.handle = Some(handle);

        tracing::info!(
            procedure = %self.procedure.name(),
            timezone = %self.schedule.timezone(),
            "Engagement trigger started"
        );
        Ok(())
    }

    /// Stop the timer. A procedure already running is left to finish.
    pub async fn stop(&mut self) -> TriggerResult<()> {
        let handle = self.handle.take().ok_or(TriggerError::NotRunning)?;
        self.cancellation.cancel();

        match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Engagement timer ended abnormally"),
            Err(_) => tracing::warn!("Engagement timer did not stop in time"),
        }

        tracing::info!("Engagement trigger stopped");
        Ok(())
    }

    /// Run the procedure once, outside the schedule.
    pub fn fire_now(&self) -> JoinHandle<TriggerResult<String>> {
        fire(self.procedure.clone(), self.clock.now())
    }
}

async fn timer_loop(
    schedule: Arc<EngagementSchedule>,
    procedure: Arc<dyn MaintenanceProcedure>,
    clock: Arc<dyn Clock>,
    cancellation: CancellationToken,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let now = clock.now();
        let from = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = schedule.next_after(from) else {
            tracing::warn!("Engagement schedule has no upcoming fire time");
            break;
        };

        tracing::debug!(
            next_fire = %next.with_timezone(&schedule.timezone()),
            "Engagement update armed"
        );
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancellation.cancelled() => break,
            _ = tokio::time::sleep(wait) => {
                // Detached: a slow or failing run never delays the next fire.
                drop(fire(procedure.clone(), next));
                last_fire = Some(next);
            }
        }
    }
}

fn fire(
    procedure: Arc<dyn MaintenanceProcedure>,
    scheduled_for: DateTime<Utc>,
) -> JoinHandle<TriggerResult<String>> {
    let span = tracing::info_span!(
        "engagement_update",
        procedure = %procedure.name(),
        scheduled_for = %scheduled_for
    );

    tokio::spawn(
        async move {
            tracing::info!("Running engagement update");
            let result = procedure.run().await;
            match &result {
                Ok(output) if output.is_empty() => tracing::info!("Engagement update finished"),
                Ok(output) => tracing::info!(output = %output, "Engagement update finished"),
                Err(e) => tracing::error!(error = %e, "Engagement update failed"),
            }
            result
        }
        .instrument(span),
    )
}
