use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{QueueError, QueueResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// How a recurring job computes its next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Recurrence {
    Interval { seconds: u64 },
    /// Six-field cron expression (seconds first), evaluated in the queue timezone.
    Cron { expression: String },
}

impl Recurrence {
    pub fn interval(seconds: u64) -> Self {
        Recurrence::Interval { seconds }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Recurrence::Cron {
            expression: expression.into(),
        }
    }

    pub fn validate(&self) -> QueueResult<()> {
        match self {
            Recurrence::Interval { seconds: 0 } => Err(QueueError::InvalidSchedule(
                "interval must be at least one second".to_string(),
            )),
            Recurrence::Interval { .. } => Ok(()),
            Recurrence::Cron { expression } => parse_cron(expression).map(|_| ()),
        }
    }

    /// First run for a newly registered recurrence: interval jobs run
    /// immediately, cron jobs wait for their next slot.
    pub fn first_run(&self, now: DateTime<Utc>, tz: Tz) -> QueueResult<DateTime<Utc>> {
        match self {
            Recurrence::Interval { .. } => {
                // Reject periods that could never be scheduled.
                self.next_after(now, tz)?;
                Ok(now)
            }
            Recurrence::Cron { .. } => self.next_after(now, tz),
        }
    }

    /// Next run strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> QueueResult<DateTime<Utc>> {
        match self {
            Recurrence::Interval { seconds } => {
                self.validate()?;
                let too_large =
                    || QueueError::InvalidSchedule(format!("interval of {}s is too large", seconds));
                let period = i64::try_from(*seconds)
                    .ok()
                    .and_then(TimeDelta::try_seconds)
                    .ok_or_else(too_large)?;
                after.checked_add_signed(period).ok_or_else(too_large)
            }
            Recurrence::Cron { expression } => parse_cron(expression)?
                .after(&after.with_timezone(&tz))
                .next()
                .map(|next| next.with_timezone(&Utc))
                .ok_or_else(|| {
                    QueueError::InvalidSchedule(format!("'{}' has no upcoming run", expression))
                }),
        }
    }
}

fn parse_cron(expression: &str) -> QueueResult<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| QueueError::InvalidSchedule(format!("'{}': {}", expression, e)))
}

/// A persisted job instance as seen by handlers and callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub data: serde_json::Value,
    pub status: JobStatus,
    pub next_run_at: DateTime<Utc>,
    pub recurrence: Option<Recurrence>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub fail_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Deserialize the job payload into the handler's data type.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

/// Row layout of the `jobs` table. Timestamps are Unix milliseconds.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub id: String,
    pub name: String,
    pub data: String,
    pub status: String,
    pub next_run_at: i64,
    pub recurrence: Option<String>,
    pub last_run_at: Option<i64>,
    pub last_finished_at: Option<i64>,
    pub last_error: Option<String>,
    pub fail_count: i64,
    pub created_at: i64,
}

impl TryFrom<JobRow> for ScheduledJob {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| QueueError::CorruptRecord {
            id: row.id.clone(),
            reason,
        };

        let status = row.status.parse::<JobStatus>().map_err(&corrupt)?;
        let data = serde_json::from_str(&row.data)
            .map_err(|e| corrupt(format!("invalid data: {}", e)))?;
        let recurrence = row
            .recurrence
            .as_deref()
            .map(serde_json::from_str::<Recurrence>)
            .transpose()
            .map_err(|e| corrupt(format!("invalid recurrence: {}", e)))?;
        let timestamp = |millis: i64| {
            DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| corrupt(format!("timestamp {} out of range", millis)))
        };

        Ok(ScheduledJob {
            next_run_at: timestamp(row.next_run_at)?,
            last_run_at: row.last_run_at.map(timestamp).transpose()?,
            last_finished_at: row.last_finished_at.map(timestamp).transpose()?,
            created_at: timestamp(row.created_at)?,
            fail_count: u32::try_from(row.fail_count).unwrap_or(u32::MAX),
            status,
            data,
            recurrence,
            last_error: row.last_error,
            name: row.name,
            id: row.id,
        })
    }
}
