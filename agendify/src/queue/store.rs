use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::error::QueueResult;
use super::models::{JobRow, JobStatus, Recurrence, ScheduledJob};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    data             TEXT NOT NULL,
    status           TEXT NOT NULL,
    next_run_at      INTEGER NOT NULL,
    recurrence       TEXT,
    last_run_at      INTEGER,
    last_finished_at INTEGER,
    last_error       TEXT,
    fail_count       INTEGER NOT NULL DEFAULT 0,
    created_at       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (status, next_run_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_recurring_name ON jobs (name) WHERE recurrence IS NOT NULL;
"#;

/// Durable job storage backed by SQLite.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> QueueResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!("Job store ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> QueueResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn insert(
        &self,
        name: &str,
        data: &serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> QueueResult<ScheduledJob> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (id, name, data, status, next_run_at, created_at)
            VALUES (?, ?, ?, 'scheduled', ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(serde_json::to_string(data)?)
        .bind(run_at.timestamp_millis())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    /// Create or update the single recurring job called `name`.
    ///
    /// An existing job keeps its next run when the recurrence is unchanged,
    /// so re-registering at every startup does not shift the schedule.
    pub async fn upsert_recurring(
        &self,
        name: &str,
        data: &serde_json::Value,
        recurrence: &Recurrence,
        first_run: DateTime<Utc>,
    ) -> QueueResult<ScheduledJob> {
        let data = serde_json::to_string(data)?;
        let encoded = serde_json::to_string(recurrence)?;
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE name = ? AND recurrence IS NOT NULL",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match existing {
            Some(current) => {
                let next_run_at = if current.recurrence.as_deref() == Some(encoded.as_str()) {
                    current.next_run_at
                } else {
                    first_run.timestamp_millis()
                };

                sqlx::query_as::<_, JobRow>(
                    r#"
                    UPDATE jobs
                    SET data = ?, recurrence = ?, next_run_at = ?,
                        status = CASE WHEN status = 'running' THEN status ELSE 'scheduled' END
                    WHERE id = ?
                    RETURNING *
                    "#,
                )
                .bind(&data)
                .bind(&encoded)
                .bind(next_run_at)
                .bind(&current.id)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRow>(
                    r#"
                    INSERT INTO jobs (id, name, data, status, next_run_at, recurrence, created_at)
                    VALUES (?, ?, ?, 'scheduled', ?, ?, ?)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(name)
                .bind(&data)
                .bind(first_run.timestamp_millis())
                .bind(&encoded)
                .bind(Utc::now().timestamp_millis())
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        row.try_into()
    }

    pub async fn get(&self, id: &str) -> QueueResult<Option<ScheduledJob>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ScheduledJob::try_from)
            .transpose()
    }

    pub async fn list(&self, name: Option<&str>) -> QueueResult<Vec<ScheduledJob>> {
        let rows = match name {
            Some(name) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE name = ? ORDER BY next_run_at",
                )
                .bind(name)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRow>("SELECT * FROM jobs ORDER BY next_run_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(ScheduledJob::try_from).collect()
    }

    /// Delete a job that is not currently running. Returns whether a row
    /// was removed.
    pub async fn cancel(&self, id: &str) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND status != 'running'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically move up to `limit` due jobs with one of `names` to
    /// `running` and return them, earliest first.
    pub async fn claim_due(
        &self,
        names: &[String],
        now: DateTime<Utc>,
        limit: usize,
    ) -> QueueResult<Vec<ScheduledJob>> {
        if names.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let now = now.timestamp_millis();

        let mut query = QueryBuilder::<Sqlite>::new(
            "UPDATE jobs SET status = 'running', last_run_at = ",
        );
        query.push_bind(now);
        query.push(" WHERE id IN (SELECT id FROM jobs WHERE status = 'scheduled' AND next_run_at <= ");
        query.push_bind(now);
        query.push(" AND name IN (");
        let mut separated = query.separated(", ");
        for name in names {
            separated.push_bind(name.as_str());
        }
        separated.push_unseparated(") ORDER BY next_run_at LIMIT ");
        query.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        query.push(") RETURNING *");

        let rows = query
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await?;

        let mut jobs = rows
            .into_iter()
            .map(ScheduledJob::try_from)
            .collect::<QueueResult<Vec<_>>>()?;
        jobs.sort_by_key(|job| job.next_run_at);
        Ok(jobs)
    }

    /// Record a successful run. Recurring jobs go back to `scheduled` at
    /// `next_run`; one-time jobs become `completed`.
    pub async fn mark_completed(
        &self,
        id: &str,
        finished_at: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> QueueResult<()> {
        let status = match next_run {
            Some(_) => JobStatus::Scheduled,
            None => JobStatus::Completed,
        };

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, last_finished_at = ?, last_error = NULL,
                next_run_at = COALESCE(?, next_run_at)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(finished_at.timestamp_millis())
        .bind(next_run.map(|next| next.timestamp_millis()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed run. Recurring jobs go back to `scheduled` at
    /// `next_run`; one-time jobs become `failed`.
    pub async fn mark_failed(
        &self,
        id: &str,
        finished_at: DateTime<Utc>,
        error: &str,
        next_run: Option<DateTime<Utc>>,
    ) -> QueueResult<()> {
        let status = match next_run {
            Some(_) => JobStatus::Scheduled,
            None => JobStatus::Failed,
        };

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, last_finished_at = ?, last_error = ?,
                fail_count = fail_count + 1,
                next_run_at = COALESCE(?, next_run_at)
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(finished_at.timestamp_millis())
        .bind(error)
        .bind(next_run.map(|next| next.timestamp_millis()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Return jobs left `running` by a previous process to `scheduled`.
    pub async fn recover_interrupted(&self) -> QueueResult<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "UPDATE jobs SET status = 'scheduled' WHERE status = 'running' RETURNING *",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScheduledJob::try_from).collect()
    }

    /// Delete finished one-time jobs whose last run ended before `older_than`.
    pub async fn purge_finished(&self, older_than: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE recurrence IS NULL
              AND status IN ('completed', 'failed')
              AND last_finished_at < ?
            "#,
        )
        .bind(older_than.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
