use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::models::parse_timestamp;
use super::{SqliteStore, StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Validation(format!("invalid job status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscodeJob {
    pub id: i64,
    pub content_id: i64,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TranscodeJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            content_id: row.get("content_id")?,
            status: row
                .get::<_, String>("status")?
                .parse()
                .unwrap_or(JobStatus::Queued),
            attempts: row.get("attempts")?,
            last_error: row.get("last_error")?,
            created_at: parse_timestamp(row.get("created_at")?),
            updated_at: parse_timestamp(row.get("updated_at")?),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl SqliteStore {
    /// Queues a transcode for `content_id`. A content row owns at most one
    /// job; enqueuing again returns the existing job untouched.
    pub fn enqueue_transcode(&self, content_id: i64) -> StoreResult<TranscodeJob> {
        self.write_transaction(|tx| {
            tx.execute(
                "INSERT INTO transcode_jobs (content_id, status) VALUES (?1, 'queued')
                 ON CONFLICT(content_id) DO NOTHING",
                [content_id],
            )?;
            let job = tx.query_row(
                "SELECT * FROM transcode_jobs WHERE content_id = ?1",
                [content_id],
                |row| TranscodeJob::from_row(row),
            )?;
            Ok(job)
        })
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<TranscodeJob>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM transcode_jobs");
        let mut params: Vec<Value> = Vec::new();
        if let Some(status) = filter.status {
            query.push_str(" WHERE status = ?");
            params.push(Value::Text(status.as_str().to_string()));
        }
        query.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|value| value as &dyn rusqlite::ToSql),
        ))?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(TranscodeJob::from_row(row)?);
        }
        Ok(jobs)
    }

    /// Moves the oldest queued job to `running` and bumps its attempt count.
    pub fn claim_next_job(&self) -> StoreResult<Option<TranscodeJob>> {
        self.write_transaction(|tx| {
            let id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM transcode_jobs WHERE status = 'queued'
                     ORDER BY created_at ASC, id ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(id) = id else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE transcode_jobs
                 SET status = 'running', attempts = attempts + 1, updated_at = ?1
                 WHERE id = ?2",
                params![Utc::now().naive_utc(), id],
            )?;
            let job = tx.query_row("SELECT * FROM transcode_jobs WHERE id = ?1", [id], |row| {
                TranscodeJob::from_row(row)
            })?;
            Ok(Some(job))
        })
    }

    pub fn complete_job(&self, id: i64) -> StoreResult<()> {
        self.set_job_status(id, JobStatus::Done, None)
    }

    pub fn fail_job(&self, id: i64, reason: &str) -> StoreResult<()> {
        self.set_job_status(id, JobStatus::Failed, Some(reason))
    }

    /// Re-arms failed jobs. `content_id` narrows it to a single job.
    pub fn requeue_failed(&self, content_id: Option<i64>) -> StoreResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE transcode_jobs SET status = 'queued', updated_at = ?1
             WHERE status = 'failed' AND (?2 IS NULL OR content_id = ?2)",
            params![Utc::now().naive_utc(), content_id],
        )?;
        Ok(affected)
    }

    /// Re-arms `running` jobs untouched since `older_than`; their worker is
    /// presumed dead.
    pub fn requeue_stale(
        &self,
        older_than: DateTime<Utc>,
        content_id: Option<i64>,
    ) -> StoreResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE transcode_jobs
             SET status = 'queued', last_error = 'worker stopped mid-job', updated_at = ?1
             WHERE status = 'running' AND updated_at < ?2 AND (?3 IS NULL OR content_id = ?3)",
            params![Utc::now().naive_utc(), older_than.naive_utc(), content_id],
        )?;
        Ok(affected)
    }

    fn set_job_status(&self, id: i64, status: JobStatus, reason: Option<&str>) -> StoreResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE transcode_jobs SET status = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), reason, Utc::now().naive_utc(), id],
        )?;
        if affected == 0 {
            return Err(StoreError::not_found("transcode job", id));
        }
        Ok(())
    }
}
