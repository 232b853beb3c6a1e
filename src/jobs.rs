//! Postgres-backed job queue shared by the API and the worker binary.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::mail::Email;
use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const JOB_GENERATE_THUMBNAIL: &str = "generate-thumbnail";
pub const JOB_SEND_EMAIL: &str = "send-email";

/// Jobs that have failed this many times are not retried again.
pub const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

fn enqueue(conn: &mut PgConnection, job_type: &str, payload: Value) -> JobQueueResult<Job> {
    let job = diesel::insert_into(jobs::table)
        .values(&NewJob {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload,
            status: JobStatus::Queued.as_str().to_string(),
            run_after: Utc::now().naive_utc(),
        })
        .returning(Job::as_returning())
        .get_result(conn)?;
    Ok(job)
}

/// Queues `email` for delivery by the worker. Called inside the caller's
/// transaction, so the mail goes out only if the surrounding write commits.
pub fn enqueue_email(conn: &mut PgConnection, email: &Email) -> JobQueueResult<Job> {
    enqueue(conn, JOB_SEND_EMAIL, serde_json::to_value(email)?)
}

pub fn enqueue_thumbnail(conn: &mut PgConnection, attachment_id: Uuid) -> JobQueueResult<Job> {
    enqueue(
        conn,
        JOB_GENERATE_THUMBNAIL,
        json!({ "attachment_id": attachment_id }),
    )
}

/// Exponential backoff starting at 30 seconds, doubling per attempt.
pub fn retry_delay(attempts: i32) -> Duration {
    let exponent = attempts.clamp(1, 7) as u32 - 1;
    Duration::from_secs(30 * 2u64.pow(exponent))
}

/// Claims the oldest due job of one of `job_types`, counting the attempt.
/// Concurrent workers skip rows another worker holds.
pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();
    let job = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let Some(id) = jobs::table
            .filter(jobs::status.eq(JobStatus::Queued.as_str()))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .select(jobs::id)
            .for_update()
            .skip_locked()
            .first::<Uuid>(conn)
            .optional()?
        else {
            return Ok(None);
        };
        diesel::update(jobs::table.find(id))
            .set((
                jobs::status.eq(JobStatus::Processing.as_str()),
                jobs::attempts.eq(jobs::attempts + 1),
                jobs::updated_at.eq(now),
            ))
            .returning(Job::as_returning())
            .get_result(conn)
            .map(Some)
    })?;
    Ok(job)
}

/// Where a reserved job goes after its handler ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Done,
    RetryAfter(Duration, String),
    GiveUp(String),
}

pub fn settle_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    settlement: Settlement,
) -> JobQueueResult<()> {
    let now = Utc::now();
    let target = jobs::table.find(job_id);
    match settlement {
        Settlement::Done => diesel::update(target)
            .set((
                jobs::status.eq(JobStatus::Succeeded.as_str()),
                jobs::last_error.eq(None::<String>),
                jobs::updated_at.eq(now.naive_utc()),
            ))
            .execute(conn)?,
        Settlement::RetryAfter(delay, error) => {
            let delay =
                ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));
            diesel::update(target)
                .set((
                    jobs::status.eq(JobStatus::Queued.as_str()),
                    jobs::run_after.eq((now + delay).naive_utc()),
                    jobs::last_error.eq(Some(error)),
                    jobs::updated_at.eq(now.naive_utc()),
                ))
                .execute(conn)?
        }
        Settlement::GiveUp(error) => diesel::update(target)
            .set((
                jobs::status.eq(JobStatus::Failed.as_str()),
                jobs::last_error.eq(Some(error)),
                jobs::updated_at.eq(now.naive_utc()),
            ))
            .execute(conn)?,
    };
    Ok(())
}

/// Puts jobs left in `processing` by a worker that died back in the queue.
pub fn requeue_stale(conn: &mut PgConnection, older_than: Duration) -> JobQueueResult<usize> {
    let older_than =
        ChronoDuration::from_std(older_than).unwrap_or_else(|_| ChronoDuration::hours(1));
    let cutoff = (Utc::now() - older_than).naive_utc();
    let requeued = diesel::update(
        jobs::table
            .filter(jobs::status.eq(JobStatus::Processing.as_str()))
            .filter(jobs::updated_at.lt(cutoff)),
    )
    .set((
        jobs::status.eq(JobStatus::Queued.as_str()),
        jobs::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;
    Ok(requeued)
}
