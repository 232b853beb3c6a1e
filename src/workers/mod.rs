use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{requeue_stale, reserve_job, settle_job, JobQueueError, Settlement, MAX_ATTEMPTS},
    models::Job,
    state::AppState,
};

pub mod email;
pub mod thumbnails;

/// Jobs still marked as processing after this long belong to a dead worker.
const STALE_AFTER: Duration = Duration::from_secs(30 * 60);

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

impl JobExecution {
    /// Retries turn into failures once the job used up its attempts.
    fn settlement(self, attempts: i32) -> Settlement {
        match self {
            JobExecution::Success => Settlement::Done,
            JobExecution::Retry { error, .. } if attempts >= MAX_ATTEMPTS => {
                Settlement::GiveUp(error)
            }
            JobExecution::Retry { delay, error } => Settlement::RetryAfter(delay, error),
            JobExecution::Failed { error } => Settlement::GiveUp(error),
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state,
            handlers: handlers
                .into_iter()
                .map(|handler| (handler.job_type(), handler))
                .collect(),
            poll_interval,
        }
    }

    pub async fn run(&self) {
        match self.state.db() {
            Ok(mut conn) => match requeue_stale(&mut conn, STALE_AFTER) {
                Ok(0) => {}
                Ok(count) => warn!(count, "requeued jobs left behind by a previous worker"),
                Err(err) => error!(error = %err, "failed to requeue stale jobs"),
            },
            Err(err) => error!(error = %err, "worker has no database connection"),
        }

        info!(job_types = ?self.handlers.keys().collect::<Vec<_>>(), "worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Runs due jobs until none is left. Returns how many ran.
    pub async fn drain(&self) -> Result<usize, JobQueueError> {
        let mut ran = 0;
        while self.tick().await? {
            ran += 1;
        }
        Ok(ran)
    }

    /// Runs at most one due job. Returns whether a job was found.
    pub async fn tick(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let job = match self.state.db() {
            Ok(mut conn) => reserve_job(&mut conn, &job_types)?,
            Err(err) => {
                error!(error = %err, "worker could not reach the database");
                return Ok(false);
            }
        };
        let Some(job) = job else {
            return Ok(false);
        };

        let settlement = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler
                .handle(self.state.clone(), job.clone())
                .await
                .settlement(job.attempts),
            None => Settlement::GiveUp(format!("no handler for job type {}", job.job_type)),
        };

        match &settlement {
            Settlement::Done => info!(job_id = %job.id, job_type = %job.job_type, "job done"),
            Settlement::RetryAfter(delay, error) => warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                retry_in_secs = delay.as_secs(),
                %error,
                "job will retry"
            ),
            Settlement::GiveUp(error) => error!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                %error,
                "job failed"
            ),
        }

        match self.state.db() {
            Ok(mut conn) => settle_job(&mut conn, job.id, settlement)?,
            Err(err) => error!(job_id = %job.id, error = %err, "could not record job result"),
        }
        Ok(true)
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(thumbnails::GenerateThumbnailJob),
        Arc::new(email::SendEmailJob),
    ]
}
