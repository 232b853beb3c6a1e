use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    jobs::{retry_delay, JOB_SEND_EMAIL},
    mail::Email,
    models::Job,
    state::AppState,
};

use super::{JobExecution, JobHandler};

/// Delivers one queued email through the configured mailer.
pub struct SendEmailJob;

#[async_trait]
impl JobHandler for SendEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_EMAIL
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let email: Email = match serde_json::from_value(job.payload.clone()) {
            Ok(email) => email,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid email payload: {err}"),
                }
            }
        };

        match state.mailer.send(&email).await {
            Ok(()) => {
                info!(job_id = %job.id, to = %email.to, subject = %email.subject, "email sent");
                JobExecution::Success
            }
            Err(err) => {
                warn!(job_id = %job.id, to = %email.to, error = %err, "email delivery failed");
                JobExecution::Retry {
                    delay: retry_delay(job.attempts),
                    error: format!("{err:#}"),
                }
            }
        }
    }
}
