mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::{acquire_db_lock, SeedUser, TestApp};
use serde_json::json;
use stammbaum::workers::{email::SendEmailJob, JobHandler, Worker};

fn email_worker(app: &TestApp) -> Worker {
    let handlers: Vec<Arc<dyn JobHandler>> = vec![Arc::new(SendEmailJob)];
    Worker::new(
        Arc::new(app.state.clone()),
        handlers,
        Duration::from_millis(10),
    )
}

#[tokio::test]
async fn queued_emails_are_delivered_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user(SeedUser::member("vergesslich@example.org", &["kempe"]))
        .await?;
    app.post_json(
        "/api/accounts/password-reset-request",
        &json!({ "email": "vergesslich@example.org" }),
        None,
    )
    .await?;

    let worker = email_worker(&app);
    assert_eq!(worker.drain().await?, 1);
    assert_eq!(worker.drain().await?, 0);

    let sent = app.mailer().sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "vergesslich@example.org");

    let jobs = app.jobs_by_type("send-email").await?;
    assert_eq!(jobs[0].status, "succeeded");
    assert_eq!(jobs[0].attempts, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_delivery_is_retried_later() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user(SeedUser::member("vergesslich@example.org", &["kempe"]))
        .await?;
    app.post_json(
        "/api/accounts/password-reset-request",
        &json!({ "email": "vergesslich@example.org" }),
        None,
    )
    .await?;
    app.mailer().set_failing(true);

    // The retry is scheduled in the future, so a second pass finds nothing.
    let worker = email_worker(&app);
    assert_eq!(worker.drain().await?, 1);

    let jobs = app.jobs_by_type("send-email").await?;
    assert_eq!(jobs[0].status, "queued");
    assert_eq!(jobs[0].attempts, 1);
    assert!(jobs[0].last_error.as_deref().unwrap_or_default().contains("smtp unavailable"));
    assert!(app.mailer().sent().await.is_empty());

    app.cleanup().await?;
    Ok(())
}
