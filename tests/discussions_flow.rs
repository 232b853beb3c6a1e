mod common;

use anyhow::{Context, Result};
use axum::http::{Method, StatusCode};
use common::{acquire_db_lock, body_json, Part, SeedUser, TestApp};
use serde_json::json;

async fn create_person(app: &TestApp, token: &str, givn: &str) -> Result<String> {
    let response = app
        .post_json(
            "/api/ancestors/persons",
            &json!({ "givn": givn, "surn": "Kempe" }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await?["id"]
        .as_str()
        .map(str::to_string)
        .context("person id")
}

#[tokio::test]
async fn first_entry_opens_the_discussion() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (author_id, author) = app
        .user_with_token(SeedUser::member("autor@example.org", &["kempe"]))
        .await?;
    let (reader_id, reader) = app
        .user_with_token(SeedUser::member("leser@example.org", &["kempe"]))
        .await?;
    app.set_alerts(author_id, true).await?;
    app.set_alerts(reader_id, true).await?;
    let person = create_person(&app, &author, "Karl").await?;

    let none = app
        .get(&format!("/api/discussions/person/{person}"), Some(&author))
        .await?;
    assert_eq!(none.status(), StatusCode::NOT_FOUND);

    let response = app
        .multipart(
            Method::POST,
            "/api/discussions/entries",
            &[
                Part::Text("person_id", &person),
                Part::Text("title", "Geburtsort"),
                Part::Text("content", "War es nicht Bremen?"),
            ],
            &author,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = body_json(response).await?;
    let discussion_id = first["discussion_id"]
        .as_str()
        .context("discussion id")?
        .to_string();
    assert_eq!(app.queued_recipients().await?, vec!["leser@example.org"]);

    let response = app
        .multipart(
            Method::POST,
            "/api/discussions/entries",
            &[
                Part::Text("discussion_id", &discussion_id),
                Part::Text("content", "Nein, Hamburg."),
            ],
            &reader,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await?["discussion_id"], discussion_id.as_str());

    let discussion = body_json(
        app.get(&format!("/api/discussions/person/{person}"), Some(&reader))
            .await?,
    )
    .await?;
    assert_eq!(discussion["id"], discussion_id.as_str());
    assert_eq!(discussion["person"]["name"], "Karl Kempe");
    assert_eq!(discussion["entries"].as_array().map(Vec::len), Some(2));

    let opened = app
        .post_json(
            &format!("/api/discussions/person/{person}"),
            &json!({}),
            Some(&reader),
        )
        .await?;
    assert_eq!(opened.status(), StatusCode::OK);

    let listed = body_json(app.get("/api/discussions", Some(&reader)).await?).await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn untitled_entries_about_confidential_persons_keep_the_name_out_of_alerts() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, author) = app
        .user_with_token(SeedUser::member("autor@example.org", &["kempe"]))
        .await?;
    let (reader_id, _) = app
        .user_with_token(SeedUser::member("leser@example.org", &["kempe"]))
        .await?;
    app.set_alerts(reader_id, true).await?;

    let response = app
        .post_json(
            "/api/ancestors/persons",
            &json!({ "givn": "Geheim", "surn": "Person", "confidential": "yes" }),
            Some(&author),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let person = body_json(response).await?["id"]
        .as_str()
        .map(str::to_string)
        .context("person id")?;

    let response = app
        .multipart(
            Method::POST,
            "/api/discussions/entries",
            &[
                Part::Text("person_id", &person),
                Part::Text("content", "Weiss jemand mehr?"),
            ],
            &author,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let jobs = app.jobs_by_type("send-email").await?;
    assert_eq!(jobs.len(), 1);
    let body = jobs[0].payload["body"].as_str().unwrap_or_default();
    let subject = jobs[0].payload["subject"].as_str().unwrap_or_default();
    assert!(body.contains("vertraulich"));
    assert!(!body.contains("Geheim"));
    assert!(!subject.contains("Geheim"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn entries_need_a_visible_person() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, kempe) = app
        .user_with_token(SeedUser::member("kempe@example.org", &["kempe"]))
        .await?;
    let (_, huenten) = app
        .user_with_token(SeedUser::member("huenten@example.org", &["huenten"]))
        .await?;
    let person = create_person(&app, &kempe, "Karl").await?;

    let missing = app
        .multipart(
            Method::POST,
            "/api/discussions/entries",
            &[Part::Text("content", "Wer ist das?")],
            &kempe,
        )
        .await?;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let foreign = app
        .multipart(
            Method::POST,
            "/api/discussions/entries",
            &[
                Part::Text("person_id", &person),
                Part::Text("content", "Wer ist das?"),
            ],
            &huenten,
        )
        .await?;
    assert_eq!(foreign.status(), StatusCode::BAD_REQUEST);

    let listed = body_json(app.get("/api/discussions", Some(&huenten)).await?).await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(0));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deleting_the_last_entry_removes_the_discussion() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, author) = app
        .user_with_token(SeedUser::member("autor@example.org", &["kempe"]))
        .await?;
    let (_, other) = app
        .user_with_token(SeedUser::member("andere@example.org", &["kempe"]))
        .await?;
    let person = create_person(&app, &author, "Erna").await?;

    let entry = body_json(
        app.multipart(
            Method::POST,
            "/api/discussions/entries",
            &[
                Part::Text("person_id", &person),
                Part::Text("content", "Erster Beitrag"),
            ],
            &author,
        )
        .await?,
    )
    .await?;
    let path = format!(
        "/api/discussions/entries/{}",
        entry["id"].as_str().context("entry id")?
    );

    let denied = app
        .multipart(Method::PUT, &path, &[Part::Text("content", "Fremd")], &other)
        .await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let updated = body_json(
        app.multipart(
            Method::PUT,
            &path,
            &[Part::Text("title", "Korrektur")],
            &author,
        )
        .await?,
    )
    .await?;
    assert_eq!(updated["title"], "Korrektur");
    assert_eq!(updated["content"], "Erster Beitrag");

    let denied = app.delete(&path, Some(&other)).await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let deleted = app.delete(&path, Some(&author)).await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = app
        .get(&format!("/api/discussions/person/{person}"), Some(&author))
        .await?;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
