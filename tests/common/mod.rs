use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use stammbaum::accounts::{create_account, NewAccount};
use stammbaum::auth::jwt::JwtService;
use stammbaum::config::AppConfig;
use stammbaum::db::{self, PgPool, MIGRATIONS};
use stammbaum::mail::{Email, Mailer};
use stammbaum::models::Job;
use stammbaum::routes;
use stammbaum::schema::{jobs, users};
use stammbaum::state::AppState;
use stammbaum::storage::ObjectStorage;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const PASSWORD: &str = "correct-horse-42";

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn keys(&self) -> Vec<String> {
        let guard = self.objects.lock().await;
        let mut keys: Vec<String> = guard.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Records sent mail; can be switched to fail every delivery.
#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<Email>>,
    failing: AtomicBool,
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("smtp unavailable");
        }
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}

impl FakeMailer {
    #[allow(dead_code)]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<Email> {
        self.sent.lock().await.clone()
    }
}

/// A user to seed directly into the database.
#[derive(Clone)]
pub struct SeedUser {
    pub email: &'static str,
    pub families: &'static [&'static str],
    pub is_active: bool,
    pub is_superuser: bool,
}

impl SeedUser {
    #[allow(dead_code)]
    pub fn member(email: &'static str, families: &'static [&'static str]) -> Self {
        Self {
            email,
            families,
            is_active: true,
            is_superuser: false,
        }
    }

    #[allow(dead_code)]
    pub fn admin(email: &'static str) -> Self {
        Self {
            email,
            families: &[],
            is_active: true,
            is_superuser: true,
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    mailer: Arc<FakeMailer>,
}

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        backend_url: "http://api.test".to_string(),
        frontend_url: "http://app.test".to_string(),
        family_trees: vec!["kempe".to_string(), "huenten".to_string()],
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        account_token_audience: "test-account".to_string(),
        account_token_expiry_hours: 72,
        unsubscribe_token_audience: "test-unsubscribe".to_string(),
        media_url_expiry_minutes: 15,
        refresh_token_expiry_days: 30,
        refresh_cookie_secure: false,
        refresh_cookie_domain: None,
        cors_allowed_origin: None,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: "test-bucket".to_string(),
        smtp_url: None,
        email_from: "Stammbaum <noreply@test>".to_string(),
        admin_notification_email: Some("admin@test".to_string()),
    }
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;
        let config = test_config(database_url);

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let mailer = Arc::new(FakeMailer::default());
        let mailer_for_state: Arc<dyn Mailer> = mailer.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, storage_for_state, mailer_for_state, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            mailer,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(truncate_all).await
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn mailer(&self) -> Arc<FakeMailer> {
        self.mailer.clone()
    }

    pub async fn insert_user(&self, seed: SeedUser) -> Result<Uuid> {
        self.with_conn(move |conn| {
            let user = create_account(
                conn,
                NewAccount {
                    email: seed.email.to_string(),
                    password: PASSWORD.to_string(),
                    first_name: "Test".to_string(),
                    last_name: seed.email.split('@').next().unwrap_or("User").to_string(),
                    is_active: seed.is_active,
                    is_superuser: seed.is_superuser,
                    family_1: seed.families.first().map(|family| family.to_string()),
                    family_2: seed.families.get(1).map(|family| family.to_string()),
                    ..NewAccount::default()
                },
            )
            .map_err(|err| anyhow!("failed to insert user: {err}"))?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn set_alerts(&self, user_id: Uuid, enabled: bool) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::update(users::table.find(user_id))
                .set((
                    users::alert_info.eq(enabled),
                    users::alert_faminfo.eq(enabled),
                    users::alert_recipe.eq(enabled),
                    users::alert_discussion.eq(enabled),
                ))
                .execute(conn)
                .context("failed to update alerts")?;
            Ok(())
        })
        .await
    }

    pub async fn login_token(&self, email: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/auth/login",
                &serde_json::json!({ "email": email, "password": PASSWORD }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        let body = body_json(response).await?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .context("login response without access_token")
    }

    /// Seeds an active user and logs them in.
    #[allow(dead_code)]
    pub async fn user_with_token(&self, seed: SeedUser) -> Result<(Uuid, String)> {
        let email = seed.email;
        let id = self.insert_user(seed).await?;
        let token = self.login_token(email).await?;
        Ok((id, token))
    }

    #[allow(dead_code)]
    pub async fn clear_jobs(&self) -> Result<()> {
        self.with_conn(|conn| {
            diesel::delete(jobs::table)
                .execute(conn)
                .context("failed to clear jobs")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            let rows = jobs::table
                .filter(jobs::job_type.eq(&ty))
                .order(jobs::created_at.asc())
                .load::<Job>(conn)
                .context("failed to load jobs")?;
            Ok(rows)
        })
        .await
    }

    /// Recipients of the queued `send-email` jobs.
    #[allow(dead_code)]
    pub async fn queued_recipients(&self) -> Result<Vec<String>> {
        let jobs = self.jobs_by_type("send-email").await?;
        let mut recipients: Vec<String> = jobs
            .iter()
            .filter_map(|job| job.payload["to"].as_str().map(str::to_string))
            .collect();
        recipients.sort();
        Ok(recipients)
    }

    async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body))?).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty())?).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::DELETE).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty())?).await
    }

    /// Sends a multipart form. Parts with a file name are file parts.
    #[allow(dead_code)]
    pub async fn multipart(
        &self,
        method: Method,
        path: &str,
        parts: &[Part<'_>],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        for part in parts {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend(value.as_bytes());
                }
                Part::File {
                    name,
                    filename,
                    content_type,
                    data,
                } => {
                    body.extend(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
                    body.extend(*data);
                }
            }
            body.extend(b"\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        self.send(request).await
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

#[allow(dead_code)]
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        filename: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_json(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

/// A small valid PNG.
#[allow(dead_code)]
pub fn png_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 30, 30]));
    let mut out = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE attachments, comments, discussion_entries, discussions, infos, \
         fam_infos, recipes, marriage_children, marriages, relations, persons, jobs, \
         refresh_tokens, user_permissions, user_groups, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
