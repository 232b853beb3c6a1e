//! Refresh tokens: long-lived, single-use, stored only as SHA-256 hashes
//! and handed to the browser in an HttpOnly cookie.

use axum::http::HeaderValue;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::models::NewRefreshToken;
use crate::schema::refresh_tokens;

pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Stores a fresh refresh token for `user_id` and returns its raw value
/// together with its expiry.
pub fn issue(
    conn: &mut PgConnection,
    config: &AppConfig,
    user_id: Uuid,
) -> QueryResult<(String, DateTime<Utc>)> {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let raw = hex::encode(bytes);

    let now = Utc::now();
    let expires_at = now + ChronoDuration::days(config.refresh_token_expiry_days);
    diesel::insert_into(refresh_tokens::table)
        .values(&NewRefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_token(&raw),
            issued_at: now.naive_utc(),
            expires_at: expires_at.naive_utc(),
        })
        .execute(conn)?;
    Ok((raw, expires_at))
}

/// Revokes a live token and returns the user it belonged to. Unknown,
/// expired and already used tokens yield `None`.
pub fn consume(conn: &mut PgConnection, raw: &str) -> QueryResult<Option<Uuid>> {
    let now = Utc::now().naive_utc();
    diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(hash_token(raw)))
            .filter(refresh_tokens::revoked_at.is_null())
            .filter(refresh_tokens::expires_at.gt(now)),
    )
    .set((
        refresh_tokens::revoked_at.eq(now),
        refresh_tokens::updated_at.eq(now),
    ))
    .returning(refresh_tokens::user_id)
    .get_result(conn)
    .optional()
}

/// Revokes the given token of `user_id`, or all of their tokens when no
/// live token matches.
pub fn revoke(conn: &mut PgConnection, user_id: Uuid, raw: Option<&str>) -> QueryResult<usize> {
    let now = Utc::now().naive_utc();
    let live = || {
        refresh_tokens::table
            .filter(refresh_tokens::user_id.eq(user_id))
            .filter(refresh_tokens::revoked_at.is_null())
    };
    if let Some(raw) = raw {
        let revoked = diesel::update(live().filter(refresh_tokens::token_hash.eq(hash_token(raw))))
            .set((
                refresh_tokens::revoked_at.eq(now),
                refresh_tokens::updated_at.eq(now),
            ))
            .execute(conn)?;
        if revoked > 0 {
            return Ok(revoked);
        }
    }
    diesel::update(live())
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(conn)
}

fn cookie(config: &AppConfig, value: &str, tail: &[String]) -> AppResult<HeaderValue> {
    let mut parts = vec![
        format!("{REFRESH_COOKIE_NAME}={value}"),
        "Path=/".to_string(),
        "HttpOnly".to_string(),
        "SameSite=Strict".to_string(),
    ];
    if config.refresh_cookie_secure {
        parts.push("Secure".to_string());
    }
    if let Some(domain) = &config.refresh_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }
    parts.extend_from_slice(tail);
    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

pub fn set_cookie(
    config: &AppConfig,
    raw: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = ChronoDuration::days(config.refresh_token_expiry_days).num_seconds();
    cookie(
        config,
        raw,
        &[
            format!("Max-Age={max_age}"),
            format!("Expires={}", expires_at.to_rfc2822()),
        ],
    )
}

pub fn clear_cookie(config: &AppConfig) -> AppResult<HeaderValue> {
    cookie(
        config,
        "",
        &[
            "Max-Age=0".to_string(),
            "Expires=Thu, 01 Jan 1970 00:00:00 GMT".to_string(),
        ],
    )
}
