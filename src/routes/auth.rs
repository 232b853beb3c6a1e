use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    access::Viewer,
    accounts::find_user_by_email,
    auth::{
        password,
        session::{self, REFRESH_COOKIE_NAME},
        AuthenticatedUser,
    },
    error::{AppError, AppResult},
    models::User,
    schema::users,
    state::AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: Viewer,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let invalid = || AppError::bad_request("Invalid credentials");
    let mut conn = state.db()?;

    let user = find_user_by_email(&mut conn, &payload.email)?.ok_or_else(invalid)?;
    if !password::verify_password(&payload.password, &user.password_hash).map_err(|_| invalid())? {
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::bad_request("Inactive account"));
    }

    let user: User = diesel::update(users::table.find(user.id))
        .set(users::last_login.eq(Some(Utc::now().naive_utc())))
        .returning(User::as_returning())
        .get_result(&mut conn)?;

    let signed_in = sign_in(&state, &mut conn, &user)?;
    info!(user_id = %user.id, "user logged in");
    Ok(signed_in)
}

/// Trades the refresh cookie for a new access token. The cookie is
/// rotated on every use.
pub async fn refresh(
    State(state): State<AppState>,
    cookies: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let TypedHeader(cookies) = cookies.ok_or_else(AppError::unauthorized)?;
    let raw = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let mut conn = state.db()?;
    let user_id = session::consume(&mut conn, raw)?.ok_or_else(AppError::unauthorized)?;
    let user: User = users::table
        .find(user_id)
        .filter(users::is_active.eq(true))
        .select(User::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    sign_in(&state, &mut conn, &user)
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    cookies: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let raw = cookies
        .as_ref()
        .and_then(|TypedHeader(cookies)| cookies.get(REFRESH_COOKIE_NAME));
    let mut conn = state.db()?;
    let revoked = session::revoke(&mut conn, user.user_id, raw)?;
    info!(user_id = %user.user_id, revoked, "user logged out");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, session::clear_cookie(&state.config)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(viewer: Viewer) -> Json<Viewer> {
    Json(viewer)
}

fn sign_in(
    state: &AppState,
    conn: &mut PgConnection,
    user: &User,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let access_token = state
        .jwt
        .generate_token(user.id, &user.email, user.is_superuser)?;
    let (raw, expires_at) = session::issue(conn, &state.config, user.id)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        session::set_cookie(&state.config, &raw, expires_at)?,
    );
    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer",
            expires_in: state.config.jwt_expiry_minutes * 60,
            user: Viewer::from_user(user),
        }),
    ))
}
