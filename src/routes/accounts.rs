use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Redirect,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    access::Viewer,
    accounts::{allowed_families, create_account, find_user_by_email, sync_memberships, NewAccount},
    auth::{
        password::{hash_password, validate_password, verify_password},
        tokens::{
            account_fingerprint, decode_uid, encode_uid, PURPOSE_ACTIVATION,
            PURPOSE_PASSWORD_RESET,
        },
    },
    error::{AppError, AppResult},
    jobs::enqueue_email,
    models::User,
    notifications::{
        account_activated_email, activation_link, guarantor_confirmation_email,
        guarantor_request_email, password_reset_email, password_reset_link,
        registration_received_email, AlertCategory,
    },
    schema::{refresh_tokens, users},
    state::AppState,
};

#[derive(Serialize)]
pub struct DetailResponse {
    pub detail: String,
}

impl DetailResponse {
    fn new(detail: impl Into<String>) -> Json<Self> {
        Json(Self {
            detail: detail.into(),
        })
    }
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub guarantor: bool,
    pub guarantor_email: Option<String>,
    #[serde(default)]
    pub selected_families: Vec<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<DetailResponse>)> {
    for (field, value) in [
        ("email", &payload.email),
        ("password", &payload.password),
        ("first_name", &payload.first_name),
        ("last_name", &payload.last_name),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::bad_request(format!("{field} is required")));
        }
    }
    validate_password(&payload.password).map_err(AppError::bad_request)?;

    let families: Vec<String> = payload
        .selected_families
        .iter()
        .map(|family| family.trim().to_lowercase())
        .filter(|family| !family.is_empty())
        .collect();
    if let Some(unknown) = families
        .iter()
        .find(|family| !state.config.is_known_family(family))
    {
        return Err(AppError::bad_request(format!("unknown family: {unknown}")));
    }

    let mut conn = state.db()?;
    if find_user_by_email(&mut conn, &payload.email)?.is_some() {
        return Err(AppError::bad_request("a user with this email already exists"));
    }

    let guarantor = if payload.guarantor {
        let email = payload
            .guarantor_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| AppError::bad_request("guarantor_email is required"))?;
        let guarantor = find_user_by_email(&mut conn, email)?
            .ok_or_else(|| AppError::bad_request("guarantor does not exist"))?;
        let shared = allowed_families(guarantor.family_1.as_deref(), guarantor.family_2.as_deref())
            .iter()
            .any(|family| families.contains(family));
        if !shared {
            return Err(AppError::bad_request(
                "guarantor does not belong to any of the selected families",
            ));
        }
        Some(guarantor)
    } else {
        None
    };

    let user = create_account(
        &mut conn,
        NewAccount {
            email: payload.email,
            password: payload.password,
            first_name: payload.first_name,
            last_name: payload.last_name,
            guarantor_email: guarantor.as_ref().map(|g| g.email.clone()),
            family_1: families.first().cloned(),
            family_2: families.get(1).cloned(),
            ..NewAccount::default()
        },
    )?;

    let email = match &guarantor {
        Some(guarantor) => {
            let token = state
                .jwt
                .generate_account_token(user.id, PURPOSE_ACTIVATION, &account_fingerprint(&user))
                .map_err(AppError::internal)?;
            let link = activation_link(&state.config, &encode_uid(user.id), &token);
            guarantor_request_email(guarantor, &user, &link)
        }
        None => registration_received_email(&user),
    };

    if let Err(err) = state.mailer.send(&email).await {
        warn!(user_id = %user.id, error = %err, "registration email failed; removing user");
        diesel::delete(users::table.find(user.id)).execute(&mut conn)?;
        return Err(AppError::bad_request(
            "the confirmation email could not be sent, please try again later",
        ));
    }

    info!(user_id = %user.id, with_guarantor = guarantor.is_some(), "user registered");
    Ok((
        StatusCode::CREATED,
        DetailResponse::new("registration received"),
    ))
}

/// Loads the user an account link was issued for, or `None` if the link
/// is malformed, expired or already used.
fn resolve_account_link(
    state: &AppState,
    conn: &mut PgConnection,
    uidb64: &str,
    token: &str,
    purpose: &str,
) -> AppResult<Option<User>> {
    let Some(user_id) = decode_uid(uidb64) else {
        return Ok(None);
    };
    let Ok(claims) = state.jwt.verify_account_token(token, purpose) else {
        return Ok(None);
    };
    if claims.sub != user_id {
        return Ok(None);
    }
    let user: Option<User> = users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?;
    Ok(user.filter(|user| account_fingerprint(user) == claims.fp))
}

pub async fn activate(
    State(state): State<AppState>,
    Path((uidb64, token)): Path<(String, String)>,
) -> AppResult<Redirect> {
    let frontend = state.config.frontend_url.clone();
    let mut conn = state.db()?;

    let Some(user) = resolve_account_link(&state, &mut conn, &uidb64, &token, PURPOSE_ACTIVATION)?
    else {
        return Ok(Redirect::to(&format!("{frontend}/activation-failure")));
    };

    conn.transaction::<_, AppError, _>(|conn| {
        let user: User = diesel::update(users::table.find(user.id))
            .set((
                users::is_active.eq(true),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .returning(User::as_returning())
            .get_result(conn)?;
        sync_memberships(conn, &user)?;
        enqueue_email(conn, &account_activated_email(&state.config, &user))?;
        if let Some(guarantor_email) = user.guarantor_email.as_deref() {
            enqueue_email(conn, &guarantor_confirmation_email(guarantor_email, &user))?;
        }
        Ok(())
    })?;

    info!(user_id = %user.id, "account activated");
    Ok(Redirect::to(&format!("{frontend}/activation-success")))
}

#[derive(Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

pub async fn password_reset_request(
    State(state): State<AppState>,
    Json(payload): Json<PasswordResetRequest>,
) -> AppResult<Json<DetailResponse>> {
    let mut conn = state.db()?;
    let user = find_user_by_email(&mut conn, &payload.email)?
        .ok_or_else(|| AppError::bad_request("no account with this email address"))?;

    let token = state
        .jwt
        .generate_account_token(user.id, PURPOSE_PASSWORD_RESET, &account_fingerprint(&user))
        .map_err(AppError::internal)?;
    let link = password_reset_link(&state.config, &encode_uid(user.id), &token);
    enqueue_email(&mut conn, &password_reset_email(&user, &link))?;

    info!(user_id = %user.id, "password reset requested");
    Ok(DetailResponse::new("password reset email sent"))
}

#[derive(Deserialize)]
pub struct PasswordResetConfirm {
    pub password: String,
}

pub async fn password_reset_confirm(
    State(state): State<AppState>,
    Path((uidb64, token)): Path<(String, String)>,
    Json(payload): Json<PasswordResetConfirm>,
) -> AppResult<Json<DetailResponse>> {
    let mut conn = state.db()?;
    let user =
        resolve_account_link(&state, &mut conn, &uidb64, &token, PURPOSE_PASSWORD_RESET)?
            .ok_or_else(|| AppError::bad_request("invalid or expired reset link"))?;
    validate_password(&payload.password).map_err(AppError::bad_request)?;

    set_password(&mut conn, &user, &payload.password)?;
    info!(user_id = %user.id, "password reset");
    Ok(DetailResponse::new("password has been reset"))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<Json<DetailResponse>> {
    let mut conn = state.db()?;
    let user: User = users::table
        .find(viewer.id)
        .select(User::as_select())
        .first(&mut conn)?;

    let valid = verify_password(&payload.old_password, &user.password_hash)
        .map_err(AppError::internal)?;
    if !valid {
        return Err(AppError::bad_request("old password is incorrect"));
    }
    validate_password(&payload.new_password).map_err(AppError::bad_request)?;

    set_password(&mut conn, &user, &payload.new_password)?;
    Ok(DetailResponse::new("password changed"))
}

/// Stores a new password hash and revokes every outstanding refresh token.
fn set_password(conn: &mut PgConnection, user: &User, password: &str) -> AppResult<()> {
    let hash = hash_password(password).map_err(AppError::internal)?;
    let now = Utc::now().naive_utc();
    conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(users::table.find(user.id))
            .set((users::password_hash.eq(hash), users::updated_at.eq(now)))
            .execute(conn)?;
        diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user.id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(now),
            refresh_tokens::updated_at.eq(now),
        ))
        .execute(conn)?;
        Ok(())
    })
}

#[derive(Deserialize)]
pub struct AuthorNameRequest {
    pub author_name: String,
}

pub async fn update_author_name(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(payload): Json<AuthorNameRequest>,
) -> AppResult<Json<Viewer>> {
    let author_name = payload.author_name.trim();
    if author_name.is_empty() {
        return Err(AppError::bad_request("author_name must not be empty"));
    }
    if author_name.chars().count() > 255 {
        return Err(AppError::bad_request(
            "author_name must be at most 255 characters",
        ));
    }

    let mut conn = state.db()?;
    let user: User = diesel::update(users::table.find(viewer.id))
        .set((
            users::author_name.eq(author_name),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(User::as_returning())
        .get_result(&mut conn)?;
    Ok(Json(Viewer::from_user(&user)))
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertSettingsRequest {
    pub alert_info: Option<bool>,
    pub alert_faminfo: Option<bool>,
    pub alert_recipe: Option<bool>,
    pub alert_discussion: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct AlertSettings {
    pub alert_info: bool,
    pub alert_faminfo: bool,
    pub alert_recipe: bool,
    pub alert_discussion: bool,
}

impl From<&User> for AlertSettings {
    fn from(user: &User) -> Self {
        Self {
            alert_info: user.alert_info,
            alert_faminfo: user.alert_faminfo,
            alert_recipe: user.alert_recipe,
            alert_discussion: user.alert_discussion,
        }
    }
}

pub async fn get_alerts(
    State(state): State<AppState>,
    viewer: Viewer,
) -> AppResult<Json<AlertSettings>> {
    let mut conn = state.db()?;
    let user: User = users::table
        .find(viewer.id)
        .select(User::as_select())
        .first(&mut conn)?;
    Ok(Json(AlertSettings::from(&user)))
}

pub async fn update_alerts(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(payload): Json<AlertSettingsRequest>,
) -> AppResult<Json<AlertSettings>> {
    let mut conn = state.db()?;
    let current: User = users::table
        .find(viewer.id)
        .select(User::as_select())
        .first(&mut conn)?;

    let user: User = diesel::update(users::table.find(viewer.id))
        .set((
            users::alert_info.eq(payload.alert_info.unwrap_or(current.alert_info)),
            users::alert_faminfo.eq(payload.alert_faminfo.unwrap_or(current.alert_faminfo)),
            users::alert_recipe.eq(payload.alert_recipe.unwrap_or(current.alert_recipe)),
            users::alert_discussion
                .eq(payload.alert_discussion.unwrap_or(current.alert_discussion)),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(User::as_returning())
        .get_result(&mut conn)?;
    Ok(Json(AlertSettings::from(&user)))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Path((category, token)): Path<(String, String)>,
) -> AppResult<Json<DetailResponse>> {
    let category = AlertCategory::parse(&category).ok_or_else(AppError::not_found)?;
    let claims = state
        .jwt
        .verify_unsubscribe_token(&token)
        .map_err(|_| AppError::bad_request("invalid unsubscribe link"))?;
    if claims.category != category.as_str() {
        return Err(AppError::bad_request("invalid unsubscribe link"));
    }

    let mut conn = state.db()?;
    let target = users::table.find(claims.sub);
    let updated = match category {
        AlertCategory::Info => diesel::update(target)
            .set(users::alert_info.eq(false))
            .execute(&mut conn)?,
        AlertCategory::FamInfo => diesel::update(target)
            .set(users::alert_faminfo.eq(false))
            .execute(&mut conn)?,
        AlertCategory::Recipe => diesel::update(target)
            .set(users::alert_recipe.eq(false))
            .execute(&mut conn)?,
        AlertCategory::Discussion => diesel::update(target)
            .set(users::alert_discussion.eq(false))
            .execute(&mut conn)?,
    };
    if updated == 0 {
        return Err(AppError::bad_request("invalid unsubscribe link"));
    }

    info!(user_id = %claims.sub, category = category.as_str(), "alerts unsubscribed");
    Ok(DetailResponse::new("you will no longer receive these notifications"))
}
