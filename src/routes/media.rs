use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::Redirect,
};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use tracing::error;
use uuid::Uuid;

use crate::{
    access::Viewer,
    ancestors::visibility,
    attachments::OwnerKind,
    error::{AppError, AppResult},
    models::Attachment,
    schema::{attachments, discussion_entries, discussions},
    state::AppState,
};

use super::content::{ContentTable, FamInfos, Infos, Recipes};

fn owner_visible(
    conn: &mut PgConnection,
    viewer: &Viewer,
    attachment: &Attachment,
) -> AppResult<bool> {
    let owner_id = attachment.owner_id;
    let visible = match OwnerKind::parse(&attachment.owner_kind) {
        Some(OwnerKind::Person) => visibility::is_visible(conn, viewer, owner_id)?,
        Some(OwnerKind::Info) => Infos::find(conn, viewer, owner_id)?.is_some(),
        Some(OwnerKind::FamInfo) => FamInfos::find(conn, viewer, owner_id)?.is_some(),
        Some(OwnerKind::Recipe) => Recipes::find(conn, viewer, owner_id)?.is_some(),
        Some(OwnerKind::DiscussionEntry) => {
            let person_id: Option<Uuid> = discussion_entries::table
                .inner_join(discussions::table)
                .filter(discussion_entries::id.eq(owner_id))
                .select(discussions::person_id)
                .first(conn)
                .optional()?;
            match person_id {
                Some(person_id) => visibility::is_visible(conn, viewer, person_id)?,
                None => false,
            }
        }
        None => false,
    };
    Ok(visible)
}

fn original_key(attachment: &Attachment) -> Option<&str> {
    Some(attachment.storage_key.as_str())
}

fn thumbnail_key(attachment: &Attachment) -> Option<&str> {
    attachment.thumbnail_key.as_deref()
}

async fn redirect_to(
    state: &AppState,
    viewer: &Viewer,
    id: Uuid,
    pick: fn(&Attachment) -> Option<&str>,
) -> AppResult<Redirect> {
    let key = {
        let mut conn = state.db()?;
        let attachment: Attachment = attachments::table
            .find(id)
            .select(Attachment::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;
        if !owner_visible(&mut conn, viewer, &attachment)? {
            return Err(AppError::not_found());
        }
        pick(&attachment)
            .map(str::to_string)
            .ok_or_else(AppError::not_found)?
    };

    let minutes = state.config.media_url_expiry_minutes.max(1) as u64;
    let url = state
        .storage
        .presign_get_object(&key, Duration::from_secs(minutes * 60))
        .await
        .map_err(|err| {
            error!(key = %key, error = %err, "failed to presign media url");
            AppError::internal("failed to generate media url")
        })?;
    Ok(Redirect::temporary(&url))
}

pub async fn get_media(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Redirect> {
    redirect_to(&state, &viewer, id, original_key).await
}

/// 404 until the thumbnail job has run.
pub async fn get_thumbnail(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Redirect> {
    redirect_to(&state, &viewer, id, thumbnail_key).await
}
