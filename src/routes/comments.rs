use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    access::Viewer,
    accounts::author_names,
    error::{AppError, AppResult},
    models::{Comment, NewComment},
    notifications::notify_admin,
    schema::{comments, infos, recipes},
    scope_to_families,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    pub info: Option<Uuid>,
    pub recipe: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentQuery {
    pub info: Option<Uuid>,
    pub recipe: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub content: String,
    pub author_id: Option<Uuid>,
    pub author_name: Option<String>,
    pub info: Option<Uuid>,
    pub recipe: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Info(Uuid),
    Recipe(Uuid),
}

impl Target {
    fn from_ids(info: Option<Uuid>, recipe: Option<Uuid>) -> AppResult<Self> {
        match (info, recipe) {
            (Some(id), None) => Ok(Target::Info(id)),
            (None, Some(id)) => Ok(Target::Recipe(id)),
            _ => Err(AppError::bad_request(
                "a comment belongs to exactly one info or recipe",
            )),
        }
    }

    fn of(comment: &Comment) -> Option<Self> {
        Self::from_ids(comment.info_id, comment.recipe_id).ok()
    }

    fn is_visible(&self, conn: &mut PgConnection, viewer: &Viewer) -> QueryResult<bool> {
        let found: Option<Uuid> = match *self {
            Target::Info(id) => scope_to_families!(infos::table.into_boxed(), viewer, infos)
                .filter(infos::id.eq(id))
                .select(infos::id)
                .first(conn)
                .optional()?,
            Target::Recipe(id) => scope_to_families!(recipes::table.into_boxed(), viewer, recipes)
                .filter(recipes::id.eq(id))
                .select(recipes::id)
                .first(conn)
                .optional()?,
        };
        Ok(found.is_some())
    }

    fn describe(&self) -> String {
        match self {
            Target::Info(id) => format!("info {id}"),
            Target::Recipe(id) => format!("recipe {id}"),
        }
    }
}

fn respond(conn: &mut PgConnection, rows: Vec<Comment>) -> AppResult<Vec<CommentResponse>> {
    let author_ids: Vec<Uuid> = rows.iter().filter_map(|row| row.author_id).collect();
    let authors = author_names(conn, &author_ids)?;
    Ok(rows
        .into_iter()
        .map(|row| CommentResponse {
            id: row.id,
            author_name: row.author_id.and_then(|id| authors.get(&id).cloned()),
            content: row.content,
            author_id: row.author_id,
            info: row.info_id,
            recipe: row.recipe_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
        .collect())
}

fn respond_one(conn: &mut PgConnection, row: Comment) -> AppResult<CommentResponse> {
    respond(conn, vec![row])?
        .pop()
        .ok_or_else(AppError::not_found)
}

/// A comment is visible when the info or recipe it belongs to is.
fn load_visible(conn: &mut PgConnection, viewer: &Viewer, id: Uuid) -> AppResult<Comment> {
    let comment: Comment = comments::table
        .find(id)
        .select(Comment::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    match Target::of(&comment) {
        Some(target) if target.is_visible(conn, viewer)? => Ok(comment),
        _ => Err(AppError::not_found()),
    }
}

fn non_empty(content: &str) -> AppResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::bad_request("content is required"));
    }
    Ok(content.to_string())
}

pub async fn list_comments(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<CommentQuery>,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let mut conn = state.db()?;

    let rows: Vec<Comment> = match (query.info, query.recipe) {
        (None, None) => {
            let info_ids: Vec<Uuid> = scope_to_families!(infos::table.into_boxed(), viewer, infos)
                .select(infos::id)
                .load(&mut conn)?;
            let recipe_ids: Vec<Uuid> =
                scope_to_families!(recipes::table.into_boxed(), viewer, recipes)
                    .select(recipes::id)
                    .load(&mut conn)?;
            comments::table
                .filter(
                    comments::info_id
                        .eq_any(info_ids)
                        .or(comments::recipe_id.eq_any(recipe_ids)),
                )
                .order(comments::created_at.asc())
                .select(Comment::as_select())
                .load(&mut conn)?
        }
        (info, recipe) => {
            let target = Target::from_ids(info, recipe)?;
            if !target.is_visible(&mut conn, &viewer)? {
                return Err(AppError::not_found());
            }
            let query = comments::table.into_boxed();
            let query = match target {
                Target::Info(id) => query.filter(comments::info_id.eq(id)),
                Target::Recipe(id) => query.filter(comments::recipe_id.eq(id)),
            };
            query
                .order(comments::created_at.asc())
                .select(Comment::as_select())
                .load(&mut conn)?
        }
    };

    Ok(Json(respond(&mut conn, rows)?))
}

pub async fn create_comment(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(payload): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let content = non_empty(&payload.content)?;
    let target = Target::from_ids(payload.info, payload.recipe)?;

    let mut conn = state.db()?;
    if !target.is_visible(&mut conn, &viewer)? {
        return Err(AppError::bad_request("the commented entry does not exist"));
    }

    let (info_id, recipe_id) = match target {
        Target::Info(id) => (Some(id), None),
        Target::Recipe(id) => (None, Some(id)),
    };
    let comment = conn.transaction::<_, AppError, _>(|conn| {
        let comment: Comment = diesel::insert_into(comments::table)
            .values(&NewComment {
                id: Uuid::new_v4(),
                content: content.clone(),
                author_id: Some(viewer.id),
                info_id,
                recipe_id,
            })
            .returning(Comment::as_returning())
            .get_result(conn)?;
        notify_admin(
            conn,
            &state.config,
            "Neuer Kommentar",
            format!(
                "{} hat einen Kommentar zu {} geschrieben:\n\n{}\n",
                viewer.author_name,
                target.describe(),
                content
            ),
        )?;
        Ok(comment)
    })?;

    info!(comment_id = %comment.id, target = %target.describe(), "comment created");
    Ok((StatusCode::CREATED, Json(respond_one(&mut conn, comment)?)))
}

pub async fn get_comment(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CommentResponse>> {
    let mut conn = state.db()?;
    let comment = load_visible(&mut conn, &viewer, id)?;
    Ok(Json(respond_one(&mut conn, comment)?))
}

pub async fn update_comment(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCommentRequest>,
) -> AppResult<Json<CommentResponse>> {
    let content = non_empty(&payload.content)?;
    let mut conn = state.db()?;
    let existing = load_visible(&mut conn, &viewer, id)?;
    viewer.require_author(existing.author_id)?;

    let comment: Comment = diesel::update(comments::table.find(id))
        .set((
            comments::content.eq(content),
            comments::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(Comment::as_returning())
        .get_result(&mut conn)?;
    Ok(Json(respond_one(&mut conn, comment)?))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let existing = load_visible(&mut conn, &viewer, id)?;
    viewer.require_author(existing.author_id)?;

    diesel::delete(comments::table.find(id)).execute(&mut conn)?;
    info!(comment_id = %id, "comment deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_target_is_required() {
        let id = Uuid::new_v4();
        assert_eq!(Target::from_ids(Some(id), None).unwrap(), Target::Info(id));
        assert_eq!(Target::from_ids(None, Some(id)).unwrap(), Target::Recipe(id));

        let err = Target::from_ids(None, None).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(Target::from_ids(Some(id), Some(id)).is_err());
    }

    #[test]
    fn blank_content_is_rejected() {
        assert!(non_empty("  \n").is_err());
        assert_eq!(non_empty("  schön ").unwrap(), "schön");
    }
}
