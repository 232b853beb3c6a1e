//! Infos, family infos and recipes.
//!
//! The three modules share one shape: a title, a text body, an author, up
//! to two family keys and numbered image and PDF slots. [`ContentTable`]
//! binds the shape to each table; the handlers are generic over it.

use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    access::Viewer,
    accounts::author_names,
    attachments::{self, MediaSet, OwnerKind},
    error::{AppError, AppResult},
    models::{FamInfo, Info, NewFamInfo, NewInfo, NewRecipe, Recipe},
    notifications::{notify_subscribers, AlertCategory, ContentEvent},
    schema::{fam_infos, infos, recipes},
    scope_to_families,
    state::AppState,
};

use super::forms::{read_slot_form, SlotForm};

const MAX_TITLE_LENGTH: usize = 255;

/// A content row independent of the table it came from.
#[derive(Debug, Clone)]
pub struct ContentRow {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub author_id: Option<Uuid>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct ContentValues {
    pub title: String,
    pub body: String,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
}

pub trait ContentTable: Send + Sync + 'static {
    const OWNER: OwnerKind;
    const CATEGORY: AlertCategory;
    /// Form and response key of the text body.
    const BODY_FIELD: &'static str;
    /// Frontend path prefix used in notification links.
    const PATH: &'static str;
    /// Whether the families come from the request instead of the author.
    const FAMILIES_FROM_REQUEST: bool;

    fn list(conn: &mut PgConnection, viewer: &Viewer) -> QueryResult<Vec<ContentRow>>;
    fn find(conn: &mut PgConnection, viewer: &Viewer, id: Uuid) -> QueryResult<Option<ContentRow>>;
    fn insert(
        conn: &mut PgConnection,
        author_id: Uuid,
        values: ContentValues,
    ) -> QueryResult<ContentRow>;
    fn update(
        conn: &mut PgConnection,
        id: Uuid,
        values: ContentValues,
    ) -> QueryResult<ContentRow>;
    fn delete(conn: &mut PgConnection, id: Uuid) -> QueryResult<usize>;
}

macro_rules! content_table {
    (
        $kind:ident,
        $table:ident,
        $model:ident,
        $new:ident,
        $body:ident,
        $owner:expr,
        $category:expr,
        $path:literal,
        $from_request:literal
    ) => {
        pub struct $kind;

        impl $kind {
            fn row(model: $model) -> ContentRow {
                ContentRow {
                    id: model.id,
                    title: model.title,
                    body: model.$body,
                    author_id: model.author_id,
                    family_1: model.family_1,
                    family_2: model.family_2,
                    created_at: model.created_at,
                    updated_at: model.updated_at,
                }
            }
        }

        impl ContentTable for $kind {
            const OWNER: OwnerKind = $owner;
            const CATEGORY: AlertCategory = $category;
            const BODY_FIELD: &'static str = stringify!($body);
            const PATH: &'static str = $path;
            const FAMILIES_FROM_REQUEST: bool = $from_request;

            fn list(conn: &mut PgConnection, viewer: &Viewer) -> QueryResult<Vec<ContentRow>> {
                let rows: Vec<$model> =
                    scope_to_families!($table::table.into_boxed(), viewer, $table)
                        .order($table::created_at.desc())
                        .select($model::as_select())
                        .load(conn)?;
                Ok(rows.into_iter().map(Self::row).collect())
            }

            fn find(
                conn: &mut PgConnection,
                viewer: &Viewer,
                id: Uuid,
            ) -> QueryResult<Option<ContentRow>> {
                let row: Option<$model> =
                    scope_to_families!($table::table.into_boxed(), viewer, $table)
                        .filter($table::id.eq(id))
                        .select($model::as_select())
                        .first(conn)
                        .optional()?;
                Ok(row.map(Self::row))
            }

            fn insert(
                conn: &mut PgConnection,
                author_id: Uuid,
                values: ContentValues,
            ) -> QueryResult<ContentRow> {
                let new_row = $new {
                    id: Uuid::new_v4(),
                    title: values.title,
                    $body: values.body,
                    author_id: Some(author_id),
                    family_1: values.family_1,
                    family_2: values.family_2,
                };
                let row: $model = diesel::insert_into($table::table)
                    .values(&new_row)
                    .returning($model::as_returning())
                    .get_result(conn)?;
                Ok(Self::row(row))
            }

            fn update(
                conn: &mut PgConnection,
                id: Uuid,
                values: ContentValues,
            ) -> QueryResult<ContentRow> {
                let row: $model = diesel::update($table::table.find(id))
                    .set((
                        $table::title.eq(values.title),
                        $table::$body.eq(values.body),
                        $table::family_1.eq(values.family_1),
                        $table::family_2.eq(values.family_2),
                        $table::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .returning($model::as_returning())
                    .get_result(conn)?;
                Ok(Self::row(row))
            }

            fn delete(conn: &mut PgConnection, id: Uuid) -> QueryResult<usize> {
                diesel::delete($table::table.find(id)).execute(conn)
            }
        }
    };
}

content_table!(
    Infos,
    infos,
    Info,
    NewInfo,
    content,
    OwnerKind::Info,
    AlertCategory::Info,
    "/infos",
    false
);
content_table!(
    FamInfos,
    fam_infos,
    FamInfo,
    NewFamInfo,
    content,
    OwnerKind::FamInfo,
    AlertCategory::FamInfo,
    "/fam-infos",
    true
);
content_table!(
    Recipes,
    recipes,
    Recipe,
    NewRecipe,
    instructions,
    OwnerKind::Recipe,
    AlertCategory::Recipe,
    "/recipes",
    false
);

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub author_id: Option<Uuid>,
    pub author_name: Option<String>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
    pub images: Vec<attachments::MediaLink>,
    pub pdfs: Vec<attachments::MediaLink>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ContentResponse {
    fn build<T: ContentTable>(
        row: ContentRow,
        media: MediaSet,
        authors: &HashMap<Uuid, String>,
    ) -> Self {
        let (content, instructions) = if T::BODY_FIELD == "instructions" {
            (None, Some(row.body))
        } else {
            (Some(row.body), None)
        };
        Self {
            id: row.id,
            title: row.title,
            content,
            instructions,
            author_name: row.author_id.and_then(|id| authors.get(&id).cloned()),
            author_id: row.author_id,
            family_1: row.family_1,
            family_2: row.family_2,
            images: media.images,
            pdfs: media.pdfs,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn respond<T: ContentTable>(
    conn: &mut PgConnection,
    rows: Vec<ContentRow>,
) -> AppResult<Vec<ContentResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let author_ids: Vec<Uuid> = rows.iter().filter_map(|row| row.author_id).collect();
    let authors = author_names(conn, &author_ids)?;

    let mut by_owner: HashMap<Uuid, Vec<crate::models::Attachment>> = HashMap::new();
    for attachment in attachments::load_for_owners(conn, T::OWNER, &ids)? {
        by_owner.entry(attachment.owner_id).or_default().push(attachment);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let media = by_owner
                .get(&row.id)
                .map(|list| MediaSet::from_attachments(list))
                .unwrap_or_default();
            ContentResponse::build::<T>(row, media, &authors)
        })
        .collect())
}

fn respond_one<T: ContentTable>(
    conn: &mut PgConnection,
    row: ContentRow,
) -> AppResult<ContentResponse> {
    respond::<T>(conn, vec![row])?
        .pop()
        .ok_or_else(AppError::not_found)
}

fn check_title(title: &str) -> AppResult<()> {
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(AppError::bad_request(format!(
            "title must be at most {MAX_TITLE_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Families requested in the form, normalized and checked against the
/// author's own families.
fn requested_families(
    state: &AppState,
    viewer: &Viewer,
    form: &SlotForm,
) -> AppResult<(Option<String>, Option<String>)> {
    let family_1 = form.required("family_1")?.to_lowercase();
    let family_2 = form.value("family_2").map(|family| family.to_lowercase());
    for family in std::iter::once(&family_1).chain(family_2.as_ref()) {
        if !state.config.is_known_family(family) {
            return Err(AppError::bad_request(format!("unknown family: {family}")));
        }
        if !viewer.is_superuser && !viewer.families.contains(family) {
            return Err(AppError::bad_request(format!(
                "you are not a member of the family {family}"
            )));
        }
    }
    Ok((Some(family_1), family_2))
}

fn author_families(viewer: &Viewer) -> AppResult<(Option<String>, Option<String>)> {
    if viewer.families.is_empty() && !viewer.is_superuser {
        return Err(AppError::bad_request("you are not a member of any family"));
    }
    Ok((viewer.families.first().cloned(), viewer.families.get(1).cloned()))
}

pub async fn list<T: ContentTable>(
    State(state): State<AppState>,
    viewer: Viewer,
) -> AppResult<Json<Vec<ContentResponse>>> {
    let mut conn = state.db()?;
    let rows = T::list(&mut conn, &viewer)?;
    Ok(Json(respond::<T>(&mut conn, rows)?))
}

pub async fn get<T: ContentTable>(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ContentResponse>> {
    let mut conn = state.db()?;
    let row = T::find(&mut conn, &viewer, id)?.ok_or_else(AppError::not_found)?;
    Ok(Json(respond_one::<T>(&mut conn, row)?))
}

pub async fn create<T: ContentTable>(
    State(state): State<AppState>,
    viewer: Viewer,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ContentResponse>)> {
    let form = read_slot_form(&mut multipart).await?;
    let title = form.required("title")?;
    check_title(&title)?;
    let body = form.required(T::BODY_FIELD)?;
    let (family_1, family_2) = if T::FAMILIES_FROM_REQUEST {
        requested_families(&state, &viewer, &form)?
    } else {
        author_families(&viewer)?
    };

    let row = {
        let mut conn = state.db()?;
        T::insert(
            &mut conn,
            viewer.id,
            ContentValues {
                title,
                body,
                family_1,
                family_2,
            },
        )?
    };

    if let Err(err) = attachments::apply_changes(&state, T::OWNER, row.id, form.changes).await {
        let mut conn = state.db()?;
        let keys = attachments::delete_rows_for_owner(&mut conn, T::OWNER, row.id)?;
        T::delete(&mut conn, row.id)?;
        drop(conn);
        attachments::remove_objects(&state, keys).await;
        return Err(err);
    }

    let mut conn = state.db()?;
    notify_subscribers(
        &mut conn,
        &state.config,
        &state.jwt,
        &ContentEvent {
            category: T::CATEGORY,
            title: row.title.clone(),
            author_id: Some(viewer.id),
            family_1: row.family_1.clone(),
            family_2: row.family_2.clone(),
            path: format!("{}/{}", T::PATH, row.id),
        },
    )?;

    info!(
        owner = T::OWNER.as_str(),
        id = %row.id,
        author_id = %viewer.id,
        "content created"
    );
    Ok((StatusCode::CREATED, Json(respond_one::<T>(&mut conn, row)?)))
}

/// Partial update: absent fields stay unchanged.
pub async fn update<T: ContentTable>(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<Json<ContentResponse>> {
    let existing = {
        let mut conn = state.db()?;
        T::find(&mut conn, &viewer, id)?.ok_or_else(AppError::not_found)?
    };
    viewer.require_author(existing.author_id)?;

    let form = read_slot_form(&mut multipart).await?;
    let mut values = ContentValues {
        title: existing.title.clone(),
        body: existing.body.clone(),
        family_1: existing.family_1.clone(),
        family_2: existing.family_2.clone(),
    };
    if form.text("title").is_some() {
        values.title = form.required("title")?;
        check_title(&values.title)?;
    }
    if form.text(T::BODY_FIELD).is_some() {
        values.body = form.required(T::BODY_FIELD)?;
    }
    if T::FAMILIES_FROM_REQUEST && form.text("family_1").is_some() {
        let (family_1, family_2) = requested_families(&state, &viewer, &form)?;
        values.family_1 = family_1;
        values.family_2 = family_2;
    }

    attachments::apply_changes(&state, T::OWNER, id, form.changes).await?;

    let mut conn = state.db()?;
    let row = T::update(&mut conn, id, values)?;
    info!(owner = T::OWNER.as_str(), id = %id, "content updated");
    Ok(Json(respond_one::<T>(&mut conn, row)?))
}

pub async fn delete<T: ContentTable>(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let existing = T::find(&mut conn, &viewer, id)?.ok_or_else(AppError::not_found)?;
    viewer.require_author(existing.author_id)?;

    let keys = conn.transaction::<_, AppError, _>(|conn| {
        let keys = attachments::delete_rows_for_owner(conn, T::OWNER, id)?;
        T::delete(conn, id)?;
        Ok(keys)
    })?;
    drop(conn);

    attachments::remove_objects(&state, keys).await;
    info!(owner = T::OWNER.as_str(), id = %id, "content deleted");
    Ok(StatusCode::NO_CONTENT)
}
