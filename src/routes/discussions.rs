//! Per-person discussions and their entries.
//!
//! A discussion exists once its first entry is written and disappears with
//! its last one. Visibility follows the person it is about.

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
    ancestors::person::Confidentiality,
    ancestors::visibility::{self, RelativeRef},
    attachments::{self, MediaLink, MediaSet, OwnerKind},
    error::{AppError, AppResult},
    models::{Attachment, Discussion, DiscussionEntry, NewDiscussion, NewDiscussionEntry, Person},
    notifications::{notify_subscribers, AlertCategory, ContentEvent},
    schema::{discussion_entries, discussions},
    state::AppState,
};

use super::forms::read_slot_form;

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub id: Uuid,
    pub discussion_id: Uuid,
    pub author_id: Option<Uuid>,
    pub author_name: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub images: Vec<MediaLink>,
    pub pdfs: Vec<MediaLink>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
pub struct DiscussionResponse {
    pub id: Uuid,
    pub person_id: Uuid,
    pub person: Option<RelativeRef>,
    pub entries: Vec<EntryResponse>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

fn entry_responses(
    conn: &mut PgConnection,
    entries: Vec<DiscussionEntry>,
) -> AppResult<Vec<EntryResponse>> {
    let ids: Vec<Uuid> = entries.iter().map(|entry| entry.id).collect();
    let author_ids: Vec<Uuid> = entries.iter().filter_map(|entry| entry.author_id).collect();
    let authors = author_names(conn, &author_ids)?;

    let mut media: HashMap<Uuid, Vec<Attachment>> = HashMap::new();
    for attachment in attachments::load_for_owners(conn, OwnerKind::DiscussionEntry, &ids)? {
        media.entry(attachment.owner_id).or_default().push(attachment);
    }

    Ok(entries
        .into_iter()
        .map(|entry| {
            let set = media
                .get(&entry.id)
                .map(|list| MediaSet::from_attachments(list))
                .unwrap_or_default();
            EntryResponse {
                id: entry.id,
                discussion_id: entry.discussion_id,
                author_name: entry.author_id.and_then(|id| authors.get(&id).cloned()),
                author_id: entry.author_id,
                title: entry.title,
                content: entry.content,
                images: set.images,
                pdfs: set.pdfs,
                created_at: entry.created_at,
                updated_at: entry.updated_at,
            }
        })
        .collect())
}

fn entry_response(conn: &mut PgConnection, entry: DiscussionEntry) -> AppResult<EntryResponse> {
    entry_responses(conn, vec![entry])?
        .pop()
        .ok_or_else(AppError::not_found)
}

fn discussion_responses(
    conn: &mut PgConnection,
    rows: Vec<Discussion>,
) -> AppResult<Vec<DiscussionResponse>> {
    let person_ids: Vec<Uuid> = rows.iter().map(|row| row.person_id).collect();
    let persons = visibility::relatives(conn, &person_ids)?;

    let entries: Vec<DiscussionEntry> = DiscussionEntry::belonging_to(&rows)
        .order(discussion_entries::created_at.asc())
        .select(DiscussionEntry::as_select())
        .load(conn)?;
    let mut grouped: HashMap<Uuid, Vec<EntryResponse>> = HashMap::new();
    for entry in entry_responses(conn, entries)? {
        grouped.entry(entry.discussion_id).or_default().push(entry);
    }

    Ok(rows
        .into_iter()
        .map(|row| DiscussionResponse {
            person: persons.get(&row.person_id).cloned(),
            entries: grouped.remove(&row.id).unwrap_or_default(),
            id: row.id,
            person_id: row.person_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
        .collect())
}

fn discussion_response(conn: &mut PgConnection, row: Discussion) -> AppResult<DiscussionResponse> {
    discussion_responses(conn, vec![row])?
        .pop()
        .ok_or_else(AppError::not_found)
}

fn find_for_person(conn: &mut PgConnection, person_id: Uuid) -> QueryResult<Option<Discussion>> {
    discussions::table
        .filter(discussions::person_id.eq(person_id))
        .select(Discussion::as_select())
        .first(conn)
        .optional()
}

/// Returns the person's discussion, creating it when missing. The flag is
/// true when a new discussion was inserted.
fn get_or_create(conn: &mut PgConnection, person_id: Uuid) -> QueryResult<(Discussion, bool)> {
    if let Some(existing) = find_for_person(conn, person_id)? {
        return Ok((existing, false));
    }
    let inserted: Option<Discussion> = diesel::insert_into(discussions::table)
        .values(&NewDiscussion {
            id: Uuid::new_v4(),
            person_id,
        })
        .on_conflict(discussions::person_id)
        .do_nothing()
        .returning(Discussion::as_returning())
        .get_result(conn)
        .optional()?;
    match inserted {
        Some(discussion) => Ok((discussion, true)),
        None => find_for_person(conn, person_id)?
            .map(|discussion| (discussion, false))
            .ok_or(diesel::result::Error::NotFound),
    }
}

fn visible_person(conn: &mut PgConnection, viewer: &Viewer, person_id: Uuid) -> AppResult<Person> {
    visibility::load_visible(conn, viewer, person_id)?.ok_or_else(AppError::not_found)
}

/// Loads an entry whose discussion's person the viewer may see.
fn load_entry(
    conn: &mut PgConnection,
    viewer: &Viewer,
    id: Uuid,
) -> AppResult<(DiscussionEntry, Discussion)> {
    let (entry, discussion): (DiscussionEntry, Discussion) = discussion_entries::table
        .inner_join(discussions::table)
        .filter(discussion_entries::id.eq(id))
        .select((DiscussionEntry::as_select(), Discussion::as_select()))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if !visibility::is_visible(conn, viewer, discussion.person_id)? {
        return Err(AppError::not_found());
    }
    Ok((entry, discussion))
}

/// Deletes an entry's rows and, when it was the last one, its discussion.
/// Returns the object keys to remove afterwards.
fn delete_entry_rows(
    conn: &mut PgConnection,
    entry_id: Uuid,
    discussion_id: Uuid,
) -> AppResult<Vec<String>> {
    conn.transaction::<_, AppError, _>(|conn| {
        let keys = attachments::delete_rows_for_owner(conn, OwnerKind::DiscussionEntry, entry_id)?;
        diesel::delete(discussion_entries::table.find(entry_id)).execute(conn)?;
        let remaining: i64 = discussion_entries::table
            .filter(discussion_entries::discussion_id.eq(discussion_id))
            .count()
            .get_result(conn)?;
        if remaining == 0 {
            diesel::delete(discussions::table.find(discussion_id)).execute(conn)?;
            info!(discussion_id = %discussion_id, "empty discussion removed");
        }
        Ok(keys)
    })
}

pub async fn list_discussions(
    State(state): State<AppState>,
    viewer: Viewer,
) -> AppResult<Json<Vec<DiscussionResponse>>> {
    let mut conn = state.db()?;
    let person_ids = visibility::visible_person_ids(&mut conn, &viewer)?;
    let rows: Vec<Discussion> = discussions::table
        .filter(discussions::person_id.eq_any(person_ids))
        .order(discussions::updated_at.desc())
        .select(Discussion::as_select())
        .load(&mut conn)?;
    Ok(Json(discussion_responses(&mut conn, rows)?))
}

pub async fn get_person_discussion(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(person_id): Path<Uuid>,
) -> AppResult<Json<DiscussionResponse>> {
    let mut conn = state.db()?;
    visible_person(&mut conn, &viewer, person_id)?;
    let discussion = find_for_person(&mut conn, person_id)?.ok_or_else(AppError::not_found)?;
    Ok(Json(discussion_response(&mut conn, discussion)?))
}

pub async fn open_person_discussion(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(person_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<DiscussionResponse>)> {
    let mut conn = state.db()?;
    visible_person(&mut conn, &viewer, person_id)?;
    let (discussion, created) = get_or_create(&mut conn, person_id)?;
    let status = if created {
        info!(discussion_id = %discussion.id, person_id = %person_id, "discussion created");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(discussion_response(&mut conn, discussion)?)))
}

pub async fn create_entry(
    State(state): State<AppState>,
    viewer: Viewer,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<EntryResponse>)> {
    let form = read_slot_form(&mut multipart).await?;
    let content = form.required("content")?;
    let title = form.value("title");

    let parse_id = |name: &str| -> AppResult<Option<Uuid>> {
        form.value(name)
            .map(|raw| {
                Uuid::parse_str(&raw)
                    .map_err(|_| AppError::bad_request(format!("{name} is not a valid id")))
            })
            .transpose()
    };
    let person_id = parse_id("person_id")?;
    let discussion_id = parse_id("discussion_id")?;

    let (entry, person) = {
        let mut conn = state.db()?;
        let person_id = match (person_id, discussion_id) {
            (Some(person_id), _) => person_id,
            (None, Some(discussion_id)) => discussions::table
                .find(discussion_id)
                .select(discussions::person_id)
                .first(&mut conn)
                .optional()?
                .ok_or_else(|| AppError::bad_request("unknown discussion"))?,
            (None, None) => {
                return Err(AppError::bad_request(
                    "either person_id or discussion_id is required",
                ))
            }
        };
        let person = visibility::load_visible(&mut conn, &viewer, person_id)?
            .ok_or_else(|| AppError::bad_request("unknown person"))?;

        let entry = conn.transaction::<_, AppError, _>(|conn| {
            let (discussion, _) = get_or_create(conn, person.id)?;
            let entry: DiscussionEntry = diesel::insert_into(discussion_entries::table)
                .values(&NewDiscussionEntry {
                    id: Uuid::new_v4(),
                    discussion_id: discussion.id,
                    author_id: Some(viewer.id),
                    title: title.clone(),
                    content: content.clone(),
                })
                .returning(DiscussionEntry::as_returning())
                .get_result(conn)?;
            diesel::update(discussions::table.find(discussion.id))
                .set(discussions::updated_at.eq(Utc::now().naive_utc()))
                .execute(conn)?;
            Ok(entry)
        })?;
        (entry, person)
    };

    if let Err(err) =
        attachments::apply_changes(&state, OwnerKind::DiscussionEntry, entry.id, form.changes)
            .await
    {
        let mut conn = state.db()?;
        let keys = delete_entry_rows(&mut conn, entry.id, entry.discussion_id)?;
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
            category: AlertCategory::Discussion,
            title: entry.title.clone().unwrap_or_else(|| {
                visibility::tiered_name(Confidentiality::of(&person), &person.name)
            }),
            author_id: Some(viewer.id),
            family_1: person.family_1.clone(),
            family_2: person.family_2.clone(),
            path: format!("/discussions/{}", entry.discussion_id),
        },
    )?;

    info!(
        entry_id = %entry.id,
        discussion_id = %entry.discussion_id,
        author_id = %viewer.id,
        "discussion entry created"
    );
    Ok((StatusCode::CREATED, Json(entry_response(&mut conn, entry)?)))
}

pub async fn get_entry(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EntryResponse>> {
    let mut conn = state.db()?;
    let (entry, _) = load_entry(&mut conn, &viewer, id)?;
    Ok(Json(entry_response(&mut conn, entry)?))
}

/// Partial update: absent fields stay, an empty title clears it.
pub async fn update_entry(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<Json<EntryResponse>> {
    let existing = {
        let mut conn = state.db()?;
        load_entry(&mut conn, &viewer, id)?.0
    };
    viewer.require_author(existing.author_id)?;

    let form = read_slot_form(&mut multipart).await?;
    let title = match form.text("title") {
        Some(_) => form.value("title"),
        None => existing.title.clone(),
    };
    let content = match form.text("content") {
        Some(_) => form.required("content")?,
        None => existing.content.clone(),
    };

    attachments::apply_changes(&state, OwnerKind::DiscussionEntry, id, form.changes).await?;

    let mut conn = state.db()?;
    let entry: DiscussionEntry = diesel::update(discussion_entries::table.find(id))
        .set((
            discussion_entries::title.eq(title),
            discussion_entries::content.eq(content),
            discussion_entries::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(DiscussionEntry::as_returning())
        .get_result(&mut conn)?;
    info!(entry_id = %id, "discussion entry updated");
    Ok(Json(entry_response(&mut conn, entry)?))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let (entry, discussion) = load_entry(&mut conn, &viewer, id)?;
    viewer.require_author(entry.author_id)?;

    let keys = delete_entry_rows(&mut conn, entry.id, discussion.id)?;
    drop(conn);

    attachments::remove_objects(&state, keys).await;
    info!(entry_id = %id, "discussion entry deleted");
    Ok(StatusCode::NO_CONTENT)
}
