use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::{
    access::Viewer,
    ancestors::{
        legacy,
        person::{insert_person, update_person},
        relation,
        visibility::{self, PersonDetail, PersonSummary},
        Confidentiality, PersonFields,
    },
    attachments::{self, AttachmentKind, OwnerKind, SlotChange},
    error::{AppError, AppResult},
    models::Person,
    schema::{discussion_entries, discussions, persons},
    state::AppState,
    utils::json::field_patch,
};

use super::forms::read_slot_form;

/// Keys a client may send back unchanged from a detail response.
const READ_ONLY_KEYS: [&str; 8] = [
    "id",
    "name",
    "birth_date_formatted",
    "death_date_formatted",
    "images",
    "created_at",
    "updated_at",
    "legacy",
];

struct PersonDraft {
    refn: Option<String>,
    confidential: Confidentiality,
    fields: PersonFields,
}

impl PersonDraft {
    fn from_person(person: &Person) -> Self {
        Self {
            refn: Some(person.refn.clone()),
            confidential: Confidentiality::of(person),
            fields: PersonFields::from_person(person),
        }
    }

    /// Applies a partial JSON object: absent keys stay, `null` clears.
    fn apply(&mut self, body: &Map<String, Value>) -> AppResult<()> {
        for (key, value) in body {
            if READ_ONLY_KEYS.contains(&key.as_str()) {
                continue;
            }
            let patch = field_patch(Some(value))
                .map_err(|err| AppError::bad_request(format!("{key}: {err}")))?;
            let Some(value) = patch.resolve() else {
                continue;
            };
            match key.as_str() {
                "refn" => {
                    self.refn = value
                        .map(|refn| refn.trim().to_string())
                        .filter(|refn| !refn.is_empty());
                }
                "confidential" => {
                    let raw = value.unwrap_or_default();
                    self.confidential = Confidentiality::parse(raw.trim()).ok_or_else(|| {
                        AppError::bad_request(format!("invalid confidential value '{raw}'"))
                    })?;
                }
                field => {
                    if !self.fields.set(field, value) {
                        return Err(AppError::bad_request(format!("unknown field '{field}'")));
                    }
                }
            }
        }
        Ok(())
    }

    /// Normalizes the draft and checks the viewer keeps access to it.
    fn validate(&mut self, state: &AppState, viewer: &Viewer) -> AppResult<()> {
        self.fields
            .validate(&state.config.family_trees)
            .map_err(AppError::bad_request)?;
        if !viewer.can_see(
            self.fields.family_1.as_deref(),
            self.fields.family_2.as_deref(),
        ) {
            return Err(AppError::bad_request(
                "a person must belong to one of your families",
            ));
        }
        Ok(())
    }
}

fn refn_conflict(err: diesel::result::Error) -> AppError {
    match err {
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        ) => AppError::bad_request("a person with this refn already exists"),
        other => other.into(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PersonListQuery {
    pub search: Option<String>,
}

pub async fn list_persons(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(query): Query<PersonListQuery>,
) -> AppResult<Json<Vec<PersonSummary>>> {
    let mut conn = state.db()?;
    let persons = visibility::list_persons(&mut conn, &viewer, query.search.as_deref())?;
    Ok(Json(persons))
}

pub async fn create_person(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(body): Json<Map<String, Value>>,
) -> AppResult<(StatusCode, Json<PersonDetail>)> {
    let mut draft = PersonDraft {
        refn: None,
        confidential: Confidentiality::No,
        fields: PersonFields::default(),
    };
    draft.apply(&body)?;
    if draft.fields.family_1.is_none() && draft.fields.family_2.is_none() {
        draft.fields.family_1 = viewer.families.first().cloned();
        draft.fields.family_2 = viewer.families.get(1).cloned();
    }
    draft.validate(&state, &viewer)?;

    let mut conn = state.db()?;
    let person = insert_person(
        &mut conn,
        draft.refn,
        draft.confidential,
        draft.fields,
        Some(viewer.id),
    )
    .map_err(refn_conflict)?;

    info!(person_id = %person.id, refn = %person.refn, "person created");
    let detail = visibility::detail(&mut conn, &person)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_person(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PersonDetail>> {
    let mut conn = state.db()?;
    let detail = visibility::find_person(&mut conn, &viewer, id)?.ok_or_else(AppError::not_found)?;
    Ok(Json(detail))
}

pub async fn update_person_fields(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
    Json(body): Json<Map<String, Value>>,
) -> AppResult<Json<PersonDetail>> {
    let mut conn = state.db()?;
    let existing =
        visibility::load_visible(&mut conn, &viewer, id)?.ok_or_else(AppError::not_found)?;

    let mut draft = PersonDraft::from_person(&existing);
    draft.apply(&body)?;
    draft.validate(&state, &viewer)?;
    let refn = draft
        .refn
        .ok_or_else(|| AppError::bad_request("refn must not be empty"))?;

    let person = update_person(
        &mut conn,
        &existing,
        refn,
        draft.confidential,
        draft.fields,
        Some(viewer.id),
    )
    .map_err(refn_conflict)?;

    info!(person_id = %person.id, "person updated");
    Ok(Json(visibility::detail(&mut conn, &person)?))
}

pub async fn delete_person(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    viewer.require_superuser()?;
    let mut conn = state.db()?;

    let keys = conn.transaction::<_, AppError, _>(|conn| {
        let mut keys = attachments::delete_rows_for_owner(conn, OwnerKind::Person, id)?;
        let entry_ids: Vec<Uuid> = discussion_entries::table
            .inner_join(discussions::table)
            .filter(discussions::person_id.eq(id))
            .select(discussion_entries::id)
            .load(conn)?;
        for entry_id in entry_ids {
            keys.extend(attachments::delete_rows_for_owner(
                conn,
                OwnerKind::DiscussionEntry,
                entry_id,
            )?);
        }
        let deleted = diesel::delete(persons::table.find(id)).execute(conn)?;
        if deleted == 0 {
            return Err(AppError::not_found());
        }
        Ok(keys)
    })?;
    drop(conn);

    attachments::remove_objects(&state, keys).await;
    info!(person_id = %id, "person deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Replaces, clears or retitles the image slots of a person.
pub async fn update_person_images(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<Json<PersonDetail>> {
    {
        let mut conn = state.db()?;
        if !visibility::is_visible(&mut conn, &viewer, id)? {
            return Err(AppError::not_found());
        }
    }

    let form = read_slot_form(&mut multipart).await?;
    if form
        .changes
        .iter()
        .any(|change| {
            matches!(change, SlotChange::Store(upload) if upload.kind == AttachmentKind::Pdf)
        })
    {
        return Err(AppError::bad_request("persons only accept images"));
    }
    attachments::apply_changes(&state, OwnerKind::Person, id, form.changes).await?;

    let mut conn = state.db()?;
    let person: Person = persons::table
        .find(id)
        .select(Person::as_select())
        .first(&mut conn)?;
    Ok(Json(visibility::detail(&mut conn, &person)?))
}

/// The person in the flat export layout, relation columns included.
pub async fn get_legacy_person(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Map<String, Value>>> {
    let mut conn = state.db()?;
    let person =
        visibility::load_visible(&mut conn, &viewer, id)?.ok_or_else(AppError::not_found)?;
    let detail = visibility::detail(&mut conn, &person)?;
    let record = relation::load_relation(&mut conn, id)?;
    let ids = record.as_ref().map(legacy::referenced_ids).unwrap_or_default();
    let relatives = visibility::relatives(&mut conn, &ids)?;
    Ok(Json(legacy::legacy_record(
        &detail,
        record.as_ref(),
        &relatives,
    )))
}
