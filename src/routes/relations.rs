use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    access::Viewer,
    ancestors::{
        relation,
        save_relation,
        visibility::{self, RelationView},
        RelationInput,
    },
    error::{AppError, AppResult},
    state::AppState,
};

#[derive(Serialize)]
pub struct SavedRelation {
    pub relation: RelationView,
    /// Every person whose relation record the save rewrote.
    pub touched: Vec<Uuid>,
}

pub async fn get_relation(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(person_id): Path<Uuid>,
) -> AppResult<Json<RelationView>> {
    let mut conn = state.db()?;
    let view = visibility::find_relation(&mut conn, &viewer, person_id)?
        .ok_or_else(AppError::not_found)?;
    Ok(Json(view))
}

pub async fn save_person_relation(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(person_id): Path<Uuid>,
    Json(input): Json<RelationInput>,
) -> AppResult<Json<SavedRelation>> {
    let mut conn = state.db()?;
    if !visibility::is_visible(&mut conn, &viewer, person_id)? {
        return Err(AppError::not_found());
    }
    let hidden = visibility::hidden_persons(&mut conn, &viewer, &input.referenced())?;
    if !hidden.is_empty() {
        return Err(AppError::bad_request(
            "relation references persons outside your families",
        ));
    }

    let report = save_relation(&mut conn, person_id, input)?;
    info!(
        person_id = %person_id,
        user_id = %viewer.id,
        touched = report.touched.len(),
        "relation propagated"
    );

    let relation = visibility::find_relation(&mut conn, &viewer, person_id)?
        .ok_or_else(AppError::not_found)?;
    Ok(Json(SavedRelation {
        relation,
        touched: report.touched,
    }))
}

pub async fn delete_relation(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(person_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    viewer.require_superuser()?;
    let mut conn = state.db()?;
    if relation::delete_relation(&mut conn, person_id)? == 0 {
        return Err(AppError::not_found());
    }
    info!(person_id = %person_id, "relation deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_relations(
    State(state): State<AppState>,
    viewer: Viewer,
) -> AppResult<Json<Vec<RelationView>>> {
    let mut conn = state.db()?;
    Ok(Json(visibility::list_relations(&mut conn, &viewer)?))
}
