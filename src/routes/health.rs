use axum::{extract::State, http::StatusCode, response::Json};
use diesel::prelude::*;
use diesel::sql_query;
use serde_json::{json, Value};
use tracing::warn;

use crate::{error::AppError, state::AppState};

/// Liveness plus a round trip to the database.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = tokio::task::spawn_blocking(move || {
        let mut conn = state.db()?;
        sql_query("SELECT 1").execute(&mut conn)?;
        Ok::<_, AppError>(())
    })
    .await
    .map_err(AppError::internal)
    .and_then(|result| result);

    match database {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "ok" })),
        ),
        Err(err) => {
            warn!(error = %err, "health check could not reach the database");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unavailable" })),
            )
        }
    }
}
