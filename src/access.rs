//! Family scoping of reads and writes.
//!
//! Every row that users can see carries up to two family keys. A viewer sees
//! a row when the keys intersect their own families; superusers see
//! everything.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::accounts::allowed_families;
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::models::User;
use crate::schema::users;
use crate::state::AppState;

/// The requesting user as loaded from the database for this request.
#[derive(Debug, Clone, Serialize)]
pub struct Viewer {
    pub id: Uuid,
    pub email: String,
    pub author_name: String,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub families: Vec<String>,
}

impl Viewer {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            author_name: user.author_name.clone(),
            is_superuser: user.is_superuser,
            is_staff: user.is_staff,
            families: allowed_families(user.family_1.as_deref(), user.family_2.as_deref()),
        }
    }

    /// Loads an active user. Inactive or deleted accounts yield `None`.
    pub fn load(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Option<Self>> {
        let user: Option<User> = users::table
            .find(user_id)
            .filter(users::is_active.eq(true))
            .select(User::as_select())
            .first(conn)
            .optional()?;
        Ok(user.as_ref().map(Self::from_user))
    }

    /// Families the viewer is limited to, or `None` for an unrestricted viewer.
    pub fn family_scope(&self) -> Option<&[String]> {
        if self.is_superuser {
            None
        } else {
            Some(&self.families)
        }
    }

    pub fn can_see(&self, family_1: Option<&str>, family_2: Option<&str>) -> bool {
        match self.family_scope() {
            None => true,
            Some(families) => [family_1, family_2]
                .into_iter()
                .flatten()
                .map(str::to_lowercase)
                .any(|family| families.contains(&family)),
        }
    }

    pub fn require_superuser(&self) -> Result<(), AppError> {
        if self.is_superuser {
            Ok(())
        } else {
            Err(AppError::forbidden(
                "only administrators may perform this action",
            ))
        }
    }

    /// Authors may change their own rows; superusers may change any row.
    pub fn require_author(&self, author_id: Option<Uuid>) -> Result<(), AppError> {
        if self.is_superuser || author_id == Some(self.id) {
            Ok(())
        } else {
            Err(AppError::forbidden("you can only modify your own entries"))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        let mut conn = state.db()?;
        Viewer::load(&mut conn, user.user_id)?.ok_or_else(AppError::unauthorized)
    }
}

/// Restricts a boxed query on `$table` to rows whose `family_1` or
/// `family_2` is among the viewer's families.
#[macro_export]
macro_rules! scope_to_families {
    ($query:expr, $viewer:expr, $table:ident) => {{
        let query = $query;
        match $viewer.family_scope() {
            None => query,
            Some(families) => {
                let families = families.to_vec();
                query.filter(
                    $table::family_1
                        .eq_any(families.clone())
                        .or($table::family_2.eq_any(families)),
                )
            }
        }
    }};
}
