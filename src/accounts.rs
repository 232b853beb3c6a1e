use std::collections::HashMap;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::schema::{user_groups, user_permissions, users};

const STAFF_MODELS: [&str; 8] = [
    "person",
    "relation",
    "info",
    "faminfo",
    "recipe",
    "comment",
    "discussion",
    "discussionentry",
];
const STAFF_ACTIONS: [&str; 3] = ["add", "change", "view"];

/// Lowercase, non-empty, de-duplicated family keys.
pub fn allowed_families(family_1: Option<&str>, family_2: Option<&str>) -> Vec<String> {
    let mut families: Vec<String> = Vec::with_capacity(2);
    for family in [family_1, family_2].into_iter().flatten() {
        let family = family.trim().to_lowercase();
        if !family.is_empty() && !families.contains(&family) {
            families.push(family);
        }
    }
    families
}

pub fn family_group_name(family: &str) -> String {
    let mut chars = family.chars();
    let capitalized: String = match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    };
    format!("Stammbaum {capitalized}")
}

pub fn staff_permissions() -> Vec<String> {
    STAFF_MODELS
        .iter()
        .flat_map(|model| {
            STAFF_ACTIONS
                .iter()
                .map(move |action| format!("{action}_{model}"))
        })
        .collect()
}

/// Rewrites the group and permission rows of `user` from its current
/// families and staff flags. Called after every user write.
pub fn sync_memberships(conn: &mut PgConnection, user: &User) -> QueryResult<()> {
    conn.transaction(|conn| {
        diesel::delete(user_groups::table.filter(user_groups::user_id.eq(user.id)))
            .execute(conn)?;
        let groups: Vec<_> = allowed_families(user.family_1.as_deref(), user.family_2.as_deref())
            .iter()
            .map(|family| {
                (
                    user_groups::user_id.eq(user.id),
                    user_groups::group_name.eq(family_group_name(family)),
                )
            })
            .collect();
        if !groups.is_empty() {
            diesel::insert_into(user_groups::table)
                .values(&groups)
                .execute(conn)?;
        }

        diesel::delete(user_permissions::table.filter(user_permissions::user_id.eq(user.id)))
            .execute(conn)?;
        if user.is_staff && !user.is_superuser {
            let permissions: Vec<_> = staff_permissions()
                .into_iter()
                .map(|codename| {
                    (
                        user_permissions::user_id.eq(user.id),
                        user_permissions::codename.eq(codename),
                    )
                })
                .collect();
            diesel::insert_into(user_permissions::table)
                .values(&permissions)
                .execute(conn)?;
        }

        debug!(user_id = %user.id, groups = groups.len(), "user memberships synced");
        Ok(())
    })
}

/// Display names of the given authors, for content listings.
pub fn author_names(
    conn: &mut PgConnection,
    author_ids: &[Uuid],
) -> QueryResult<HashMap<Uuid, String>> {
    if author_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, String)> = users::table
        .filter(users::id.eq_any(author_ids))
        .select((users::id, users::author_name))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

pub fn find_user_by_email(conn: &mut PgConnection, email: &str) -> QueryResult<Option<User>> {
    users::table
        .filter(users::email.eq(normalize_email(email)))
        .select(User::as_select())
        .first(conn)
        .optional()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Fields needed to create an account.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub guarantor_email: Option<String>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
}

/// Inserts the account and its memberships. A taken email is a 400.
pub fn create_account(conn: &mut PgConnection, account: NewAccount) -> AppResult<User> {
    let email = normalize_email(&account.email);
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email address is required"));
    }
    let password_hash = hash_password(&account.password).map_err(AppError::internal)?;
    let author_name = format!("{} {}", account.first_name.trim(), account.last_name.trim())
        .trim()
        .to_string();
    let guarantor_email = account
        .guarantor_email
        .map(|value| normalize_email(&value))
        .filter(|value| !value.is_empty());

    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: email.clone(),
        email,
        password_hash,
        first_name: account.first_name.trim().to_string(),
        last_name: account.last_name.trim().to_string(),
        author_name,
        is_active: account.is_active,
        is_staff: account.is_staff,
        is_superuser: account.is_superuser,
        guarantor: guarantor_email.is_some(),
        guarantor_email,
        family_1: account.family_1,
        family_2: account.family_2,
    };

    let user = match diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(conn)
    {
        Ok(user) => user,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => return Err(AppError::bad_request("a user with this email already exists")),
        Err(err) => return Err(err.into()),
    };
    sync_memberships(conn, &user)?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_families_are_lowercase_and_unique() {
        assert_eq!(
            allowed_families(Some("Kempe"), Some("kempe")),
            vec!["kempe".to_string()]
        );
        assert_eq!(
            allowed_families(Some(""), Some("Huenten")),
            vec!["huenten".to_string()]
        );
        assert!(allowed_families(None, Some("  ")).is_empty());
    }

    #[test]
    fn group_names_capitalize_the_family() {
        assert_eq!(family_group_name("kempe"), "Stammbaum Kempe");
        assert_eq!(family_group_name("HUENTEN"), "Stammbaum Huenten");
    }

    #[test]
    fn staff_permissions_cover_every_content_model() {
        let permissions = staff_permissions();
        assert_eq!(permissions.len(), 24);
        assert!(permissions.contains(&"add_person".to_string()));
        assert!(permissions.contains(&"change_discussionentry".to_string()));
        assert!(permissions.contains(&"view_faminfo".to_string()));
        assert!(!permissions.iter().any(|codename| codename.starts_with("delete_")));
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Anna@Example.COM "), "anna@example.com");
    }
}
