use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub author_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub guarantor: bool,
    pub guarantor_email: Option<String>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
    pub notes: Option<String>,
    pub alert_info: bool,
    pub alert_faminfo: bool,
    pub alert_recipe: bool,
    pub alert_discussion: bool,
    pub last_login: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub author_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub guarantor: bool,
    pub guarantor_email: Option<String>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = persons)]
pub struct Person {
    pub id: Uuid,
    pub refn: String,
    pub name: String,
    pub uid: Option<String>,
    pub surn: Option<String>,
    pub givn: Option<String>,
    pub sex: Option<String>,
    pub occu: Option<String>,
    pub chan_date: Option<String>,
    pub chan_date_time: Option<String>,
    pub birt_date: Option<String>,
    pub birth_date_formatted: Option<NaiveDate>,
    pub birt_plac: Option<String>,
    pub deat_date: Option<String>,
    pub death_date_formatted: Option<NaiveDate>,
    pub deat_plac: Option<String>,
    pub note: Option<String>,
    pub chr_date: Option<String>,
    pub chr_plac: Option<String>,
    pub chr_addr: Option<String>,
    pub buri_date: Option<String>,
    pub buri_plac: Option<String>,
    pub name_rufname: Option<String>,
    pub name_npfx: Option<String>,
    pub name_nick: Option<String>,
    pub name_marnm: Option<String>,
    pub sour: Option<String>,
    pub reli: Option<String>,
    pub confidential: String,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
    pub created_by: Option<Uuid>,
    pub last_modified_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Full writable column set of a person row, used for both inserts and
/// whole-row updates.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = persons, treat_none_as_null = true)]
pub struct PersonRow {
    pub id: Uuid,
    pub refn: String,
    pub name: String,
    pub uid: Option<String>,
    pub surn: Option<String>,
    pub givn: Option<String>,
    pub sex: Option<String>,
    pub occu: Option<String>,
    pub chan_date: Option<String>,
    pub chan_date_time: Option<String>,
    pub birt_date: Option<String>,
    pub birth_date_formatted: Option<NaiveDate>,
    pub birt_plac: Option<String>,
    pub deat_date: Option<String>,
    pub death_date_formatted: Option<NaiveDate>,
    pub deat_plac: Option<String>,
    pub note: Option<String>,
    pub chr_date: Option<String>,
    pub chr_plac: Option<String>,
    pub chr_addr: Option<String>,
    pub buri_date: Option<String>,
    pub buri_plac: Option<String>,
    pub name_rufname: Option<String>,
    pub name_npfx: Option<String>,
    pub name_nick: Option<String>,
    pub name_marnm: Option<String>,
    pub sour: Option<String>,
    pub reli: Option<String>,
    pub confidential: String,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
    pub created_by: Option<Uuid>,
    pub last_modified_by: Option<Uuid>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = relations, primary_key(person_id))]
pub struct RelationRow {
    pub person_id: Uuid,
    pub father_id: Option<Uuid>,
    pub mother_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = marriages)]
pub struct MarriageRow {
    pub id: Uuid,
    pub person_id: Uuid,
    pub position: i32,
    pub spouse_id: Option<Uuid>,
    pub marriage_date: Option<String>,
    pub marriage_place: Option<String>,
    pub family_status: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = marriages)]
pub struct NewMarriage {
    pub id: Uuid,
    pub person_id: Uuid,
    pub position: i32,
    pub spouse_id: Option<Uuid>,
    pub marriage_date: Option<String>,
    pub marriage_place: Option<String>,
    pub family_status: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = marriage_children)]
pub struct NewMarriageChild {
    pub marriage_id: Uuid,
    pub child_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = infos)]
pub struct Info {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Option<Uuid>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = infos)]
pub struct NewInfo {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Option<Uuid>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = fam_infos)]
pub struct FamInfo {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Option<Uuid>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = fam_infos)]
pub struct NewFamInfo {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Option<Uuid>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = recipes)]
pub struct Recipe {
    pub id: Uuid,
    pub title: String,
    pub instructions: String,
    pub author_id: Option<Uuid>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = recipes)]
pub struct NewRecipe {
    pub id: Uuid,
    pub title: String,
    pub instructions: String,
    pub author_id: Option<Uuid>,
    pub family_1: Option<String>,
    pub family_2: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    pub author_id: Option<Uuid>,
    pub info_id: Option<Uuid>,
    pub recipe_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    pub id: Uuid,
    pub content: String,
    pub author_id: Option<Uuid>,
    pub info_id: Option<Uuid>,
    pub recipe_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = discussions)]
pub struct Discussion {
    pub id: Uuid,
    pub person_id: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = discussions)]
pub struct NewDiscussion {
    pub id: Uuid,
    pub person_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = discussion_entries)]
#[diesel(belongs_to(Discussion))]
pub struct DiscussionEntry {
    pub id: Uuid,
    pub discussion_id: Uuid,
    pub author_id: Option<Uuid>,
    pub title: Option<String>,
    pub content: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = discussion_entries)]
pub struct NewDiscussionEntry {
    pub id: Uuid,
    pub discussion_id: Uuid,
    pub author_id: Option<Uuid>,
    pub title: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = attachments)]
pub struct Attachment {
    pub id: Uuid,
    pub owner_kind: String,
    pub owner_id: Uuid,
    pub kind: String,
    pub slot: i32,
    pub storage_key: String,
    pub thumbnail_key: Option<String>,
    pub original_name: Option<String>,
    pub title: Option<String>,
    pub content_type: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = attachments)]
pub struct NewAttachment {
    pub id: Uuid,
    pub owner_kind: String,
    pub owner_id: Uuid,
    pub kind: String,
    pub slot: i32,
    pub storage_key: String,
    pub thumbnail_key: Option<String>,
    pub original_name: Option<String>,
    pub title: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
