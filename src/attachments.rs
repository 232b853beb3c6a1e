//! Image and PDF slots of persons and content rows.
//!
//! The bytes live in object storage, one row per occupied slot in
//! `attachments`. Replacing or clearing a slot removes the old objects
//! after the database write; storage failures there are logged and
//! otherwise ignored.

use std::path::Path;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::jobs::enqueue_thumbnail;
use crate::models::{Attachment, NewAttachment};
use crate::schema::attachments;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    Person,
    Info,
    FamInfo,
    Recipe,
    DiscussionEntry,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Person => "person",
            OwnerKind::Info => "info",
            OwnerKind::FamInfo => "faminfo",
            OwnerKind::Recipe => "recipe",
            OwnerKind::DiscussionEntry => "discussion_entry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "person" => Some(OwnerKind::Person),
            "info" => Some(OwnerKind::Info),
            "faminfo" => Some(OwnerKind::FamInfo),
            "recipe" => Some(OwnerKind::Recipe),
            "discussion_entry" => Some(OwnerKind::DiscussionEntry),
            _ => None,
        }
    }

    /// Storage prefix for this owner's objects.
    pub fn module(&self) -> &'static str {
        match self {
            OwnerKind::Person => "images",
            OwnerKind::Info => "infos",
            OwnerKind::FamInfo => "famInfos",
            OwnerKind::Recipe => "recipes",
            OwnerKind::DiscussionEntry => "discussions",
        }
    }

    pub fn slots(&self, kind: AttachmentKind) -> i32 {
        match (self, kind) {
            (OwnerKind::Person, AttachmentKind::Image) => 6,
            (OwnerKind::Person, AttachmentKind::Pdf) => 0,
            (_, _) => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Pdf,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Pdf => "pdf",
        }
    }
}

/// An uploaded file bound for one slot.
#[derive(Debug, Clone)]
pub struct Upload {
    pub kind: AttachmentKind,
    pub slot: i32,
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub title: Option<String>,
}

/// A pending change to one slot, collected from a multipart form.
#[derive(Debug, Clone)]
pub enum SlotChange {
    Store(Upload),
    Clear { kind: AttachmentKind, slot: i32 },
    Retitle { kind: AttachmentKind, slot: i32, title: Option<String> },
}

impl SlotChange {
    fn target(&self) -> (AttachmentKind, i32) {
        match self {
            SlotChange::Store(upload) => (upload.kind, upload.slot),
            SlotChange::Clear { kind, slot } | SlotChange::Retitle { kind, slot, .. } => {
                (*kind, *slot)
            }
        }
    }
}

/// A client-facing reference to a stored file. URLs point at the media
/// routes, which check visibility before redirecting to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaLink {
    pub id: Uuid,
    pub slot: i32,
    pub title: Option<String>,
    pub name: Option<String>,
    pub url: String,
    pub thumbnail_url: Option<String>,
}

impl MediaLink {
    pub fn from_attachment(attachment: &Attachment) -> Self {
        Self {
            id: attachment.id,
            slot: attachment.slot,
            title: attachment.title.clone(),
            name: attachment.original_name.clone(),
            url: format!("/api/media/{}", attachment.id),
            thumbnail_url: attachment
                .thumbnail_key
                .as_ref()
                .map(|_| format!("/api/media/{}/thumbnail", attachment.id)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaSet {
    pub images: Vec<MediaLink>,
    pub pdfs: Vec<MediaLink>,
}

impl MediaSet {
    pub fn from_attachments<'a>(attachments: impl IntoIterator<Item = &'a Attachment>) -> Self {
        let mut set = MediaSet::default();
        for attachment in attachments {
            let link = MediaLink::from_attachment(attachment);
            if attachment.kind == AttachmentKind::Pdf.as_str() {
                set.pdfs.push(link);
            } else {
                set.images.push(link);
            }
        }
        set.images.sort_by_key(|link| link.slot);
        set.pdfs.sort_by_key(|link| link.slot);
        set
    }
}

pub fn file_extension(
    file_name: Option<&str>,
    content_type: Option<&str>,
    fallback: &str,
) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .or_else(|| {
            content_type
                .and_then(|mime| mime_guess::get_mime_extensions_str(mime))
                .and_then(|extensions| {
                    extensions
                        .iter()
                        .find(|ext| **ext == "jpg")
                        .or_else(|| extensions.first())
                })
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| fallback.to_string())
}

pub fn image_key(owner: OwnerKind, owner_id: Uuid, slot: i32, extension: &str) -> String {
    format!("{}/{owner_id}_image{slot}.{extension}", owner.module())
}

pub fn pdf_key(owner: OwnerKind, extension: &str) -> String {
    format!("{}/{}.{extension}", owner.module(), Uuid::new_v4())
}

pub fn thumbnail_key(storage_key: &str) -> String {
    let path = Path::new(storage_key);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("image");
    let module = path
        .parent()
        .and_then(|parent| parent.to_str())
        .filter(|parent| !parent.is_empty());
    match module {
        Some(module) => format!("{module}/thumbnails/{stem}_thumbnail.jpg"),
        None => format!("thumbnails/{stem}_thumbnail.jpg"),
    }
}

fn validate_upload(owner: OwnerKind, upload: &Upload) -> AppResult<()> {
    let limit = owner.slots(upload.kind);
    if upload.slot < 1 || upload.slot > limit {
        return Err(AppError::bad_request(format!(
            "{} slot {} is not available",
            upload.kind.as_str(),
            upload.slot
        )));
    }
    if upload.bytes.is_empty() {
        return Err(AppError::bad_request("uploaded file is empty"));
    }
    let content_type = upload.content_type.as_deref().unwrap_or_default();
    let extension = file_extension(upload.file_name.as_deref(), None, "");
    let accepted = match upload.kind {
        AttachmentKind::Image => {
            content_type.starts_with("image/")
                || mime_guess::from_ext(&extension)
                    .first()
                    .map(|mime| mime.type_() == mime_guess::mime::IMAGE)
                    .unwrap_or(false)
        }
        AttachmentKind::Pdf => content_type == "application/pdf" || extension == "pdf",
    };
    if !accepted {
        return Err(AppError::bad_request(format!(
            "{} slot {} expects a {} file",
            upload.kind.as_str(),
            upload.slot,
            upload.kind.as_str()
        )));
    }
    Ok(())
}

pub fn load_for_owner(
    conn: &mut PgConnection,
    owner: OwnerKind,
    owner_id: Uuid,
) -> QueryResult<Vec<Attachment>> {
    attachments::table
        .filter(attachments::owner_kind.eq(owner.as_str()))
        .filter(attachments::owner_id.eq(owner_id))
        .order((attachments::kind.asc(), attachments::slot.asc()))
        .select(Attachment::as_select())
        .load(conn)
}

pub fn load_for_owners(
    conn: &mut PgConnection,
    owner: OwnerKind,
    owner_ids: &[Uuid],
) -> QueryResult<Vec<Attachment>> {
    attachments::table
        .filter(attachments::owner_kind.eq(owner.as_str()))
        .filter(attachments::owner_id.eq_any(owner_ids))
        .order((attachments::kind.asc(), attachments::slot.asc()))
        .select(Attachment::as_select())
        .load(conn)
}

/// Applies slot changes for one owner: uploads new files, rewrites the
/// attachment rows and queues thumbnails, then removes replaced objects.
pub async fn apply_changes(
    state: &AppState,
    owner: OwnerKind,
    owner_id: Uuid,
    changes: Vec<SlotChange>,
) -> AppResult<()> {
    if changes.is_empty() {
        return Ok(());
    }

    let mut stored: Vec<(SlotChange, Option<String>)> = Vec::with_capacity(changes.len());
    for change in changes {
        if let SlotChange::Store(upload) = &change {
            validate_upload(owner, upload)?;
            let extension = file_extension(
                upload.file_name.as_deref(),
                upload.content_type.as_deref(),
                match upload.kind {
                    AttachmentKind::Image => "jpg",
                    AttachmentKind::Pdf => "pdf",
                },
            );
            let key = match upload.kind {
                AttachmentKind::Image => image_key(owner, owner_id, upload.slot, &extension),
                AttachmentKind::Pdf => pdf_key(owner, &extension),
            };
            state
                .storage
                .put_object(&key, upload.bytes.clone(), upload.content_type.clone())
                .await
                .map_err(|err| AppError::internal(format!("failed to store upload: {err}")))?;
            stored.push((change, Some(key)));
        } else {
            stored.push((change, None));
        }
    }

    let mut conn = state.db()?;
    let (stale, created) = conn.transaction::<_, AppError, _>(|conn| {
        let mut stale: Vec<String> = Vec::new();
        let mut created: Vec<Uuid> = Vec::new();
        for (change, key) in &stored {
            let (kind, slot) = change.target();
            let existing: Option<Attachment> = attachments::table
                .filter(attachments::owner_kind.eq(owner.as_str()))
                .filter(attachments::owner_id.eq(owner_id))
                .filter(attachments::kind.eq(kind.as_str()))
                .filter(attachments::slot.eq(slot))
                .select(Attachment::as_select())
                .first(conn)
                .optional()?;

            match (change, key) {
                (SlotChange::Store(upload), Some(key)) => {
                    if let Some(old) = &existing {
                        diesel::delete(attachments::table.find(old.id)).execute(conn)?;
                        if &old.storage_key != key {
                            stale.push(old.storage_key.clone());
                        }
                        if let Some(thumb) = &old.thumbnail_key {
                            if *thumb != thumbnail_key(key) {
                                stale.push(thumb.clone());
                            }
                        }
                    }
                    let row = NewAttachment {
                        id: Uuid::new_v4(),
                        owner_kind: owner.as_str().to_string(),
                        owner_id,
                        kind: kind.as_str().to_string(),
                        slot,
                        storage_key: key.clone(),
                        thumbnail_key: None,
                        original_name: upload.file_name.clone(),
                        title: upload
                            .title
                            .clone()
                            .or_else(|| existing.as_ref().and_then(|old| old.title.clone())),
                        content_type: upload.content_type.clone(),
                    };
                    diesel::insert_into(attachments::table)
                        .values(&row)
                        .execute(conn)?;
                    if kind == AttachmentKind::Image {
                        enqueue_thumbnail(conn, row.id)?;
                    }
                    created.push(row.id);
                }
                (SlotChange::Clear { .. }, _) => {
                    if let Some(old) = existing {
                        diesel::delete(attachments::table.find(old.id)).execute(conn)?;
                        stale.push(old.storage_key);
                        stale.extend(old.thumbnail_key);
                    }
                }
                (SlotChange::Retitle { title, .. }, _) => {
                    if let Some(old) = existing {
                        diesel::update(attachments::table.find(old.id))
                            .set(attachments::title.eq(title.clone()))
                            .execute(conn)?;
                    }
                }
                (SlotChange::Store(_), None) => {}
            }
        }
        Ok((stale, created))
    })?;
    drop(conn);

    info!(
        owner = owner.as_str(),
        owner_id = %owner_id,
        created = created.len(),
        removed = stale.len(),
        "attachments updated"
    );
    remove_objects(state, stale).await;
    Ok(())
}

/// Deletes every attachment row of an owner and returns the object keys
/// to remove from storage once the surrounding transaction has committed.
pub fn delete_rows_for_owner(
    conn: &mut PgConnection,
    owner: OwnerKind,
    owner_id: Uuid,
) -> QueryResult<Vec<String>> {
    let removed: Vec<Attachment> = diesel::delete(
        attachments::table
            .filter(attachments::owner_kind.eq(owner.as_str()))
            .filter(attachments::owner_id.eq(owner_id)),
    )
    .returning(Attachment::as_returning())
    .get_results(conn)?;
    Ok(removed
        .into_iter()
        .flat_map(|attachment| {
            std::iter::once(attachment.storage_key).chain(attachment.thumbnail_key)
        })
        .collect())
}

pub async fn remove_objects(state: &AppState, keys: Vec<String>) {
    for key in keys {
        if let Err(err) = state.storage.delete_object(&key).await {
            warn!(key = %key, error = %err, "failed to delete stored object");
        }
    }
}
