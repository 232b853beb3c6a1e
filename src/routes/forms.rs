//! Multipart forms carrying text fields next to numbered file slots.
//!
//! File slots are named `image_<n>` and `pdf_<n>`; an empty part clears the
//! slot. `image_<n>_title` and `pdf_<n>_name` label a slot with or without
//! a new file.

use std::collections::HashMap;

use axum::extract::Multipart;
use tracing::error;

use crate::attachments::{AttachmentKind, SlotChange, Upload};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotPart {
    File,
    Label,
}

fn slot_field(name: &str) -> Option<(AttachmentKind, i32, SlotPart)> {
    let (kind, rest) = if let Some(rest) = name.strip_prefix("image_") {
        (AttachmentKind::Image, rest)
    } else if let Some(rest) = name.strip_prefix("pdf_") {
        (AttachmentKind::Pdf, rest)
    } else {
        return None;
    };
    let label_suffix = match kind {
        AttachmentKind::Image => "_title",
        AttachmentKind::Pdf => "_name",
    };
    let (number, part) = match rest.strip_suffix(label_suffix) {
        Some(number) => (number, SlotPart::Label),
        None => (rest, SlotPart::File),
    };
    let slot = number.parse::<i32>().ok()?;
    Some((kind, slot, part))
}

#[derive(Debug, Default)]
pub struct SlotForm {
    pub text: HashMap<String, String>,
    pub changes: Vec<SlotChange>,
}

impl SlotForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.text.get(name).map(String::as_str)
    }

    /// Trimmed, non-empty text value.
    pub fn value(&self, name: &str) -> Option<String> {
        self.text(name)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    pub fn required(&self, name: &str) -> AppResult<String> {
        self.value(name)
            .ok_or_else(|| AppError::bad_request(format!("{name} is required")))
    }
}

fn invalid_form<E: std::fmt::Display>(err: E) -> AppError {
    error!(error = %err, "invalid multipart data");
    AppError::bad_request(format!("invalid multipart data: {err}"))
}

pub async fn read_slot_form(multipart: &mut Multipart) -> AppResult<SlotForm> {
    let mut form = SlotForm::default();
    let mut files: Vec<Upload> = Vec::new();
    let mut cleared: Vec<(AttachmentKind, i32)> = Vec::new();
    let mut labels: Vec<(AttachmentKind, i32, Option<String>)> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match slot_field(&name) {
            Some((kind, slot, SlotPart::File)) => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(invalid_form)?;
                if data.is_empty() {
                    cleared.push((kind, slot));
                } else {
                    files.push(Upload {
                        kind,
                        slot,
                        bytes: data.to_vec(),
                        file_name,
                        content_type,
                        title: None,
                    });
                }
            }
            Some((kind, slot, SlotPart::Label)) => {
                let value = field.text().await.map_err(invalid_form)?;
                let value = value.trim();
                labels.push((kind, slot, (!value.is_empty()).then(|| value.to_string())));
            }
            None => {
                let value = field.text().await.map_err(invalid_form)?;
                form.text.insert(name, value);
            }
        }
    }

    for (kind, slot, label) in labels {
        match files
            .iter_mut()
            .find(|upload| upload.kind == kind && upload.slot == slot)
        {
            Some(upload) => upload.title = label,
            None if !cleared.contains(&(kind, slot)) => form.changes.push(SlotChange::Retitle {
                kind,
                slot,
                title: label,
            }),
            None => {}
        }
    }
    form.changes
        .extend(cleared.into_iter().map(|(kind, slot)| SlotChange::Clear { kind, slot }));
    form.changes.extend(files.into_iter().map(SlotChange::Store));
    Ok(form)
}
