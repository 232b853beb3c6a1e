use std::{io::Cursor, sync::Arc, time::Duration};

use async_trait::async_trait;
use diesel::prelude::*;
use image::{codecs::jpeg::JpegEncoder, ImageReader};
use serde::Deserialize;
use tokio::task;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    attachments::{thumbnail_key, AttachmentKind},
    jobs::{retry_delay, JOB_GENERATE_THUMBNAIL},
    models::{Attachment, Job},
    schema::attachments,
    state::AppState,
};

use super::{JobExecution, JobHandler};

const THUMBNAIL_WIDTH: u32 = 200;
const THUMBNAIL_HEIGHT: u32 = 200;
const THUMBNAIL_QUALITY: u8 = 70;

#[derive(Debug, Deserialize)]
struct ThumbnailPayload {
    attachment_id: Uuid,
}

/// Renders a small JPEG next to an uploaded image and records its key.
pub struct GenerateThumbnailJob;

#[async_trait]
impl JobHandler for GenerateThumbnailJob {
    fn job_type(&self) -> &'static str {
        JOB_GENERATE_THUMBNAIL
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: ThumbnailPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid thumbnail payload: {err}"),
                }
            }
        };

        let state_clone = state.clone();
        let attachment_id = payload.attachment_id;
        let attachment =
            match task::spawn_blocking(move || load_attachment(state_clone, attachment_id)).await {
                Ok(Ok(Some(attachment))) => attachment,
                Ok(Ok(None)) => {
                    info!(
                        job_id = %job.id,
                        %attachment_id,
                        "attachment is gone; skipping thumbnail"
                    );
                    return JobExecution::Success;
                }
                Ok(Err(err)) => {
                    return JobExecution::Retry {
                        delay: retry_delay(job.attempts),
                        error: err,
                    };
                }
                Err(join_err) => {
                    error!(job_id = %job.id, error = %join_err, "thumbnail task panicked");
                    return JobExecution::Retry {
                        delay: Duration::from_secs(60),
                        error: format!("worker panicked: {join_err}"),
                    };
                }
            };

        if attachment.kind != AttachmentKind::Image.as_str() {
            return JobExecution::Success;
        }

        let bytes = match state.storage.get_object(&attachment.storage_key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "thumbnail fetch failed; will retry");
                return JobExecution::Retry {
                    delay: retry_delay(job.attempts),
                    error: err.to_string(),
                };
            }
        };

        let rendered = match task::spawn_blocking(move || render_thumbnail(&bytes)).await {
            Ok(Ok(rendered)) => rendered,
            Ok(Err(err)) => return JobExecution::Failed { error: err },
            Err(join_err) => {
                return JobExecution::Failed {
                    error: format!("thumbnail rendering panicked: {join_err}"),
                }
            }
        };

        let key = thumbnail_key(&attachment.storage_key);
        if let Err(err) = state
            .storage
            .put_object(&key, rendered, Some("image/jpeg".into()))
            .await
        {
            warn!(job_id = %job.id, error = %err, "failed to upload thumbnail; retrying");
            return JobExecution::Retry {
                delay: retry_delay(job.attempts),
                error: err.to_string(),
            };
        }

        let state_clone = state.clone();
        let storage_key = attachment.storage_key.clone();
        match task::spawn_blocking(move || {
            record_thumbnail(state_clone, attachment.id, &storage_key, &key)
        })
        .await
        {
            Ok(Ok(())) => JobExecution::Success,
            Ok(Err(err)) => JobExecution::Retry {
                delay: retry_delay(job.attempts),
                error: err,
            },
            Err(join_err) => JobExecution::Retry {
                delay: Duration::from_secs(60),
                error: format!("metadata update panic: {join_err}"),
            },
        }
    }
}

fn load_attachment(state: Arc<AppState>, id: Uuid) -> Result<Option<Attachment>, String> {
    let mut conn = state.db().map_err(|err| format!("{err:?}"))?;
    attachments::table
        .find(id)
        .select(Attachment::as_select())
        .first(&mut conn)
        .optional()
        .map_err(|err| format!("{err:?}"))
}

/// Only records the key while the row still points at the same upload; a
/// replacement in the meantime queues its own job.
fn record_thumbnail(
    state: Arc<AppState>,
    id: Uuid,
    storage_key: &str,
    key: &str,
) -> Result<(), String> {
    let mut conn = state.db().map_err(|err| format!("{err:?}"))?;
    diesel::update(
        attachments::table
            .filter(attachments::id.eq(id))
            .filter(attachments::storage_key.eq(storage_key)),
    )
    .set(attachments::thumbnail_key.eq(Some(key)))
    .execute(&mut conn)
    .map_err(|err| format!("{err:?}"))?;
    Ok(())
}

pub fn render_thumbnail(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| err.to_string())?;
    let image = reader.decode().map_err(|err| err.to_string())?;
    let thumbnail = image.thumbnail(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT).to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, THUMBNAIL_QUALITY)
        .encode_image(&thumbnail)
        .map_err(|err| err.to_string())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn thumbnails_fit_the_bounding_box_and_keep_aspect() {
        let jpeg = render_thumbnail(&png(800, 400)).unwrap();
        let decoded = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (200, 100));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(render_thumbnail(b"not an image").is_err());
    }
}
