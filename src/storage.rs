use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Blob store for uploaded media and generated thumbnails.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: Option<String>)
        -> Result<()>;

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}

/// Content type to store an object with: the uploaded one when present,
/// otherwise guessed from the key's extension.
pub fn content_type_for(key: &str, uploaded: Option<&str>) -> String {
    uploaded
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(key)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
}
