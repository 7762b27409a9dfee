use anyhow::Context;
use bytes::Bytes;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::StorageClient;

/// Largest profile image accepted, in bytes.
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// An uploaded file as received from a multipart field.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

/// Stores a profile image for `user_id` and returns its public URL.
///
/// Callers validate the item with [`check_upload`] first.
pub async fn store_profile_image(
    storage: &dyn StorageClient,
    user_id: Uuid,
    img: UploadItem,
) -> anyhow::Result<String> {
    let ext = ext_from_mime(&img.content_type).context("unsupported image type")?;
    let key = format!("avatars/{}/{}.{}", user_id, Uuid::new_v4(), ext);
    storage
        .put_object(&key, img.body, &img.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    debug!(%user_id, %key, "profile image stored");
    Ok(storage.public_url(&key))
}

/// Deletes a previously stored profile image. The default sentinel and
/// foreign URLs are left alone, and failures are only logged.
pub async fn discard_profile_image(storage: &dyn StorageClient, url: &str, default_url: &str) {
    if url == default_url {
        return;
    }
    let Some(key) = storage.key_from_url(url) else {
        return;
    };
    if let Err(e) = storage.delete_object(&key).await {
        warn!(error = %e, %key, "failed to delete old profile image");
    }
}

/// Returns a user-facing reason when the upload cannot be used as a profile image.
pub fn check_upload(img: &UploadItem) -> Option<&'static str> {
    if img.body.is_empty() {
        return Some("Profile image is empty.");
    }
    if img.body.len() > MAX_IMAGE_BYTES {
        return Some("Profile image must be at most 5 MB.");
    }
    if ext_from_mime(&img.content_type).is_none() {
        return Some("Profile image must be a JPEG, PNG, WebP, GIF or HEIC file.");
    }
    None
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}
