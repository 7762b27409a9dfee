use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::{instrument, warn};

use super::services;
use crate::{
    auth::{dto::PublicUser, extractors::CurrentUser},
    error::{FieldError, ServiceError},
    images::services::{UploadItem, MAX_IMAGE_BYTES},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: String,
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).patch(update_me))
        .route(
            "/me/profile-image",
            put(put_profile_image).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 64 * 1024)),
        )
}

#[instrument(skip(state, user))]
pub async fn get_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<PublicUser>, ServiceError> {
    let user = services::get_profile(&state, user.user_id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, user, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<PublicUser>, ServiceError> {
    let user = services::rename(&state, user.user_id, &payload.name).await?;
    Ok(Json(user.into()))
}

/// PUT /me/profile-image (multipart, field profileImage)
#[instrument(skip(state, user, mp))]
pub async fn put_profile_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut mp: Multipart,
) -> Result<Json<PublicUser>, ServiceError> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        warn!(error = %e, "malformed profile image upload");
        ServiceError::Validation(vec![FieldError::new("profileImage", "Malformed upload.")])
    };

    let mut upload = None;
    while let Some(field) = mp.next_field().await.map_err(malformed)? {
        if field.name() == Some("profileImage") {
            let content_type = field
                .content_type()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "application/octet-stream".into());
            let body = field.bytes().await.map_err(malformed)?;
            upload = Some(UploadItem { body, content_type });
        }
    }
    let upload = upload.ok_or_else(|| {
        ServiceError::Validation(vec![FieldError::new("profileImage", "This field is required.")])
    })?;

    let user = services::replace_profile_image(&state, user.user_id, upload).await?;
    Ok(Json(user.into()))
}
