use tracing::info;
use uuid::Uuid;

use crate::{
    auth::repo_types::User,
    error::{FieldError, ServiceError},
    images::services::{check_upload, discard_profile_image, store_profile_image, UploadItem},
    state::AppState,
};

pub const MAX_NAME_CHARS: usize = 100;

async fn load(st: &AppState, user_id: Uuid) -> Result<User, ServiceError> {
    st.users
        .find_by_id(user_id)
        .await
        .map_err(ServiceError::Store)?
        // a valid session for a missing record means the account is gone
        .ok_or(ServiceError::Unauthorized)
}

pub async fn get_profile(st: &AppState, user_id: Uuid) -> Result<User, ServiceError> {
    load(st, user_id).await
}

pub async fn rename(st: &AppState, user_id: Uuid, name: &str) -> Result<User, ServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::Validation(vec![FieldError::new(
            "name",
            "This field is required.",
        )]));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ServiceError::Validation(vec![FieldError::new(
            "name",
            format!("Name must be at most {MAX_NAME_CHARS} characters."),
        )]));
    }

    let mut user = load(st, user_id).await?;
    user.name = name.to_string();
    let user = st.users.update(&user).await.map_err(ServiceError::Store)?;
    info!(%user_id, "display name updated");
    Ok(user)
}

/// Stores the new image, points the record at it, then drops the old one.
pub async fn replace_profile_image(
    st: &AppState,
    user_id: Uuid,
    img: UploadItem,
) -> Result<User, ServiceError> {
    if let Some(reason) = check_upload(&img) {
        return Err(ServiceError::Validation(vec![FieldError::new("profileImage", reason)]));
    }

    let mut user = load(st, user_id).await?;
    let previous = std::mem::take(&mut user.profile_image);
    user.profile_image = store_profile_image(st.storage.as_ref(), user_id, img)
        .await
        .map_err(ServiceError::Store)?;

    let user = match st.users.update(&user).await {
        Ok(u) => u,
        Err(e) => {
            discard_profile_image(
                st.storage.as_ref(),
                &user.profile_image,
                &st.config.default_profile_image,
            )
            .await;
            return Err(ServiceError::Store(e));
        }
    };
    discard_profile_image(st.storage.as_ref(), &previous, &st.config.default_profile_image).await;
    info!(%user_id, "profile image replaced");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::services::{tests::ann, RegisterInput};
    use bytes::Bytes;

    fn png() -> UploadItem {
        UploadItem {
            body: Bytes::from_static(b"\x89PNG"),
            content_type: "image/png".into(),
        }
    }

    async fn registered(st: &AppState, input: RegisterInput) -> User {
        st.auth.register(input).await.unwrap().user
    }

    #[tokio::test]
    async fn rename_trims_and_persists() {
        let st = AppState::fake();
        let user = registered(&st, ann()).await;
        let updated = rename(&st, user.id, "  Annie  ").await.unwrap();
        assert_eq!(updated.name, "Annie");
        assert_eq!(get_profile(&st, user.id).await.unwrap().name, "Annie");
    }

    #[tokio::test]
    async fn rename_rejects_blank_and_overlong_names() {
        let st = AppState::fake();
        let user = registered(&st, ann()).await;
        assert!(matches!(rename(&st, user.id, "   ").await, Err(ServiceError::Validation(_))));
        let long = "x".repeat(MAX_NAME_CHARS + 1);
        assert!(matches!(rename(&st, user.id, &long).await, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_user_is_unauthorized() {
        let st = AppState::fake();
        assert!(matches!(
            get_profile(&st, Uuid::new_v4()).await,
            Err(ServiceError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn replacing_image_deletes_previous_upload_but_not_default() {
        let (st, storage) = AppState::fake_with_storage();
        let user = registered(&st, ann()).await;
        assert_eq!(user.profile_image, st.config.default_profile_image);

        let first = replace_profile_image(&st, user.id, png()).await.unwrap();
        assert_eq!(storage.keys().len(), 1);

        let second = replace_profile_image(&st, user.id, png()).await.unwrap();
        assert_ne!(first.profile_image, second.profile_image);
        let keys = storage.keys();
        assert_eq!(keys.len(), 1);
        assert!(second.profile_image.ends_with(&keys[0]));
    }

    #[tokio::test]
    async fn invalid_image_is_rejected_before_storing() {
        let (st, storage) = AppState::fake_with_storage();
        let user = registered(&st, ann()).await;
        let bad = UploadItem {
            body: Bytes::from_static(b"GIF"),
            content_type: "text/plain".into(),
        };
        assert!(matches!(
            replace_profile_image(&st, user.id, bad).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(storage.keys().is_empty());
    }
}
