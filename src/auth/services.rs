use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        claims::{Claims, Identity},
        jwt::{JwtKeys, TokenRejection},
        password::Hasher,
        repo::UserStore,
        repo_types::{CreateError, User},
        validation::{validate_registration, RegistrationFields},
    },
    error::{ConflictField, FieldError, ServiceError},
    images::services::{check_upload, discard_profile_image, store_profile_image, UploadItem},
    storage::StorageClient,
};

/// Raw registration form, before trimming and validation.
#[derive(Debug, Clone, Default)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub password: String,
    pub username: String,
    pub profile_image: Option<UploadItem>,
}

/// A user together with the session token just issued to them.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: User,
    pub token: String,
    pub claims: Claims,
}

/// Result of checking a presented session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    Valid(Identity),
    Invalid(TokenRejection),
    /// Signature and expiry are fine but the session was logged out.
    Revoked,
}

/// Registration, login, logout and session checks over a [`UserStore`].
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    storage: Arc<dyn StorageClient>,
    hasher: Hasher,
    keys: JwtKeys,
    default_profile_image: String,
    // verified against on unknown emails so both login failures cost the same
    dummy_hash: Arc<str>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        storage: Arc<dyn StorageClient>,
        hasher: Hasher,
        keys: JwtKeys,
        default_profile_image: String,
    ) -> anyhow::Result<Self> {
        let dummy_hash = hasher.hash(&Uuid::new_v4().to_string())?.into();
        Ok(Self {
            users,
            storage,
            hasher,
            keys,
            default_profile_image,
            dummy_hash,
        })
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    pub async fn register(&self, input: RegisterInput) -> Result<AuthOutcome, ServiceError> {
        let name = input.name.trim();
        let email = input.email.trim().to_lowercase();
        let username = input.username.trim();

        let mut errors = validate_registration(RegistrationFields {
            name,
            email: &email,
            password: &input.password,
            username,
        });
        if let Some(reason) = input.profile_image.as_ref().and_then(check_upload) {
            errors.push(FieldError::new("profileImage", reason));
        }
        if !errors.is_empty() {
            warn!(email = %email, count = errors.len(), "registration rejected");
            return Err(ServiceError::Validation(errors));
        }

        let existing = self
            .users
            .find_by_email_or_username(&email, username)
            .await
            .map_err(store_failure)?;
        if let Some(existing) = existing {
            let field = if existing.email == email {
                ConflictField::Email
            } else {
                ConflictField::Username
            };
            warn!(%field, "registration conflict");
            return Err(ServiceError::Conflict(field));
        }

        let password_hash = self.hasher.hash(&input.password).map_err(internal)?;

        let id = Uuid::new_v4();
        let profile_image = match input.profile_image {
            Some(img) => store_profile_image(self.storage.as_ref(), id, img)
                .await
                .map_err(store_failure)?,
            None => self.default_profile_image.clone(),
        };

        let mut user = User {
            id,
            username: username.to_string(),
            email,
            name: name.to_string(),
            password_hash,
            profile_image,
            active_tokens: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        };
        let (token, claims) = self.keys.sign(&user).map_err(internal)?;
        user.active_tokens.push(claims.jti);

        let user = match self.users.create(user).await {
            Ok(u) => u,
            Err(e) => {
                discard_profile_image(
                    self.storage.as_ref(),
                    &claims.profile_image,
                    &self.default_profile_image,
                )
                .await;
                return Err(match e {
                    CreateError::Duplicate(field) => {
                        warn!(%field, "registration conflict on insert");
                        ServiceError::Conflict(field)
                    }
                    CreateError::Other(e) => store_failure(e),
                });
            }
        };

        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(AuthOutcome {
            user,
            token,
            claims,
        })
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthOutcome, ServiceError> {
        let email = email.trim().to_lowercase();

        let mut user = match self.users.find_by_email(&email).await.map_err(store_failure)? {
            Some(u) => u,
            None => {
                let _ = self.hasher.verify(password, &self.dummy_hash);
                warn!(email = %email, "login unknown email");
                return Err(ServiceError::InvalidCredentials);
            }
        };

        if !self
            .hasher
            .verify(password, &user.password_hash)
            .map_err(internal)?
        {
            warn!(email = %email, user_id = %user.id, "login invalid password");
            return Err(ServiceError::InvalidCredentials);
        }

        let (token, claims) = self.keys.sign(&user).map_err(internal)?;
        self.users
            .add_token(user.id, claims.jti, OffsetDateTime::now_utc() - self.keys.ttl)
            .await
            .map_err(store_failure)?;
        user.active_tokens.push(claims.jti);

        info!(user_id = %user.id, email = %user.email, "user logged in");
        Ok(AuthOutcome {
            user,
            token,
            claims,
        })
    }

    /// Revokes one session. Succeeds when the session is already gone.
    pub async fn logout(&self, user_id: Uuid, session_id: Uuid) -> Result<(), ServiceError> {
        self.users
            .remove_token(user_id, session_id)
            .await
            .map_err(store_failure)?;
        info!(%user_id, %session_id, "user logged out");
        Ok(())
    }

    /// Verifies a presented token, then checks it is still in the user's active set.
    pub async fn check_session(&self, token: &str) -> Result<SessionCheck, ServiceError> {
        let claims = match self.keys.verify(token) {
            Ok(c) => c,
            Err(rejection) => return Ok(SessionCheck::Invalid(rejection)),
        };
        let active = self
            .users
            .has_token(claims.sub, claims.jti)
            .await
            .map_err(store_failure)?;
        if !active {
            return Ok(SessionCheck::Revoked);
        }
        Ok(SessionCheck::Valid(claims.into()))
    }
}

fn store_failure(e: anyhow::Error) -> ServiceError {
    error!(error = %e, "user store failure");
    ServiceError::Store(e)
}

fn internal(e: anyhow::Error) -> ServiceError {
    error!(error = %e, "internal failure");
    ServiceError::Internal(e)
}
