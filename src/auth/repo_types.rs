use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ConflictField;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                     // unique user ID
    pub username: String,             // unique
    pub email: String,                // unique, lowercased
    pub name: String,                 // display name
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub profile_image: String,        // asset URL or the default sentinel
    #[serde(skip_serializing)]
    pub active_tokens: Vec<Uuid>,     // jti of every live session
    pub created_at: OffsetDateTime,   // creation timestamp
}

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("duplicate {0}")]
    Duplicate(ConflictField),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
