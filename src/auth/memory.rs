use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use time::OffsetDateTime;

use crate::auth::repo::{minted_before, UserStore};
use crate::auth::repo_types::{CreateError, User};
use crate::error::ConflictField;

/// Process-local user store for development runs without a database, and for tests.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> anyhow::Result<Option<User>> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.email == email || u.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let users = self.users.lock().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn create(&self, user: User) -> Result<User, CreateError> {
        let mut users = self.users.lock().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(CreateError::Duplicate(ConflictField::Email));
        }
        if users.values().any(|u| u.username == user.username) {
            return Err(CreateError::Duplicate(ConflictField::Username));
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: &User) -> anyhow::Result<User> {
        let mut users = self.users.lock().await;
        let stored = users
            .get_mut(&user.id)
            .ok_or_else(|| anyhow::anyhow!("user {} not found", user.id))?;
        stored.name = user.name.clone();
        stored.profile_image = user.profile_image.clone();
        Ok(stored.clone())
    }

    async fn add_token(
        &self,
        user_id: Uuid,
        jti: Uuid,
        prune_before: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut users = self.users.lock().await;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow::anyhow!("user {user_id} not found"))?;
        user.active_tokens.retain(|t| !minted_before(t, prune_before));
        user.active_tokens.push(jti);
        Ok(())
    }

    async fn remove_token(&self, user_id: Uuid, jti: Uuid) -> anyhow::Result<()> {
        if let Some(user) = self.users.lock().await.get_mut(&user_id) {
            if let Some(pos) = user.active_tokens.iter().position(|t| *t == jti) {
                user.active_tokens.remove(pos);
            }
        }
        Ok(())
    }

    async fn has_token(&self, user_id: Uuid, jti: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .users
            .lock()
            .await
            .get(&user_id)
            .is_some_and(|u| u.active_tokens.contains(&jti)))
    }
}
