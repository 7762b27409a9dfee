use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{CreateError, User};
use crate::error::ConflictField;

/// Persistence of user records and their active session set.
///
/// Token set mutations are single atomic updates, never read-then-write, so two
/// concurrent logins for the same user cannot lose each other's session.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    /// Inserts the record as given, including its initial token set.
    async fn create(&self, user: User) -> Result<User, CreateError>;
    /// Persists the mutable profile fields (name, profile image).
    async fn update(&self, user: &User) -> anyhow::Result<User>;

    /// Adds `jti` and, in the same update, drops every tracked ID minted
    /// before `prune_before`.
    async fn add_token(
        &self,
        user_id: Uuid,
        jti: Uuid,
        prune_before: OffsetDateTime,
    ) -> anyhow::Result<()>;
    /// No-op when the token is not in the set.
    async fn remove_token(&self, user_id: Uuid, jti: Uuid) -> anyhow::Result<()>;
    async fn has_token(&self, user_id: Uuid, jti: Uuid) -> anyhow::Result<bool>;
}

/// True when `jti` is a v7 ID stamped before `cutoff`. Other IDs carry no age and are kept.
pub(crate) fn minted_before(jti: &Uuid, cutoff: OffsetDateTime) -> bool {
    match jti.get_timestamp() {
        Some(ts) => {
            let (secs, nanos) = ts.to_unix();
            let minted = i128::from(secs) * 1_000_000_000 + i128::from(nanos);
            minted < cutoff.unix_timestamp_nanos()
        }
        None => false,
    }
}

const USER_COLUMNS: &str =
    "id, username, email, name, password_hash, profile_image, active_tokens, created_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email_or_username(
        &self,
        email: &str,
        username: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR username = $2 LIMIT 1"
        ))
        .bind(email)
        .bind(username)
        .fetch_optional(&self.db)
        .await
        .context("find user by email or username")?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, user: User) -> Result<User, CreateError> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users
                (id, username, email, name, password_hash, profile_image, active_tokens, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(&user.profile_image)
        .bind(&user.active_tokens)
        .bind(user.created_at)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(u) => Ok(u),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let field = match db_err.constraint() {
                    Some(c) if c.contains("username") => ConflictField::Username,
                    _ => ConflictField::Email,
                };
                Err(CreateError::Duplicate(field))
            }
            Err(e) => Err(CreateError::Other(anyhow::Error::new(e).context("insert user"))),
        }
    }

    async fn update(&self, user: &User) -> anyhow::Result<User> {
        let updated = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET name = $2, profile_image = $3 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.profile_image)
        .fetch_one(&self.db)
        .await
        .context("update user")?;
        Ok(updated)
    }

    async fn add_token(
        &self,
        user_id: Uuid,
        jti: Uuid,
        prune_before: OffsetDateTime,
    ) -> anyhow::Result<()> {
        // a v7 UUID keeps its unix millis in the first 48 bits
        let res = sqlx::query(
            r#"
            UPDATE users SET active_tokens = array_append(
                ARRAY(
                    SELECT t FROM unnest(active_tokens) AS t
                    WHERE substr(t::text, 15, 1) <> '7'
                       OR ('x' || substr(replace(t::text, '-', ''), 1, 12))::bit(48)::bigint
                          >= $3
                ),
                $2)
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(jti)
        .bind((prune_before.unix_timestamp_nanos() / 1_000_000) as i64)
        .execute(&self.db)
        .await
        .context("add active token")?;
        anyhow::ensure!(res.rows_affected() == 1, "user {user_id} not found");
        Ok(())
    }

    async fn remove_token(&self, user_id: Uuid, jti: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET active_tokens = array_remove(active_tokens, $2) WHERE id = $1",
        )
        .bind(user_id)
        .bind(jti)
        .execute(&self.db)
        .await
        .context("remove active token")?;
        Ok(())
    }

    async fn has_token(&self, user_id: Uuid, jti: Uuid) -> anyhow::Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE id = $1 AND $2 = ANY(active_tokens))",
        )
        .bind(user_id)
        .bind(jti)
        .fetch_one(&self.db)
        .await
        .context("check active token")?;
        Ok(found)
    }
}
