use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::auth::{
    gate::GatePolicy,
    handlers::{LOGIN_PATH, REGISTER_PATH},
    jwt::JwtKeys,
    memory::MemoryUserStore,
    password::Hasher,
    repo::{PgUserStore, UserStore},
    services::AuthService,
};
use crate::config::{AppConfig, StorageConfig};
use crate::storage::{DiskStorage, Storage, StorageClient};

/// Prefix every API route is nested under.
pub const API_PREFIX: &str = "/api/v1";

#[derive(Clone)]
pub struct AppState {
    pub db: Option<PgPool>,
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub storage: Arc<dyn StorageClient>,
    pub auth: AuthService,
    pub gate: Arc<GatePolicy>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let (db, users) = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;
                (Some(db), users)
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
                (None, Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>)
            }
        };

        let storage = match &config.storage {
            StorageConfig::S3(s3) => {
                info!(endpoint = %s3.endpoint, bucket = %s3.bucket, "using s3 asset storage");
                Arc::new(Storage::new(s3, "us-east-1").await?) as Arc<dyn StorageClient>
            }
            StorageConfig::Disk { upload_dir } => {
                info!(%upload_dir, "using local asset storage");
                Arc::new(DiskStorage::new(upload_dir)) as Arc<dyn StorageClient>
            }
        };

        Self::from_parts(db, config, users, storage)
    }

    pub fn from_parts(
        db: Option<PgPool>,
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        storage: Arc<dyn StorageClient>,
    ) -> anyhow::Result<Self> {
        let auth = AuthService::new(
            users.clone(),
            storage.clone(),
            Hasher::new(config.hashing)?,
            JwtKeys::new(&config.jwt),
            config.default_profile_image.clone(),
        )?;
        let gate = Arc::new(GatePolicy::from_config(
            &config.session,
            [REGISTER_PATH, LOGIN_PATH]
                .iter()
                .map(|p| format!("{API_PREFIX}{p}")),
        ));
        Ok(Self {
            db,
            config,
            users,
            storage,
            auth,
            gate,
        })
    }
}

#[cfg(test)]
pub(crate) use fake::FakeStorage;
